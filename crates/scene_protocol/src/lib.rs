//! Scene-mutation boundary.
//!
//! The paging side never touches the renderer's scene graph directly. It
//! describes mutations as `ChangeOp` records, batches them into a
//! `ChangeSet`, and the owning thread applies the whole batch at once
//! with `ChangeSet::process`. A `ChangeSet` is consumed by `process`, so
//! the type system already enforces the applied-exactly-once contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity value meaning "no object". Real identities start at 1.
pub const EMPTY_IDENTITY: u64 = 0;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn allocate_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

/// Identity types that reserve a zero sentinel for "none".
pub trait EmptyIdentity {
    const EMPTY: Self;

    fn is_empty(&self) -> bool;
}

macro_rules! identity_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Allocate a fresh, process-unique identity. Safe from any
            /// thread; the counter never hands out `EMPTY_IDENTITY`.
            pub fn allocate() -> Self {
                $name(allocate_identity())
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl EmptyIdentity for $name {
            const EMPTY: Self = $name(EMPTY_IDENTITY);

            fn is_empty(&self) -> bool {
                self.0 == EMPTY_IDENTITY
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

identity_type! {
    /// Handle to one drawable group owned by a tile.
    SceneObjectId
}

identity_type! {
    /// Handle to one texture resident in the scene.
    TextureId
}

/// Pixel payload for a texture. The bytes are shared, not copied, when a
/// change set is merged or cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub bytes: Arc<[u8]>,
}

/// One drawable group as the scene tracks it. Contents beyond visibility
/// and an optional texture binding are the renderer's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneObject {
    pub enabled: bool,
    pub texture: TextureId,
}

impl SceneObject {
    /// A disabled object with no texture binding. New tile geometry
    /// always enters the scene in this state.
    pub fn hidden() -> Self {
        SceneObject {
            enabled: false,
            texture: TextureId::EMPTY,
        }
    }

    pub fn with_texture(texture: TextureId) -> Self {
        SceneObject {
            enabled: false,
            texture,
        }
    }
}

/// One scene mutation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    AddTexture { id: TextureId, texture: TextureData },
    RemoveTexture { id: TextureId },
    AddObject { id: SceneObjectId, object: SceneObject },
    RemoveObject { id: SceneObjectId },
    EnableObject { id: SceneObjectId },
    DisableObject { id: SceneObjectId },
}

/// Ordered batch of scene mutations.
///
/// Produced anywhere, merged in submission order, applied atomically by
/// whoever owns the scene. `process` takes the set by value; a processed
/// set cannot be applied again.
#[derive(Debug, Default)]
pub struct ChangeSet {
    ops: Vec<ChangeOp>,
}

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet { ops: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn push(&mut self, op: ChangeOp) {
        self.ops.push(op);
    }

    /// Append `other`'s ops after this set's, preserving both orders.
    pub fn merge(&mut self, other: ChangeSet) {
        let mut other = other;
        self.ops.append(&mut other.ops);
    }

    pub fn ops(&self) -> &[ChangeOp] {
        &self.ops
    }

    /// Apply every op, in order, to `scene`. Consumes the set.
    pub fn process(self, scene: &mut Scene) {
        scene.apply(self);
    }
}

/// Minimal stand-in for the renderer's scene graph: an arena of objects
/// and textures keyed by their identities, mutated only through change
/// sets.
#[derive(Debug, Default)]
pub struct Scene {
    objects: HashMap<SceneObjectId, SceneObject>,
    textures: HashMap<TextureId, TextureData>,
    change_sets_applied: u64,
}

impl Scene {
    pub fn new() -> Self {
        Scene::default()
    }

    fn apply(&mut self, changes: ChangeSet) {
        for op in changes.ops {
            match op {
                ChangeOp::AddTexture { id, texture } => {
                    self.textures.insert(id, texture);
                }
                ChangeOp::RemoveTexture { id } => {
                    self.textures.remove(&id);
                }
                ChangeOp::AddObject { id, object } => {
                    self.objects.insert(id, object);
                }
                ChangeOp::RemoveObject { id } => {
                    self.objects.remove(&id);
                }
                // Enable/disable for an id that already left the scene is
                // routine during unload races and is ignored.
                ChangeOp::EnableObject { id } => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.enabled = true;
                    }
                }
                ChangeOp::DisableObject { id } => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.enabled = false;
                    }
                }
            }
        }
        self.change_sets_applied += 1;
    }

    pub fn object(&self, id: SceneObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn texture(&self, id: TextureId) -> Option<&TextureData> {
        self.textures.get(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.objects.values().filter(|o| o.enabled).count()
    }

    /// How many change sets have been applied since creation. One flush
    /// of the pending accumulator bumps this exactly once, however many
    /// producers merged into it.
    pub fn change_sets_applied(&self) -> u64 {
        self.change_sets_applied
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChangeOp, ChangeSet, EMPTY_IDENTITY, EmptyIdentity, Scene, SceneObject, SceneObjectId,
        TextureData, TextureId,
    };
    use std::sync::Arc;

    fn texture_1x1() -> TextureData {
        TextureData {
            width: 1,
            height: 1,
            bytes: Arc::from([0u8, 0, 0, 255].as_slice()),
        }
    }

    #[test]
    fn allocated_identities_are_unique_and_never_empty() {
        let a = SceneObjectId::allocate();
        let b = SceneObjectId::allocate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
        assert!(SceneObjectId::EMPTY.is_empty());
        assert_eq!(SceneObjectId::EMPTY.raw(), EMPTY_IDENTITY);
    }

    #[test]
    fn merge_preserves_submission_order() {
        let id = SceneObjectId::allocate();
        let mut first = ChangeSet::new();
        first.push(ChangeOp::AddObject {
            id,
            object: SceneObject::hidden(),
        });
        let mut second = ChangeSet::new();
        second.push(ChangeOp::EnableObject { id });
        second.push(ChangeOp::DisableObject { id });

        first.merge(second);

        assert_eq!(first.len(), 3);
        assert!(matches!(first.ops()[0], ChangeOp::AddObject { .. }));
        assert!(matches!(first.ops()[1], ChangeOp::EnableObject { .. }));
        assert!(matches!(first.ops()[2], ChangeOp::DisableObject { .. }));
    }

    #[test]
    fn process_applies_ops_in_order() {
        let mut scene = Scene::new();
        let object_id = SceneObjectId::allocate();
        let texture_id = TextureId::allocate();

        let mut changes = ChangeSet::new();
        changes.push(ChangeOp::AddTexture {
            id: texture_id,
            texture: texture_1x1(),
        });
        changes.push(ChangeOp::AddObject {
            id: object_id,
            object: SceneObject::with_texture(texture_id),
        });
        changes.push(ChangeOp::EnableObject { id: object_id });
        changes.process(&mut scene);

        assert_eq!(scene.object_count(), 1);
        assert_eq!(scene.texture_count(), 1);
        assert_eq!(scene.enabled_count(), 1);
        assert_eq!(scene.change_sets_applied(), 1);

        let mut removal = ChangeSet::new();
        removal.push(ChangeOp::RemoveObject { id: object_id });
        removal.push(ChangeOp::RemoveTexture { id: texture_id });
        removal.process(&mut scene);

        assert_eq!(scene.object_count(), 0);
        assert_eq!(scene.texture_count(), 0);
        assert_eq!(scene.change_sets_applied(), 2);
    }

    #[test]
    fn toggling_a_missing_object_is_ignored() {
        let mut scene = Scene::new();
        let mut changes = ChangeSet::new();
        changes.push(ChangeOp::EnableObject {
            id: SceneObjectId::allocate(),
        });
        changes.process(&mut scene);
        assert_eq!(scene.object_count(), 0);
        assert_eq!(scene.change_sets_applied(), 1);
    }
}

use scene_protocol::{ChangeOp, ChangeSet, SceneObjectId, TextureId};
use smallvec::SmallVec;
use tile_model::TileId;

/// Paging state for one tracked quadtree node.
///
/// Created when the evaluator decides the node is wanted, mutated as the
/// fetch resolves, destroyed when the node falls out of the wanted set.
/// Destruction must release every owned scene identity first; see
/// [`LoadedTile::release_into`].
#[derive(Debug)]
pub struct LoadedTile {
    pub id: TileId,
    /// Fetch dispatched (or queued) and not yet resolved.
    pub is_loading: bool,
    /// Fetch resolved successfully for every frame.
    pub did_load: bool,
    /// The tile's geometry is currently visible in the scene.
    pub enabled: bool,
    /// This node is hidden in favor of its fully loaded children.
    pub children_enabled: bool,
    frames_loaded: u64,
    pub objects: SmallVec<[SceneObjectId; 4]>,
    pub textures: SmallVec<[TextureId; 2]>,
}

impl LoadedTile {
    pub fn new(id: TileId) -> Self {
        LoadedTile {
            id,
            is_loading: true,
            did_load: false,
            enabled: false,
            children_enabled: false,
            frames_loaded: 0,
            objects: SmallVec::new(),
            textures: SmallVec::new(),
        }
    }

    /// Record one frame's arrival. Frame -1 (single-image sources) maps
    /// to bit zero.
    pub fn mark_frame_loaded(&mut self, frame: i32) {
        let bit = frame.max(0) as u32;
        debug_assert!(bit < 64, "frame index {bit} out of range");
        self.frames_loaded |= 1 << bit;
    }

    pub fn frames_complete(&self, image_depth: u32) -> bool {
        self.frames_loaded.count_ones() >= image_depth
    }

    /// Emit removal ops for everything this tile owns and forget the
    /// identities. Part of every unload path.
    pub fn release_into(&mut self, changes: &mut ChangeSet) {
        for id in self.objects.drain(..) {
            changes.push(ChangeOp::RemoveObject { id });
        }
        for id in self.textures.drain(..) {
            changes.push(ChangeOp::RemoveTexture { id });
        }
    }
}

/// Point-in-time copy of one tile's paging state, for tools and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSnapshot {
    pub id: TileId,
    pub is_loading: bool,
    pub did_load: bool,
    pub enabled: bool,
    pub children_enabled: bool,
    pub object_count: usize,
}

impl TileSnapshot {
    pub fn of(tile: &LoadedTile) -> Self {
        TileSnapshot {
            id: tile.id,
            is_loading: tile.is_loading,
            did_load: tile.did_load,
            enabled: tile.enabled,
            children_enabled: tile.children_enabled,
            object_count: tile.objects.len(),
        }
    }
}

/// Running counters for one paging layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagingStats {
    pub fetches_dispatched: u64,
    pub fetches_failed: u64,
    pub vacuous_loads: u64,
    pub tiles_unloaded: u64,
    pub stale_results_dropped: u64,
}

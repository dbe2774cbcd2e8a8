//! Visibility re-evaluation over the tracked tile index.
//!
//! The rule, applied from a chosen root downward: a node whose four
//! children have all loaded steps aside and lets the children (each
//! re-tested the same way) carry the display; any other node shows
//! itself exactly when its own load has completed, and its descendants
//! are forced off. The result is a frontier of enabled tiles with no
//! gaps and no overlap, refining as loads complete.
//!
//! Decisions are reported as enable/disable deltas against current
//! state, so re-running with nothing changed yields an empty delta and
//! callers can batch the whole transition into one change set.

use std::collections::HashMap;

use tile_model::{MAX_LEVEL, TileId};

use crate::loaded_tile::LoadedTile;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct VisibilityDelta {
    pub enable: Vec<TileId>,
    pub disable: Vec<TileId>,
}

impl VisibilityDelta {
    pub fn is_empty(&self) -> bool {
        self.enable.is_empty() && self.disable.is_empty()
    }
}

pub(crate) fn evaluate_from(
    tiles: &mut HashMap<TileId, LoadedTile>,
    root: TileId,
) -> VisibilityDelta {
    let mut delta = VisibilityDelta::default();
    evaluate_node(tiles, root, &mut delta);
    delta
}

fn evaluate_node(tiles: &mut HashMap<TileId, LoadedTile>, id: TileId, delta: &mut VisibilityDelta) {
    let children = (id.level < MAX_LEVEL).then(|| id.children());
    let loaded_children = children.filter(|children| {
        children
            .iter()
            .all(|child| tiles.get(child).is_some_and(|tile| tile.did_load))
    });

    if let Some(children) = loaded_children {
        // Fully covered one level down: this node steps aside and each
        // child gets the same test.
        set_enabled(tiles, id, false, delta);
        set_children_enabled(tiles, id, true);
        for child in children {
            evaluate_node(tiles, child, delta);
        }
    } else {
        let show = tiles
            .get(&id)
            .is_some_and(|tile| tile.did_load && !tile.is_loading);
        set_enabled(tiles, id, show, delta);
        set_children_enabled(tiles, id, false);
        if let Some(children) = children {
            for child in children {
                disable_subtree(tiles, child, delta);
            }
        }
    }
}

fn disable_subtree(
    tiles: &mut HashMap<TileId, LoadedTile>,
    id: TileId,
    delta: &mut VisibilityDelta,
) {
    // Untracked nodes have no tracked descendants worth visiting; the
    // index always holds full ancestor chains.
    if !tiles.contains_key(&id) {
        return;
    }
    set_enabled(tiles, id, false, delta);
    set_children_enabled(tiles, id, false);
    if id.level < MAX_LEVEL {
        for child in id.children() {
            disable_subtree(tiles, child, delta);
        }
    }
}

fn set_enabled(
    tiles: &mut HashMap<TileId, LoadedTile>,
    id: TileId,
    want: bool,
    delta: &mut VisibilityDelta,
) {
    let Some(tile) = tiles.get_mut(&id) else {
        return;
    };
    if tile.enabled == want {
        return;
    }
    tile.enabled = want;
    if want {
        delta.enable.push(id);
    } else {
        delta.disable.push(id);
    }
}

fn set_children_enabled(tiles: &mut HashMap<TileId, LoadedTile>, id: TileId, want: bool) {
    if let Some(tile) = tiles.get_mut(&id) {
        tile.children_enabled = want;
    }
}

#[cfg(test)]
mod tests {
    use super::{VisibilityDelta, evaluate_from};
    use crate::loaded_tile::LoadedTile;
    use std::collections::HashMap;
    use tile_model::TileId;

    fn loaded(id: TileId) -> LoadedTile {
        let mut tile = LoadedTile::new(id);
        tile.is_loading = false;
        tile.did_load = true;
        tile
    }

    fn index(tiles: impl IntoIterator<Item = LoadedTile>) -> HashMap<TileId, LoadedTile> {
        tiles.into_iter().map(|tile| (tile.id, tile)).collect()
    }

    #[test]
    fn lone_loaded_root_becomes_enabled() {
        let mut tiles = index([loaded(TileId::ROOT)]);
        let delta = evaluate_from(&mut tiles, TileId::ROOT);
        assert_eq!(delta.enable, vec![TileId::ROOT]);
        assert!(delta.disable.is_empty());
        assert!(tiles[&TileId::ROOT].enabled);
    }

    #[test]
    fn four_loaded_children_supersede_the_parent() {
        let mut tiles = index(
            [loaded(TileId::ROOT)]
                .into_iter()
                .chain(TileId::ROOT.children().into_iter().map(loaded)),
        );
        // First pass: parent shows alone only if children incomplete; all
        // four are loaded here, so the frontier moves down immediately.
        let delta = evaluate_from(&mut tiles, TileId::ROOT);
        assert!(delta.disable.is_empty(), "parent was never enabled");
        assert_eq!(delta.enable.len(), 4);
        assert!(!tiles[&TileId::ROOT].enabled);
        assert!(tiles[&TileId::ROOT].children_enabled);
        for child in TileId::ROOT.children() {
            assert!(tiles[&child].enabled);
        }
    }

    #[test]
    fn incomplete_children_leave_the_parent_visible() {
        let mut children: Vec<LoadedTile> =
            TileId::ROOT.children().into_iter().map(loaded).collect();
        // One child still loading.
        children[3] = LoadedTile::new(children[3].id);
        let mut tiles = index([loaded(TileId::ROOT)].into_iter().chain(children));

        let delta = evaluate_from(&mut tiles, TileId::ROOT);

        assert_eq!(delta.enable, vec![TileId::ROOT]);
        assert!(tiles[&TileId::ROOT].enabled);
        assert!(!tiles[&TileId::ROOT].children_enabled);
        for child in TileId::ROOT.children() {
            assert!(!tiles[&child].enabled, "loaded-but-hidden until complete");
        }
    }

    #[test]
    fn frontier_recurses_into_grandchildren() {
        let first_child = TileId::ROOT.children()[0];
        let mut tiles = index(
            [loaded(TileId::ROOT)]
                .into_iter()
                .chain(TileId::ROOT.children().into_iter().map(loaded))
                .chain(first_child.children().into_iter().map(loaded)),
        );

        evaluate_from(&mut tiles, TileId::ROOT);

        assert!(!tiles[&TileId::ROOT].enabled);
        assert!(!tiles[&first_child].enabled, "deferred to its own children");
        assert!(tiles[&first_child].children_enabled);
        for grandchild in first_child.children() {
            assert!(tiles[&grandchild].enabled);
        }
        for sibling in &TileId::ROOT.children()[1..] {
            assert!(tiles[sibling].enabled);
        }
    }

    #[test]
    fn re_evaluation_without_changes_is_an_empty_delta() {
        let mut tiles = index(
            [loaded(TileId::ROOT)]
                .into_iter()
                .chain(TileId::ROOT.children().into_iter().map(loaded)),
        );
        let first = evaluate_from(&mut tiles, TileId::ROOT);
        assert!(!first.is_empty());
        let second = evaluate_from(&mut tiles, TileId::ROOT);
        assert_eq!(second, VisibilityDelta::default());
    }

    #[test]
    fn removing_a_child_restores_the_parent() {
        let mut tiles = index(
            [loaded(TileId::ROOT)]
                .into_iter()
                .chain(TileId::ROOT.children().into_iter().map(loaded)),
        );
        evaluate_from(&mut tiles, TileId::ROOT);

        let removed = TileId::ROOT.children()[2];
        tiles.remove(&removed);
        let delta = evaluate_from(&mut tiles, TileId::ROOT);

        assert_eq!(delta.enable, vec![TileId::ROOT]);
        assert_eq!(delta.disable.len(), 3, "remaining children hide again");
        assert!(tiles[&TileId::ROOT].enabled);
    }
}

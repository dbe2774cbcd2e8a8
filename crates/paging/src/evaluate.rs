//! View-driven tile evaluation.
//!
//! Decides, from one camera snapshot, which quadtree nodes are worth
//! tracking: a target level derived from eye height, the tiles of the
//! visible window at that level, and (unless single-level mode is on)
//! every ancestor chain above them so a coarser fallback is always
//! available while finer loads are in flight.

use std::cmp::Ordering;
use std::collections::HashSet;

use tile_model::TileId;
use view::ViewState;

/// Half-span of the evaluated window, as a multiple of eye height.
const VIEW_SPAN_FACTOR: f64 = 2.0;

/// Level whose tiles roughly match the screen detail available at the
/// current eye height. Halving the height moves one level deeper.
pub(crate) fn target_level(
    view: &ViewState,
    extent: f64,
    detail_cutoff: f64,
    max_level: u32,
) -> u32 {
    let ratio = extent / (view.height() * detail_cutoff);
    if ratio <= 1.0 {
        return 0;
    }
    let level = ratio.log2().floor();
    if level >= max_level as f64 {
        max_level
    } else {
        level as u32
    }
}

fn tile_center(id: TileId, extent: f64) -> (f64, f64) {
    let size = extent / TileId::tiles_across(id.level) as f64;
    (
        (id.x as f64 + 0.5) * size,
        (id.y as f64 + 0.5) * size,
    )
}

/// Screen-importance proxy: how large this tile looks from the current
/// eye point. Coarser and nearer both score higher, which is exactly the
/// fetch order we want.
pub(crate) fn tile_importance(view: &ViewState, id: TileId, extent: f64) -> f64 {
    let size = extent / TileId::tiles_across(id.level) as f64;
    let (center_x, center_y) = tile_center(id, extent);
    let distance = (center_x - view.center_x()).hypot(center_y - view.center_y());
    size / (view.height() + distance)
}

/// The wanted set for one snapshot, ordered coarse-first and, within a
/// level, most-important-first, so truncating at `max_tiles` sheds the
/// least valuable detail while keeping every fallback chain intact.
pub(crate) fn wanted_tiles(
    view: &ViewState,
    extent: f64,
    target: u32,
    single_level: bool,
    max_tiles: usize,
) -> Vec<TileId> {
    let across = TileId::tiles_across(target) as i64;
    let size = extent / across as f64;
    let half_span = view.height() * VIEW_SPAN_FACTOR;

    let index_of = |coordinate: f64| -> u32 {
        ((coordinate / size).floor() as i64).clamp(0, across - 1) as u32
    };
    let min_x = index_of(view.center_x() - half_span);
    let max_x = index_of(view.center_x() + half_span);
    let min_y = index_of(view.center_y() - half_span);
    let max_y = index_of(view.center_y() + half_span);

    let mut seen = HashSet::new();
    let mut wanted = Vec::new();
    for x in min_x..=max_x {
        for y in min_y..=max_y {
            let id = TileId::new(target, x, y);
            if seen.insert(id) {
                wanted.push(id);
            }
            if single_level {
                continue;
            }
            let mut cursor = id;
            while let Some(parent) = cursor.parent() {
                if !seen.insert(parent) {
                    break;
                }
                wanted.push(parent);
                cursor = parent;
            }
        }
    }

    wanted.sort_by(|a, b| {
        a.level.cmp(&b.level).then_with(|| {
            tile_importance(view, *b, extent)
                .partial_cmp(&tile_importance(view, *a, extent))
                .unwrap_or(Ordering::Equal)
        })
    });
    wanted.truncate(max_tiles);
    wanted
}

#[cfg(test)]
mod tests {
    use super::{target_level, tile_importance, wanted_tiles};
    use tile_model::TileId;
    use view::ViewState;

    fn view_at(center_x: f64, center_y: f64, height: f64) -> ViewState {
        ViewState::new(center_x, center_y, height, 0.0).expect("valid view")
    }

    #[test]
    fn target_level_deepens_as_the_eye_descends() {
        assert_eq!(target_level(&view_at(0.5, 0.5, 1.0), 1.0, 1.0, 20), 0);
        assert_eq!(target_level(&view_at(0.5, 0.5, 0.25), 1.0, 1.0, 20), 2);
        assert_eq!(target_level(&view_at(0.5, 0.5, 0.01), 1.0, 1.0, 20), 6);
        assert_eq!(target_level(&view_at(0.5, 0.5, 1e-12), 1.0, 1.0, 20), 20);
    }

    #[test]
    fn wanted_set_carries_full_ancestor_chains_coarse_first() {
        let view = view_at(0.1, 0.1, 0.05);
        let target = target_level(&view, 1.0, 1.0, 10);
        let wanted = wanted_tiles(&view, 1.0, target, false, 1024);

        assert_eq!(wanted[0], TileId::ROOT);
        for id in &wanted {
            if let Some(parent) = id.parent() {
                assert!(wanted.contains(&parent), "missing ancestor of {id}");
            }
        }
        for window in wanted.windows(2) {
            assert!(window[0].level <= window[1].level, "not coarse-first");
        }
        assert!(wanted.iter().any(|id| id.level == target));
    }

    #[test]
    fn single_level_mode_keeps_only_the_target_level() {
        let view = view_at(0.5, 0.5, 0.1);
        let target = target_level(&view, 1.0, 1.0, 10);
        assert!(target > 0);
        let wanted = wanted_tiles(&view, 1.0, target, true, 1024);
        assert!(!wanted.is_empty());
        assert!(wanted.iter().all(|id| id.level == target));
    }

    #[test]
    fn truncation_sheds_fine_detail_not_fallbacks() {
        let view = view_at(0.5, 0.5, 0.02);
        let target = target_level(&view, 1.0, 1.0, 10);
        let full = wanted_tiles(&view, 1.0, target, false, usize::MAX);
        let capped = wanted_tiles(&view, 1.0, target, false, 8);

        assert!(full.len() > 8);
        assert_eq!(capped.len(), 8);
        assert_eq!(capped[0], TileId::ROOT);
        for id in &capped {
            if let Some(parent) = id.parent() {
                assert!(capped.contains(&parent), "truncation broke a chain");
            }
        }
    }

    #[test]
    fn importance_prefers_coarse_and_near() {
        let view = view_at(0.25, 0.25, 0.1);
        let parent = TileId::new(1, 0, 0);
        let child = parent.children()[0];
        assert!(tile_importance(&view, parent, 1.0) > tile_importance(&view, child, 1.0));

        let near = TileId::new(2, 1, 1);
        let far = TileId::new(2, 3, 3);
        assert!(tile_importance(&view, near, 1.0) > tile_importance(&view, far, 1.0));
    }
}

//! End-to-end threaded tests: real layer thread, real worker-pool
//! source, camera driven from the test thread.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::{
    LayerThread, LayerThreadConfig, PagingSnapshot, ProceduralSource, ProceduralSourceConfig,
    QuadTileHandle, QuadTileLayer, QuadTileLayerConfig, TileId, ViewState, WatcherCadence,
};

fn eager_layer_config() -> QuadTileLayerConfig {
    QuadTileLayerConfig {
        cadence: WatcherCadence {
            min_period: Duration::ZERO,
            max_lag: Duration::ZERO,
        },
        ..QuadTileLayerConfig::default()
    }
}

/// Poll until no tracked tile is loading anymore.
fn settle(quad: &QuadTileHandle) -> PagingSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = quad.snapshot().expect("layer installed");
        if !snapshot.tiles.is_empty() && snapshot.tiles.iter().all(|tile| !tile.is_loading) {
            return snapshot;
        }
        if Instant::now() > deadline {
            panic!(
                "paging never settled: {} tiles, {} still loading",
                snapshot.tiles.len(),
                snapshot.tiles.iter().filter(|tile| tile.is_loading).count()
            );
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// No gaps, no overlap: along the path above every frontier leaf with
/// any completed load, exactly one tile is enabled.
fn assert_frontier_consistent(snapshot: &PagingSnapshot) {
    let by_id: HashMap<TileId, _> = snapshot.tiles.iter().map(|tile| (tile.id, tile)).collect();
    for tile in &snapshot.tiles {
        if tile.enabled {
            let mut cursor = tile.id.parent();
            while let Some(ancestor) = cursor {
                if let Some(above) = by_id.get(&ancestor) {
                    assert!(
                        !above.enabled,
                        "{} and its ancestor {} are both enabled",
                        tile.id, ancestor
                    );
                }
                cursor = ancestor.parent();
            }
        }
        let is_frontier_leaf = tile
            .id
            .children()
            .iter()
            .all(|child| !by_id.contains_key(child));
        if !is_frontier_leaf {
            continue;
        }
        let mut enabled_on_path = 0;
        let mut any_loaded = false;
        let mut cursor = Some(tile.id);
        while let Some(id) = cursor {
            if let Some(node) = by_id.get(&id) {
                enabled_on_path += usize::from(node.enabled);
                any_loaded |= node.did_load;
            }
            cursor = id.parent();
        }
        if any_loaded {
            assert_eq!(enabled_on_path, 1, "gap or overlap above {}", tile.id);
        }
    }
}

#[test]
fn camera_dive_settles_into_a_consistent_frontier() {
    let mut thread = LayerThread::spawn(LayerThreadConfig::default());
    let (source, workers) = ProceduralSource::spawn(ProceduralSourceConfig {
        min_zoom: 0,
        max_zoom: 8,
        workers: 2,
        max_latency: Duration::from_millis(5),
        failure_modulus: 0,
    });
    let quad = QuadTileLayer::install(&thread, source, eager_layer_config());
    let handle = thread.handle();

    for height in [0.8, 0.4, 0.2] {
        handle.update_view(ViewState::new(0.5, 0.5, height, 0.0).expect("valid view"));
    }
    let snapshot = settle(&quad);

    assert!(snapshot.tiles.iter().any(|tile| tile.id.level >= 2));
    assert_frontier_consistent(&snapshot);

    let scene_enabled = handle
        .query(|core| core.scene().enabled_count())
        .expect("thread running");
    let frontier_objects: usize = snapshot.enabled().map(|tile| tile.object_count).sum();
    assert_eq!(
        scene_enabled, frontier_objects,
        "scene visibility mirrors the paging frontier"
    );

    thread.shutdown();
    for worker in workers {
        let _ = worker.join();
    }
}

#[test]
fn synthetic_failures_fall_back_to_coarser_tiles() {
    let mut thread = LayerThread::spawn(LayerThreadConfig::default());
    let (source, workers) = ProceduralSource::spawn(ProceduralSourceConfig {
        min_zoom: 0,
        max_zoom: 8,
        workers: 2,
        max_latency: Duration::from_millis(5),
        failure_modulus: 5,
    });
    let quad = QuadTileLayer::install(&thread, source, eager_layer_config());
    let handle = thread.handle();

    handle.update_view(ViewState::new(0.4, 0.6, 0.1, 0.0).expect("valid view"));
    let snapshot = settle(&quad);

    assert!(
        snapshot.stats.fetches_failed > 0,
        "the failure modulus should have bitten at this tile count"
    );
    // Failures are terminal, never gaps: the frontier stays covered.
    assert_frontier_consistent(&snapshot);

    thread.shutdown();
    for worker in workers {
        let _ = worker.join();
    }
}

#[test]
fn shutdown_with_fetches_in_flight_stays_clean() {
    let mut thread = LayerThread::spawn(LayerThreadConfig::default());
    let (source, workers) = ProceduralSource::spawn(ProceduralSourceConfig {
        min_zoom: 0,
        max_zoom: 10,
        workers: 2,
        max_latency: Duration::from_millis(40),
        failure_modulus: 0,
    });
    let quad = QuadTileLayer::install(&thread, source, eager_layer_config());
    let handle = thread.handle();

    handle.update_view(ViewState::new(0.5, 0.5, 0.05, 0.0).expect("valid view"));
    // Tear down while the pool is still answering; late completions must
    // land as no-ops against the invalidated thread.
    thread.shutdown();

    assert!(quad.snapshot().is_none());
    assert!(!handle.is_valid());
    for worker in workers {
        let _ = worker.join();
    }
}

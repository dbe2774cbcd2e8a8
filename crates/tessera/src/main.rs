//! Demo: a camera dive over a procedurally generated tile pyramid.
//!
//! Spawns the layer thread, installs a quad tile layer backed by the
//! worker-pool source, then flies the camera from orbit height down to
//! street level while printing what the pager is doing. No window, no
//! GPU: the "scene" is the bookkeeping arena, which is exactly the part
//! this workspace owns.

use std::thread;
use std::time::Duration;

use tessera::{
    LayerThread, LayerThreadConfig, ProceduralSource, ProceduralSourceConfig, QuadTileLayer,
    QuadTileLayerConfig, ViewState,
};

fn main() {
    env_logger::init();

    let mut thread = LayerThread::spawn(LayerThreadConfig::default());
    let handle = thread.handle();

    let (source, fetch_workers) = ProceduralSource::spawn(ProceduralSourceConfig {
        min_zoom: 1,
        max_zoom: 12,
        workers: 3,
        max_latency: Duration::from_millis(25),
        failure_modulus: 41,
    });
    let quad = QuadTileLayer::install(&thread, source, QuadTileLayerConfig::default());

    eprintln!("[demo] diving from height 1.0 to 0.002 over the tile pyramid");
    let steps = 60u32;
    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        // Exponential descent: one quadtree level roughly every few steps.
        let height = 1.0 * (0.002f64 / 1.0).powf(t);
        let center_x = 0.3 + 0.4 * t;
        let center_y = 0.5;
        let view = ViewState::new(center_x, center_y, height, 0.0).expect("valid demo view");
        handle.update_view(view);

        if step % 10 == 0 {
            report(&quad, height);
        }
        thread::sleep(Duration::from_millis(50));
    }

    // Let the last fetches settle before the teardown snapshot.
    thread::sleep(Duration::from_millis(300));
    report(&quad, 0.002);

    thread.shutdown();
    for worker in fetch_workers {
        let _ = worker.join();
    }
    eprintln!("[demo] shut down cleanly");
}

fn report(quad: &tessera::QuadTileHandle, height: f64) {
    let Some(snapshot) = quad.snapshot() else {
        return;
    };
    let loading = snapshot.tiles.iter().filter(|t| t.is_loading).count();
    let enabled = snapshot.enabled().count();
    let deepest = snapshot.tiles.iter().map(|t| t.id.level).max().unwrap_or(0);
    eprintln!(
        "[demo] height {height:.4}: {} tracked, {loading} loading, {enabled} on screen, deepest level {deepest}, {} fetches ({} failed)",
        snapshot.tiles.len(),
        snapshot.stats.fetches_dispatched,
        snapshot.stats.fetches_failed,
    );
}

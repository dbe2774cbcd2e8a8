//! A self-contained tile source that synthesizes its payloads.
//!
//! Fetches are handed to a small worker pool which sleeps a
//! deterministic per-tile latency, builds a tiny procedural texture, and
//! answers through the sink from the worker thread. A configurable
//! fraction of tiles fails deterministically, which exercises the
//! parent-fallback path without any network in sight.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use scene_protocol::TextureData;
use tile_model::TileId;

use paging::{TileData, TileFetchSink, TileGeometry, TileSource};

#[derive(Debug, Clone)]
pub struct ProceduralSourceConfig {
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub workers: usize,
    /// Upper bound on the synthetic per-fetch latency.
    pub max_latency: Duration,
    /// One in `failure_modulus` tiles fails; 0 disables failures.
    pub failure_modulus: u64,
}

impl Default for ProceduralSourceConfig {
    fn default() -> Self {
        ProceduralSourceConfig {
            min_zoom: 0,
            max_zoom: 18,
            workers: 2,
            max_latency: Duration::from_millis(30),
            failure_modulus: 0,
        }
    }
}

struct FetchJob {
    sink: TileFetchSink,
    id: TileId,
    frame: i32,
}

pub struct ProceduralSource {
    config: ProceduralSourceConfig,
    jobs: Sender<FetchJob>,
}

impl ProceduralSource {
    /// Build the source and its worker pool. The pool drains on its own
    /// once the source is dropped; join the returned handles to wait for
    /// that.
    pub fn spawn(config: ProceduralSourceConfig) -> (ProceduralSource, Vec<JoinHandle<()>>) {
        let (jobs, job_receiver) = unbounded::<FetchJob>();
        let workers = (0..config.workers.max(1))
            .map(|index| {
                let receiver = job_receiver.clone();
                let config = config.clone();
                thread::Builder::new()
                    .name(format!("tile-fetch-{index}"))
                    .spawn(move || fetch_worker(receiver, config))
                    .expect("failed to spawn fetch worker")
            })
            .collect();
        (ProceduralSource { config, jobs }, workers)
    }
}

impl TileSource for ProceduralSource {
    fn min_zoom(&self) -> u32 {
        self.config.min_zoom
    }

    fn max_zoom(&self) -> u32 {
        self.config.max_zoom
    }

    fn start_fetch(&mut self, sink: TileFetchSink, id: TileId, frame: i32) {
        let job = FetchJob { sink, id, frame };
        if let Err(returned) = self.jobs.send(job) {
            // Pool already gone; answer the contract anyway.
            let job = returned.0;
            job.sink.tile_failed_to_load(job.id, job.frame);
        }
    }
}

fn fetch_worker(receiver: Receiver<FetchJob>, config: ProceduralSourceConfig) {
    while let Ok(job) = receiver.recv() {
        let mix = scramble(job.id, job.frame);
        if !config.max_latency.is_zero() {
            let span = config.max_latency.as_millis().max(1) as u64;
            thread::sleep(Duration::from_millis(mix % span));
        }
        let failed = config.failure_modulus != 0 && mix % config.failure_modulus == 0;
        if failed {
            log::debug!("synthetic failure for {}", job.id);
            job.sink.loaded_tile(job.id, job.frame, None);
        } else {
            let data = TileData::new(vec![TileGeometry::textured(checker_texture(job.id))]);
            job.sink.loaded_tile(job.id, job.frame, Some(data));
        }
    }
}

fn scramble(id: TileId, frame: i32) -> u64 {
    let mut value = id.pack().raw() ^ ((frame as u64) << 59);
    // Fibonacci hashing constant; spreads the packed bits well enough.
    value = value.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    value ^ (value >> 31)
}

/// An 8x8 RGBA checkerboard tinted by the tile's coordinates, so a
/// renderer (or a human) can tell tiles apart at a glance.
fn checker_texture(id: TileId) -> TextureData {
    const EDGE: u32 = 8;
    let tint = (scramble(id, -1) & 0xff) as u8;
    let mut bytes = Vec::with_capacity((EDGE * EDGE * 4) as usize);
    for y in 0..EDGE {
        for x in 0..EDGE {
            let dark = (x + y) % 2 == 0;
            let base = if dark { 64 } else { 192 };
            bytes.extend_from_slice(&[base, base.wrapping_add(tint), base, 255]);
        }
    }
    TextureData {
        width: EDGE,
        height: EDGE,
        bytes: Arc::from(bytes.into_boxed_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::{checker_texture, scramble};
    use tile_model::TileId;

    #[test]
    fn scramble_is_deterministic_and_frame_sensitive() {
        let id = TileId::new(3, 2, 5);
        assert_eq!(scramble(id, 0), scramble(id, 0));
        assert_ne!(scramble(id, 0), scramble(id, 1));
        assert_ne!(scramble(id, 0), scramble(TileId::new(3, 2, 6), 0));
    }

    #[test]
    fn checker_texture_is_full_rgba() {
        let texture = checker_texture(TileId::ROOT);
        assert_eq!(texture.width, 8);
        assert_eq!(texture.height, 8);
        assert_eq!(texture.bytes.len(), 8 * 8 * 4);
    }
}

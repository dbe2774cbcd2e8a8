//! The tile source contract and its callback surface.
//!
//! A source is handed a [`TileFetchSink`] with every fetch and must
//! eventually answer through it, from whatever thread it likes: the sink
//! marshals every call onto the layer thread before any shared state is
//! touched. Answers for tiles the camera has since abandoned are
//! discarded there, so sources never need to coordinate with unloads.

use scene_protocol::TextureData;
use tile_model::TileId;

use layer_thread::{LayerKey, LayerThreadCore, LayerThreadHandle};

use crate::layer::QuadTileLayer;

/// One drawable group built by a source for a tile.
#[derive(Debug, Clone)]
pub struct TileGeometry {
    pub texture: Option<TextureData>,
}

impl TileGeometry {
    pub fn untextured() -> Self {
        TileGeometry { texture: None }
    }

    pub fn textured(texture: TextureData) -> Self {
        TileGeometry {
            texture: Some(texture),
        }
    }
}

/// Renderable payload for one tile (one frame's worth).
#[derive(Debug, Clone, Default)]
pub struct TileData {
    pub objects: Vec<TileGeometry>,
}

impl TileData {
    pub fn new(objects: Vec<TileGeometry>) -> Self {
        TileData { objects }
    }
}

/// Producer of tile payloads for a paging layer.
///
/// `start_fetch` is fire-and-forget: the layer never blocks on it, and
/// the implementation must eventually call exactly one of
/// [`TileFetchSink::tile_did_load`] / [`TileFetchSink::tile_failed_to_load`]
/// for the given `(id, frame)`, usually after handing the payload to
/// [`TileFetchSink::add_data`]. Failures are terminal for the attempt;
/// retry policy, if any, lives in the source.
pub trait TileSource: Send + 'static {
    fn min_zoom(&self) -> u32;

    fn max_zoom(&self) -> u32;

    /// `frame` is -1 for single-image sources, otherwise the animation
    /// frame index being requested.
    fn start_fetch(&mut self, sink: TileFetchSink, id: TileId, frame: i32);
}

/// Callback surface a source answers through. Cloneable and safe to call
/// from any thread.
#[derive(Clone)]
pub struct TileFetchSink {
    handle: LayerThreadHandle,
    layer: LayerKey,
}

impl TileFetchSink {
    pub(crate) fn new(handle: LayerThreadHandle, layer: LayerKey) -> Self {
        TileFetchSink { handle, layer }
    }

    /// Convenience for the common fetch shape: payload present means the
    /// tile loaded, absent means the attempt failed.
    pub fn loaded_tile(&self, id: TileId, frame: i32, data: Option<TileData>) {
        match data {
            Some(data) => {
                self.add_data(data, id);
                self.tile_did_load(id, frame);
            }
            None => self.tile_failed_to_load(id, frame),
        }
    }

    /// Hand over built geometry for `id`, ahead of its load confirmation.
    /// Dropped (not displayed) when the tile is no longer tracked.
    pub fn add_data(&self, data: TileData, id: TileId) {
        self.dispatch(move |layer, ctx| layer.on_add_data(data, id, ctx));
    }

    pub fn tile_did_load(&self, id: TileId, frame: i32) {
        self.dispatch(move |layer, ctx| layer.on_tile_did_load(id, frame, ctx));
    }

    pub fn tile_failed_to_load(&self, id: TileId, frame: i32) {
        self.dispatch(move |layer, ctx| layer.on_tile_failed_to_load(id, frame, ctx));
    }

    fn dispatch(
        &self,
        f: impl FnOnce(&mut QuadTileLayer, &mut LayerThreadCore) + Send + 'static,
    ) {
        let layer = self.layer;
        // Dropped silently once the layer or its thread is gone; late
        // completions have nowhere meaningful to land anyway.
        self.handle.run(move |core| {
            core.with_layer::<QuadTileLayer, _>(layer, f);
        });
    }
}

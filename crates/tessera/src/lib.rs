//! Tessera: quadtree tile paging over a dedicated layer thread.
//!
//! One crate per concern underneath; this facade re-exports the public
//! surface and ships a procedural tile source useful for demos and
//! soak-style tests.
//!
//! The shape of a session:
//!
//! 1. [`LayerThread::spawn`] starts the worker that owns the scene.
//! 2. [`QuadTileLayer::install`] registers a paging layer backed by your
//!    [`TileSource`].
//! 3. The render loop feeds camera snapshots to
//!    [`LayerThreadHandle::update_view`]; the layer pages tiles in and
//!    out and keeps the displayed frontier consistent.
//! 4. Dropping (or shutting down) the [`LayerThread`] releases
//!    everything, blocking until the worker has drained.

mod procedural;

#[cfg(test)]
mod threaded_tests;

pub use layer_thread::{
    Layer, LayerKey, LayerThread, LayerThreadConfig, LayerThreadCore, LayerThreadHandle, WatcherKey,
};
pub use paging::{
    PagingSnapshot, PagingStats, QuadTileHandle, QuadTileLayer, QuadTileLayerConfig, TileData,
    TileFetchSink, TileGeometry, TileSnapshot, TileSource,
};
pub use scene_protocol::{
    ChangeOp, ChangeSet, EMPTY_IDENTITY, EmptyIdentity, Scene, SceneObject, SceneObjectId,
    TextureData, TextureId,
};
pub use tile_model::{MAX_LEVEL, PackedTileKey, Quadrant, TileId};
pub use view::{ViewState, ViewStateError, WatcherCadence};

pub use crate::procedural::{ProceduralSource, ProceduralSourceConfig};

//! Quadtree tile paging over a layer thread.
//!
//! The layer tracks which tiles are wanted, loading, loaded, or gone;
//! asks a [`TileSource`] for the ones it lacks (bounded and in screen
//! importance order); and keeps the displayed frontier gap-free and
//! overlap-free while loads complete out of order. All of its state is
//! confined to the layer thread; the source answers through a sink that
//! marshals from whatever thread the fetch finished on.

mod evaluate;
mod fetch;
mod layer;
mod loaded_tile;
mod source;
mod visibility;


pub use crate::layer::{PagingSnapshot, QuadTileHandle, QuadTileLayer, QuadTileLayerConfig};
pub use crate::loaded_tile::{LoadedTile, PagingStats, TileSnapshot};
pub use crate::source::{TileData, TileFetchSink, TileGeometry, TileSource};

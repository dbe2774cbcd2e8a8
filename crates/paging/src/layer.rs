//! The quad tile layer: logical load/visibility state for one quadtree,
//! bridged to an external [`TileSource`].
//!
//! One parameterized core serves both plain paging and image-pyramid
//! use: frame fan-out, single-level mode, and the row-numbering
//! convention are all configuration. Every method here runs on the layer
//! thread; cross-thread callers arrive via [`TileFetchSink`] or
//! [`QuadTileHandle`], which marshal first.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use scene_protocol::{ChangeOp, ChangeSet, EmptyIdentity, SceneObject, SceneObjectId, TextureId};
use tile_model::TileId;
use view::{ViewState, WatcherCadence};

use layer_thread::{Layer, LayerKey, LayerThread, LayerThreadCore, LayerThreadHandle};

use crate::evaluate::{target_level, tile_importance, wanted_tiles};
use crate::fetch::FetchQueue;
use crate::loaded_tile::{LoadedTile, PagingStats, TileSnapshot};
use crate::source::{TileData, TileFetchSink, TileSource};
use crate::visibility::evaluate_from;

#[derive(Debug, Clone)]
pub struct QuadTileLayerConfig {
    /// World span of the level-0 tile, in map units.
    pub extent: f64,
    /// Scales how soon descent stops; larger means coarser tiles suffice.
    pub detail_cutoff: f64,
    /// Animation frames per tile. 1 means single-image fetches (frame -1).
    pub image_depth: u32,
    /// Load and show only the target level; no ancestor fallbacks.
    pub single_level: bool,
    /// Row-numbering convention of the source. Applied at the source
    /// boundary in both directions, never baked into internal state.
    pub flip_y: bool,
    /// Outstanding fetch budget.
    pub max_in_flight: usize,
    /// Hard cap on tracked tiles per evaluation.
    pub max_tiles: usize,
    /// How often this layer wants to hear about view changes.
    pub cadence: WatcherCadence,
    /// Camera jitter below this re-uses the previous evaluation.
    pub view_tolerance: f64,
}

impl Default for QuadTileLayerConfig {
    fn default() -> Self {
        QuadTileLayerConfig {
            extent: 1.0,
            detail_cutoff: 1.0,
            image_depth: 1,
            single_level: false,
            flip_y: false,
            max_in_flight: 8,
            max_tiles: 256,
            cadence: WatcherCadence::default(),
            view_tolerance: 0.0,
        }
    }
}

impl QuadTileLayerConfig {
    fn validate(&self) {
        if self.extent <= 0.0 || !self.extent.is_finite() {
            panic!("quad tile layer extent must be positive and finite");
        }
        if self.detail_cutoff <= 0.0 || !self.detail_cutoff.is_finite() {
            panic!("quad tile layer detail cutoff must be positive and finite");
        }
        if self.image_depth == 0 || self.image_depth > 64 {
            panic!(
                "quad tile layer image depth must be in 1..=64, got {}",
                self.image_depth
            );
        }
        if self.max_in_flight == 0 {
            panic!("quad tile layer needs an in-flight budget of at least 1");
        }
        if self.max_tiles == 0 {
            panic!("quad tile layer needs a tile budget of at least 1");
        }
    }
}

/// Point-in-time copy of a layer's entire paging state.
#[derive(Debug, Clone)]
pub struct PagingSnapshot {
    /// Sorted by tile id (coarse first).
    pub tiles: Vec<TileSnapshot>,
    pub stats: PagingStats,
}

impl PagingSnapshot {
    pub fn tile(&self, id: TileId) -> Option<&TileSnapshot> {
        self.tiles.iter().find(|tile| tile.id == id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TileSnapshot> {
        self.tiles.iter().filter(|tile| tile.enabled)
    }
}

pub struct QuadTileLayer {
    config: QuadTileLayerConfig,
    source: Box<dyn TileSource>,
    min_zoom: u32,
    max_zoom: u32,
    tiles: HashMap<TileId, LoadedTile>,
    queue: FetchQueue,
    /// Source-dispatched fetches that have not answered yet, in internal
    /// coordinates. Entries survive unloads: the slot stays spent until
    /// the (possibly stale) answer arrives.
    outstanding: HashSet<(TileId, i32)>,
    sink: Option<TileFetchSink>,
    last_view: Option<ViewState>,
    stats: PagingStats,
    valid: bool,
}

impl QuadTileLayer {
    pub fn new(source: impl TileSource, config: QuadTileLayerConfig) -> Self {
        config.validate();
        let min_zoom = source.min_zoom();
        let max_zoom = source.max_zoom();
        QuadTileLayer {
            config,
            source: Box::new(source),
            min_zoom,
            max_zoom,
            tiles: HashMap::new(),
            queue: FetchQueue::new(),
            outstanding: HashSet::new(),
            sink: None,
            last_view: None,
            stats: PagingStats::default(),
            valid: true,
        }
    }

    /// Register a new layer on `thread` and hand back its control handle.
    pub fn install(
        thread: &LayerThread,
        source: impl TileSource,
        config: QuadTileLayerConfig,
    ) -> QuadTileHandle {
        let key = thread.add_layer(QuadTileLayer::new(source, config));
        QuadTileHandle {
            handle: thread.handle(),
            layer: key,
        }
    }

    /// Translate between internal and source tile coordinates. The flip
    /// is an involution, so one function serves both directions.
    fn source_space(&self, id: TileId) -> TileId {
        if self.config.flip_y { id.flipped_y() } else { id }
    }

    // ---- view evaluation ------------------------------------------------

    fn evaluate_view(&mut self, view: &ViewState, ctx: &mut LayerThreadCore) {
        if !self.valid {
            return;
        }
        if let Some(last) = &self.last_view {
            if view.roughly_equals(last, self.config.view_tolerance) {
                return;
            }
        }
        self.last_view = Some(*view);

        let target = target_level(
            view,
            self.config.extent,
            self.config.detail_cutoff,
            self.max_zoom,
        );
        let wanted = wanted_tiles(
            view,
            self.config.extent,
            target,
            self.config.single_level,
            self.config.max_tiles,
        );
        let wanted_set: HashSet<TileId> = wanted.iter().copied().collect();

        let stale: Vec<TileId> = self
            .tiles
            .keys()
            .filter(|id| !wanted_set.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.unload_tile(id, ctx);
        }

        // Coarse first: the fallback chain fills in ahead of the detail.
        for id in wanted {
            self.start_fetch_for_tile(id, ctx);
        }
        log::debug!(
            "view evaluated: target level {target}, {} tracked, {} queued",
            self.tiles.len(),
            self.queue.len()
        );
    }

    // ---- tile lifecycle -------------------------------------------------

    pub(crate) fn start_fetch_for_tile(&mut self, id: TileId, ctx: &mut LayerThreadCore) {
        if !self.valid || self.tiles.contains_key(&id) {
            // Already tracked: a racing evaluation pass asked twice.
            return;
        }
        self.tiles.insert(id, LoadedTile::new(id));

        if id.level < self.min_zoom {
            // Below the source's range there is nothing to fetch; the
            // node is vacuously loaded so the frontier can pass through.
            self.stats.vacuous_loads += 1;
            self.finish_tile_load(id, ctx);
            return;
        }

        let importance = match &self.last_view {
            Some(view) => tile_importance(view, id, self.config.extent),
            None => 0.0,
        };
        if self.config.image_depth == 1 {
            self.queue.push(id, -1, importance);
        } else {
            for frame in 0..self.config.image_depth {
                self.queue.push(id, frame as i32, importance);
            }
        }
        self.pump_fetches();
    }

    pub(crate) fn unload_tile(&mut self, id: TileId, ctx: &mut LayerThreadCore) {
        let Some(mut tile) = self.tiles.remove(&id) else {
            return;
        };
        self.stats.tiles_unloaded += 1;
        let mut changes = ChangeSet::new();
        tile.release_into(&mut changes);
        ctx.add_changes(changes);
        // A sibling's disappearance can force the parent back on.
        self.apply_visibility(id.parent().unwrap_or(id), ctx);
    }

    fn pump_fetches(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        while self.outstanding.len() < self.config.max_in_flight {
            let Some(request) = self.queue.pop() else {
                break;
            };
            // Unloaded (or already resolved) while waiting in the queue.
            let still_wanted = self
                .tiles
                .get(&request.id)
                .is_some_and(|tile| tile.is_loading);
            if !still_wanted {
                continue;
            }
            self.outstanding.insert((request.id, request.frame));
            self.stats.fetches_dispatched += 1;
            let source_id = self.source_space(request.id);
            log::trace!("fetch dispatched for {source_id} frame {}", request.frame);
            self.source.start_fetch(sink.clone(), source_id, request.frame);
        }
    }

    // ---- source callbacks (already marshaled; ids in source space) ------

    pub(crate) fn on_add_data(
        &mut self,
        data: TileData,
        id: TileId,
        ctx: &mut LayerThreadCore,
    ) {
        let id = self.source_space(id);
        let Some(tile) = self.tiles.get_mut(&id) else {
            // Late arrival: the camera moved on and the tile was
            // unloaded. Nothing of it ever reached the scene, so the
            // payload is simply dropped.
            self.stats.stale_results_dropped += 1;
            log::trace!("dropped late payload for {id}");
            return;
        };
        let mut changes = ChangeSet::new();
        for geometry in data.objects {
            let texture = match geometry.texture {
                Some(texture) => {
                    let texture_id = TextureId::allocate();
                    changes.push(ChangeOp::AddTexture {
                        id: texture_id,
                        texture,
                    });
                    tile.textures.push(texture_id);
                    texture_id
                }
                None => TextureId::EMPTY,
            };
            let object_id = SceneObjectId::allocate();
            // New geometry always enters hidden; visibility flips it on
            // once the tile's place in the frontier is settled.
            changes.push(ChangeOp::AddObject {
                id: object_id,
                object: SceneObject {
                    enabled: false,
                    texture,
                },
            });
            tile.objects.push(object_id);
        }
        ctx.add_changes(changes);
    }

    pub(crate) fn on_tile_did_load(&mut self, id: TileId, frame: i32, ctx: &mut LayerThreadCore) {
        let id = self.source_space(id);
        self.outstanding.remove(&(id, frame));
        match self.tiles.get_mut(&id) {
            Some(tile) => {
                tile.mark_frame_loaded(frame);
                if tile.frames_complete(self.config.image_depth) {
                    self.finish_tile_load(id, ctx);
                }
            }
            None => {
                self.stats.stale_results_dropped += 1;
                log::trace!("dropped late load confirmation for {id}");
            }
        }
        self.pump_fetches();
    }

    pub(crate) fn on_tile_failed_to_load(
        &mut self,
        id: TileId,
        frame: i32,
        ctx: &mut LayerThreadCore,
    ) {
        let id = self.source_space(id);
        self.outstanding.remove(&(id, frame));
        if !self.tiles.contains_key(&id) {
            self.stats.stale_results_dropped += 1;
            self.pump_fetches();
            return;
        }
        self.stats.fetches_failed += 1;
        log::warn!("tile {id} failed to load; parent remains the fallback");
        // Terminal for this attempt: partial objects are torn down, the
        // node leaves the index, and only an explicit refresh retries it.
        self.unload_tile(id, ctx);
        self.pump_fetches();
    }

    fn finish_tile_load(&mut self, id: TileId, ctx: &mut LayerThreadCore) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        tile.did_load = true;
        tile.is_loading = false;

        if self.config.single_level {
            if !tile.enabled {
                tile.enabled = true;
                let mut changes = ChangeSet::new();
                for object in &tile.objects {
                    changes.push(ChangeOp::EnableObject { id: *object });
                }
                ctx.add_changes(changes);
            }
            return;
        }
        self.apply_visibility(id.parent().unwrap_or(id), ctx);
    }

    /// Re-run the frontier rule from `root` and emit the whole enable /
    /// disable transition as one batched change set.
    fn apply_visibility(&mut self, root: TileId, ctx: &mut LayerThreadCore) {
        let delta = evaluate_from(&mut self.tiles, root);
        if delta.is_empty() {
            return;
        }
        let mut changes = ChangeSet::new();
        for id in &delta.disable {
            if let Some(tile) = self.tiles.get(id) {
                for object in &tile.objects {
                    changes.push(ChangeOp::DisableObject { id: *object });
                }
            }
        }
        for id in &delta.enable {
            if let Some(tile) = self.tiles.get(id) {
                for object in &tile.objects {
                    changes.push(ChangeOp::EnableObject { id: *object });
                }
            }
        }
        ctx.add_changes(changes);
    }

    // ---- control --------------------------------------------------------

    pub(crate) fn refresh(&mut self, ctx: &mut LayerThreadCore) {
        if !self.valid {
            return;
        }
        log::debug!("refresh: discarding {} tracked tiles", self.tiles.len());
        self.remove_all_tiles(ctx);
        // Re-taking the snapshot forces a full evaluation even though the
        // camera has not moved.
        if let Some(view) = self.last_view.take() {
            self.evaluate_view(&view, ctx);
        }
    }

    fn remove_all_tiles(&mut self, ctx: &mut LayerThreadCore) {
        self.queue.clear();
        let mut changes = ChangeSet::new();
        for (_, mut tile) in self.tiles.drain() {
            tile.release_into(&mut changes);
        }
        ctx.add_changes(changes);
    }

    pub(crate) fn snapshot(&self) -> PagingSnapshot {
        let mut tiles: Vec<TileSnapshot> = self.tiles.values().map(TileSnapshot::of).collect();
        tiles.sort_by_key(|tile| tile.id);
        PagingSnapshot {
            tiles,
            stats: self.stats,
        }
    }
}

impl Layer for QuadTileLayer {
    fn startup(&mut self, ctx: &mut LayerThreadCore) {
        let key = ctx
            .active_layer_key()
            .expect("layer startup runs under dispatch");
        self.sink = Some(TileFetchSink::new(ctx.handle(), key));
        ctx.register_watcher(key, self.config.cadence);
        // A snapshot may already be current if the camera moved before
        // this layer was installed.
        if let Some(view) = ctx.current_view() {
            self.evaluate_view(&view, ctx);
        }
    }

    fn shutdown(&mut self, ctx: &mut LayerThreadCore) {
        self.remove_all_tiles(ctx);
        self.valid = false;
    }

    fn view_updated(&mut self, view: &ViewState, ctx: &mut LayerThreadCore) {
        self.evaluate_view(view, ctx);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Cross-thread control handle for one installed quad tile layer.
#[derive(Clone)]
pub struct QuadTileHandle {
    handle: LayerThreadHandle,
    layer: LayerKey,
}

impl QuadTileHandle {
    pub fn layer_key(&self) -> LayerKey {
        self.layer
    }

    /// Discard every tracked tile and rebuild the wanted set from the
    /// current camera. Safe from any thread: when called elsewhere the
    /// work is deferred onto the layer thread rather than run inline.
    pub fn refresh(&self) {
        let layer = self.layer;
        self.handle.run(move |core| {
            core.with_layer::<QuadTileLayer, _>(layer, |quad, ctx| quad.refresh(ctx));
        });
    }

    /// Blocking state query, for tools and tests. `None` once the layer
    /// or its thread is gone.
    pub fn snapshot(&self) -> Option<PagingSnapshot> {
        let layer = self.layer;
        self.handle
            .query(move |core| core.with_layer::<QuadTileLayer, _>(layer, |quad, _| quad.snapshot()))
            .flatten()
    }
}

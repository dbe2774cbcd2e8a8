//! Worker-side state and run loop.
//!
//! `LayerThreadCore` is owned exclusively by the worker thread, so none
//! of its fields need locks. Everything producers share with it goes
//! through the command channel or the pending-change accumulator in
//! `handle`.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use scene_protocol::{ChangeSet, Scene};
use slotmap::SlotMap;
use view::{ViewState, WatcherCadence};

use crate::handle::{LayerCommand, LayerThreadHandle, Shared, pop_local_task, push_local_task};
use crate::layer::{Layer, LayerKey, WatcherKey};

struct LayerSlot {
    // Empty while the layer is dispatched, which also rejects re-entrant
    // dispatch to the same layer.
    layer: Option<Box<dyn Layer>>,
}

struct WatcherEntry {
    layer: LayerKey,
    cadence: WatcherCadence,
    last_notified: Option<Instant>,
    pending: Option<Arc<ViewState>>,
    pending_since: Option<Instant>,
}

impl WatcherEntry {
    /// When the held trailing update must go out: the quiet window ends,
    /// or the update has aged past the watcher's lag tolerance.
    fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        let window_end = match self.last_notified {
            Some(last) => last + self.cadence.min_period,
            None => return Some(Instant::now()),
        };
        let lag_end = self
            .pending_since
            .map(|since| since + self.cadence.max_lag)
            .unwrap_or(window_end);
        Some(window_end.min(lag_end))
    }
}

/// State owned by the layer thread.
pub struct LayerThreadCore {
    shared: Arc<Shared>,
    scene: Scene,
    layers: SlotMap<LayerKey, LayerSlot>,
    watchers: SlotMap<WatcherKey, WatcherEntry>,
    active_layer: Option<LayerKey>,
    current_view: Option<Arc<ViewState>>,
    terminate_ack: Option<mpsc::Sender<()>>,
}

impl LayerThreadCore {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        LayerThreadCore {
            shared,
            scene: Scene::new(),
            layers: SlotMap::with_key(),
            watchers: SlotMap::with_key(),
            active_layer: None,
            current_view: None,
            terminate_ack: None,
        }
    }

    pub fn handle(&self) -> LayerThreadHandle {
        LayerThreadHandle::new(self.shared.clone())
    }

    /// Key of the layer currently being dispatched, if any.
    pub fn active_layer_key(&self) -> Option<LayerKey> {
        self.active_layer
    }

    pub fn current_view(&self) -> Option<Arc<ViewState>> {
        self.current_view.clone()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Same contract as [`LayerThreadHandle::add_changes`], but usable
    /// while the thread is tearing down (a shutting-down layer must
    /// still get its removals flushed).
    pub fn add_changes(&mut self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        if self.shared.merge_pending(changes) {
            // Always on the worker thread here, so the flush slots in
            // behind the running task and ahead of queued commands.
            push_local_task(Box::new(|core: &mut LayerThreadCore| {
                core.flush_changes();
            }));
        }
    }

    pub(crate) fn flush_changes(&mut self) {
        let changes = self.shared.take_pending();
        if changes.is_empty() {
            return;
        }
        log::trace!("flushing {} scene changes", changes.len());
        changes.process(&mut self.scene);
    }

    /// Subscribe `layer` to view updates at the given cadence.
    pub fn register_watcher(&mut self, layer: LayerKey, cadence: WatcherCadence) -> WatcherKey {
        self.watchers.insert(WatcherEntry {
            layer,
            cadence,
            last_notified: None,
            pending: None,
            pending_since: None,
        })
    }

    pub fn remove_watcher(&mut self, key: WatcherKey) {
        self.watchers.remove(key);
    }

    pub(crate) fn install_layer(&mut self, layer: Box<dyn Layer>) -> LayerKey {
        let key = self.layers.insert(LayerSlot { layer: Some(layer) });
        self.dispatch_dyn(key, |layer, core| layer.startup(core));
        key
    }

    /// Run `f` against the concrete layer behind `key`. Returns `None`
    /// when the key is stale, the layer is mid-dispatch, or the type
    /// does not match.
    pub fn with_layer<L, R>(
        &mut self,
        key: LayerKey,
        f: impl FnOnce(&mut L, &mut LayerThreadCore) -> R,
    ) -> Option<R>
    where
        L: Layer,
    {
        let mut result = None;
        self.dispatch_dyn(key, |layer, core| match layer.as_any_mut().downcast_mut() {
            Some(concrete) => result = Some(f(concrete, core)),
            None => log::warn!("layer type mismatch for {key:?}"),
        });
        result
    }

    fn dispatch_dyn(&mut self, key: LayerKey, f: impl FnOnce(&mut dyn Layer, &mut LayerThreadCore)) {
        let Some(slot) = self.layers.get_mut(key) else {
            return;
        };
        let Some(mut layer) = slot.layer.take() else {
            log::warn!("re-entrant dispatch to layer {key:?} skipped");
            return;
        };
        let previous = self.active_layer.replace(key);
        f(layer.as_mut(), self);
        self.active_layer = previous;
        if let Some(slot) = self.layers.get_mut(key) {
            slot.layer = Some(layer);
        }
    }

    pub(crate) fn shutdown_layers(&mut self) {
        let keys: Vec<LayerKey> = self.layers.keys().collect();
        for key in keys {
            self.dispatch_dyn(key, |layer, core| layer.shutdown(core));
        }
        self.layers.clear();
        self.watchers.clear();
        // Unconditional: a producer that lost the liveness race may have
        // left merged changes behind without a scheduled flush.
        self.flush_changes();
    }

    fn handle_view_update(&mut self, view: Arc<ViewState>) {
        self.current_view = Some(view.clone());
        let now = Instant::now();
        let mut notify_now = Vec::new();
        for (key, watcher) in self.watchers.iter_mut() {
            let due = match watcher.last_notified {
                None => true,
                Some(last) => now >= last + watcher.cadence.min_period,
            };
            if due {
                watcher.last_notified = Some(now);
                watcher.pending = None;
                watcher.pending_since = None;
                notify_now.push((key, watcher.layer));
            } else {
                // Inside the quiet window: hold as the single trailing
                // update, superseding whatever was held before.
                if watcher.pending.is_none() {
                    watcher.pending_since = Some(now);
                }
                watcher.pending = Some(view.clone());
            }
        }
        for (_, layer) in notify_now {
            let view = view.clone();
            self.dispatch_dyn(layer, |l, core| l.view_updated(&view, core));
        }
    }

    fn dispatch_due_watchers(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        for (key, watcher) in self.watchers.iter_mut() {
            let Some(deadline) = watcher.deadline() else {
                continue;
            };
            if deadline > now {
                continue;
            }
            let Some(view) = watcher.pending.take() else {
                continue;
            };
            watcher.pending_since = None;
            watcher.last_notified = Some(now);
            due.push((key, watcher.layer, view));
        }
        for (_, layer, view) in due {
            self.dispatch_dyn(layer, |l, core| l.view_updated(&view, core));
        }
    }

    fn next_watcher_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        self.watchers
            .values()
            .filter_map(WatcherEntry::deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn drain_local_tasks(&mut self) {
        while let Some(task) = pop_local_task() {
            task(self);
        }
    }
}

pub(crate) fn worker_loop(mut core: LayerThreadCore, receiver: Receiver<LayerCommand>) {
    loop {
        core.drain_local_tasks();

        if let Some(ack) = core.terminate_ack.take() {
            let _ = ack.send(());
            break;
        }

        let command = match core.next_watcher_timeout() {
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    core.dispatch_due_watchers();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            LayerCommand::Task(task) => task(&mut core),
            LayerCommand::ViewUpdate(view) => core.handle_view_update(view),
            LayerCommand::Terminate { ack } => core.terminate_ack = Some(ack),
        }
    }
    log::debug!("layer thread run loop exited");
}

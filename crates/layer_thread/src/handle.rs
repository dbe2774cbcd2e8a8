//! Cross-thread entry points into the layer thread.
//!
//! The handle is the only thing producers hold. Every method checks
//! thread identity and liveness before touching anything, so callers do
//! not need to know which thread they are on.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

use crossbeam_channel::Sender;
use scene_protocol::ChangeSet;
use view::ViewState;

use crate::runtime::LayerThreadCore;

pub type LayerTask = Box<dyn FnOnce(&mut LayerThreadCore) + Send>;

pub(crate) enum LayerCommand {
    Task(LayerTask),
    ViewUpdate(Arc<ViewState>),
    Terminate { ack: mpsc::Sender<()> },
}

/// Pending scene mutations, merged from every producer since the last
/// flush. `flush_scheduled` makes sure a burst of producers schedules
/// exactly one flush task between flushes.
#[derive(Default)]
pub(crate) struct PendingChanges {
    pub changes: ChangeSet,
    pub flush_scheduled: bool,
}

pub(crate) struct Shared {
    pub sender: Sender<LayerCommand>,
    pub valid: AtomicBool,
    worker_id: OnceLock<ThreadId>,
    pending: Mutex<PendingChanges>,
}

impl Shared {
    pub fn new(sender: Sender<LayerCommand>) -> Self {
        Shared {
            sender,
            valid: AtomicBool::new(true),
            worker_id: OnceLock::new(),
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    /// Called once, first thing, on the worker thread itself.
    pub fn adopt_current_thread(&self) {
        let _ = self.worker_id.set(thread::current().id());
    }

    pub fn on_layer_thread(&self) -> bool {
        self.worker_id.get() == Some(&thread::current().id())
    }

    /// Merge into the accumulator. Returns true when this caller turned
    /// the accumulator non-empty and therefore owes the flush task.
    pub fn merge_pending(&self, changes: ChangeSet) -> bool {
        let mut pending = self
            .pending
            .lock()
            .expect("pending change accumulator poisoned");
        pending.changes.merge(changes);
        if pending.flush_scheduled || pending.changes.is_empty() {
            return false;
        }
        pending.flush_scheduled = true;
        true
    }

    /// Swap out everything accumulated so far and re-arm scheduling.
    pub fn take_pending(&self) -> ChangeSet {
        let mut pending = self
            .pending
            .lock()
            .expect("pending change accumulator poisoned");
        pending.flush_scheduled = false;
        std::mem::take(&mut pending.changes)
    }
}

// Tasks submitted from the layer thread itself land here instead of the
// channel, and are drained before the next channel command. One queue
// per OS thread is enough: a thread hosts at most one layer-thread run
// loop.
thread_local! {
    static LOCAL_TASKS: RefCell<VecDeque<LayerTask>> = RefCell::new(VecDeque::new());
}

pub(crate) fn push_local_task(task: LayerTask) {
    LOCAL_TASKS.with(|queue| queue.borrow_mut().push_back(task));
}

pub(crate) fn pop_local_task() -> Option<LayerTask> {
    LOCAL_TASKS.with(|queue| queue.borrow_mut().pop_front())
}

/// Cloneable entry point to one layer thread.
#[derive(Clone)]
pub struct LayerThreadHandle {
    shared: Arc<Shared>,
}

impl LayerThreadHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        LayerThreadHandle { shared }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::SeqCst)
    }

    pub fn on_layer_thread(&self) -> bool {
        self.shared.on_layer_thread()
    }

    /// Submit `task`, running it this tick when the caller is already the
    /// layer thread (after the task currently executing, before anything
    /// queued from other threads). Returns false if the thread is no
    /// longer accepting work.
    pub fn run(&self, task: impl FnOnce(&mut LayerThreadCore) + Send + 'static) -> bool {
        if !self.is_valid() {
            return false;
        }
        if self.on_layer_thread() {
            push_local_task(Box::new(task));
            return true;
        }
        self.shared
            .sender
            .send(LayerCommand::Task(Box::new(task)))
            .is_ok()
    }

    /// Submit `task` to the back of the command queue even when called
    /// from the layer thread. Use when the task must wait behind work
    /// already queued.
    pub fn post(&self, task: impl FnOnce(&mut LayerThreadCore) + Send + 'static) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.shared
            .sender
            .send(LayerCommand::Task(Box::new(task)))
            .is_ok()
    }

    /// Merge `changes` into the pending accumulator. The first producer
    /// to make it non-empty schedules the single flush that applies the
    /// whole batch to the scene.
    pub fn add_changes(&self, changes: ChangeSet) {
        if changes.is_empty() || !self.is_valid() {
            return;
        }
        if self.shared.merge_pending(changes) {
            self.run(|core| core.flush_changes());
        }
    }

    /// Publish a new camera snapshot. Watchers see it on their own
    /// cadence; a snapshot arriving inside a watcher's quiet window
    /// supersedes the one waiting there.
    pub fn update_view(&self, view: ViewState) {
        if !self.is_valid() {
            return;
        }
        let _ = self
            .shared
            .sender
            .send(LayerCommand::ViewUpdate(Arc::new(view)));
    }

    /// Run `f` on the layer thread and block for its result. Read-only
    /// by convention; used by tools and tests. Returns `None` once the
    /// thread is shutting down.
    pub fn query<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut LayerThreadCore) -> R + Send + 'static,
    {
        assert!(
            !self.on_layer_thread(),
            "query would deadlock when called from the layer thread"
        );
        let (result_sender, result_receiver) = mpsc::channel();
        let posted = self.post(move |core| {
            let _ = result_sender.send(f(core));
        });
        if !posted {
            return None;
        }
        result_receiver.recv().ok()
    }
}

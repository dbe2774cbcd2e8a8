//! The layer thread: one dedicated worker that owns every mutation of
//! the scene and of the layers registered on it.
//!
//! Producers on other threads (render loop, fetch callbacks) never touch
//! shared state directly. They hand closures to a [`LayerThreadHandle`],
//! which either queues them onto the worker's command channel or, when
//! the caller is already the worker, onto a local queue drained before
//! the channel. Scene mutations ride separately as [`ChangeSet`] batches
//! merged into one pending accumulator and flushed as a unit.

mod handle;
mod layer;
mod runtime;


use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::unbounded;

pub use crate::handle::{LayerTask, LayerThreadHandle};
pub use crate::layer::{Layer, LayerKey, WatcherKey};
pub use crate::runtime::LayerThreadCore;

use crate::handle::{LayerCommand, Shared};
use crate::runtime::worker_loop;

#[derive(Debug, Clone)]
pub struct LayerThreadConfig {
    pub thread_name: String,
}

impl Default for LayerThreadConfig {
    fn default() -> Self {
        LayerThreadConfig {
            thread_name: "layer-thread".to_string(),
        }
    }
}

/// Owner of one layer thread. Dropping it (or calling [`shutdown`])
/// tears the worker down; `shutdown` blocks the calling thread until the
/// worker has drained its queue and exited.
///
/// [`shutdown`]: LayerThread::shutdown
pub struct LayerThread {
    handle: LayerThreadHandle,
    worker: Option<JoinHandle<()>>,
}

impl LayerThread {
    pub fn spawn(config: LayerThreadConfig) -> LayerThread {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared::new(sender));
        let handle = LayerThreadHandle::new(shared.clone());

        let worker_shared = shared;
        let worker = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || {
                worker_shared.adopt_current_thread();
                let core = LayerThreadCore::new(worker_shared);
                worker_loop(core, receiver);
            })
            .expect("failed to spawn layer thread");

        LayerThread {
            handle,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> LayerThreadHandle {
        self.handle.clone()
    }

    /// Register `layer` and run its `startup` on the layer thread.
    /// Blocks until registration completes so the key can be returned.
    pub fn add_layer(&self, layer: impl Layer) -> LayerKey {
        assert!(
            !self.handle.on_layer_thread(),
            "add_layer must be called from outside the layer thread"
        );
        let boxed: Box<dyn Layer> = Box::new(layer);
        let (key_sender, key_receiver) = mpsc::channel();
        let posted = self.handle.post(move |core| {
            let key = core.install_layer(boxed);
            let _ = key_sender.send(key);
        });
        if !posted {
            panic!("cannot add a layer to a layer thread that is shutting down");
        }
        key_receiver
            .recv()
            .expect("layer thread exited before registering layer")
    }

    /// Orderly teardown: every registered layer shuts down on the layer
    /// thread (releasing its resources into one final change set), the
    /// run loop terminates, and only then does this call return. Any
    /// mutation submitted through a handle after this starts is a
    /// silent no-op.
    pub fn shutdown(&mut self) {
        let shared = self.handle.shared();
        if shared.valid.swap(false, Ordering::SeqCst) {
            // Bypass the handle here: these two commands must still be
            // accepted after valid has flipped.
            let _ = shared.sender.send(LayerCommand::Task(Box::new(
                |core: &mut LayerThreadCore| core.shutdown_layers(),
            )));
            let (ack_sender, ack_receiver) = mpsc::channel();
            let _ = shared.sender.send(LayerCommand::Terminate { ack: ack_sender });
            // Blocks until the terminate command has actually executed,
            // i.e. the queue ahead of it has fully drained.
            let _ = ack_receiver.recv();
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .unwrap_or_else(|err| log::error!("layer thread panicked: {err:?}"));
        }
    }
}

impl Drop for LayerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

use std::any::Any;

use slotmap::new_key_type;
use view::ViewState;

use crate::runtime::LayerThreadCore;

new_key_type! {
    /// Registration key for a layer living on a layer thread.
    pub struct LayerKey;
}

new_key_type! {
    /// Registration key for a view watcher.
    pub struct WatcherKey;
}

/// A unit of behavior hosted by the layer thread. All three hooks run on
/// the layer thread; `ctx` is the thread's own state, so a layer may
/// emit changes, schedule tasks, or register itself as a view watcher
/// from any of them.
pub trait Layer: Any + Send {
    fn startup(&mut self, ctx: &mut LayerThreadCore);

    /// Release everything the layer owns, synchronously. Runs exactly
    /// once, ahead of the thread's own termination.
    fn shutdown(&mut self, ctx: &mut LayerThreadCore);

    fn view_updated(&mut self, view: &ViewState, ctx: &mut LayerThreadCore) {
        let _ = (view, ctx);
    }

    /// Concrete-type escape hatch for targeted dispatch.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

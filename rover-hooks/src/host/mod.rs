//! Contract consumed from the host event system.
//!
//! The host owns tick observers and signal emitters. It hands deliveries back
//! through [`Scripting::deliver_tick`](crate::Scripting::deliver_tick) and the
//! signal equivalents, and drops a registration when a delivery answers
//! [`Delivery::Unregister`].

pub mod stub;

use crate::record::{CallbackId, HandlerId};

pub use stub::StubHost;

/// What the host should do with a registration after delivering to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Keep,
    /// The callback is gone; drop the registration
    Unregister,
}

pub trait HostEvents: Send + Sync {
    /// Call `callback` on every frame until a delivery asks to unregister
    fn add_tick_callback(&self, callback: CallbackId);

    /// Deliver `signal` emitted by `handler` to `callback`
    fn connect(&self, handler: HandlerId, signal: &str, callback: CallbackId);

    /// Deliver every signal emitted by `handler` to `callback`
    fn connect_global(&self, handler: HandlerId, callback: CallbackId);
}

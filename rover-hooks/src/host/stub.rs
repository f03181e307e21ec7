use super::{Delivery, HostEvents};
use crate::Scripting;
use crate::record::{CallbackId, HandlerId};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
struct Connection {
    handler: HandlerId,
    /// `None` for global connections
    signal: Option<String>,
    callback: CallbackId,
}

/// In-memory host used by tests and the demo binary.
///
/// Registrations are kept in insertion order. Emission works on a snapshot, so
/// callbacks may connect or disconnect while a signal is being delivered, and no
/// internal lock is held while calling into [`Scripting`].
#[derive(Debug, Default)]
pub struct StubHost {
    ticks: Mutex<Vec<CallbackId>>,
    connections: Mutex<Vec<Connection>>,
}

impl StubHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every registered tick callback once
    pub fn run_tick_callbacks(&self, scripting: &Scripting, seconds: f32) {
        let snapshot = self.ticks.lock().clone();
        for callback in snapshot {
            if scripting.deliver_tick(callback, seconds) == Delivery::Unregister {
                self.ticks.lock().retain(|id| *id != callback);
            }
        }
    }

    /// Emit `signal` from `handler` to scoped and global connections.
    /// Returns the number of deliveries that reached a live callback.
    pub fn emit(
        &self,
        scripting: &Scripting,
        handler: HandlerId,
        signal: &str,
        calldata: &JsonValue,
    ) -> usize {
        let snapshot: Vec<Connection> = self
            .connections
            .lock()
            .iter()
            .filter(|conn| conn.handler == handler)
            .filter(|conn| conn.signal.as_deref().is_none_or(|name| name == signal))
            .cloned()
            .collect();

        let mut delivered = 0;
        for conn in snapshot {
            let outcome = match conn.signal {
                Some(_) => scripting.deliver_signal(conn.callback, calldata),
                None => scripting.deliver_global_signal(conn.callback, signal, calldata),
            };
            match outcome {
                Delivery::Keep => delivered += 1,
                Delivery::Unregister => self
                    .connections
                    .lock()
                    .retain(|existing| existing.callback != conn.callback),
            }
        }
        delivered
    }

    pub fn tick_callback_count(&self) -> usize {
        self.ticks.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl HostEvents for StubHost {
    fn add_tick_callback(&self, callback: CallbackId) {
        self.ticks.lock().push(callback);
    }

    fn connect(&self, handler: HandlerId, signal: &str, callback: CallbackId) {
        self.connections.lock().push(Connection {
            handler,
            signal: Some(signal.to_string()),
            callback,
        });
    }

    fn connect_global(&self, handler: HandlerId, callback: CallbackId) {
        self.connections.lock().push(Connection {
            handler,
            signal: None,
            callback,
        });
    }
}

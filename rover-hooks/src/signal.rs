//! Signal connections scoped to one `(handler, signal)` pair, and global
//! connections that receive every signal a handler emits.

use crate::error::Result;
use crate::host::Delivery;
use crate::lock::Frame;
use crate::record::{CallbackId, CallbackKind, CallbackRecord, Extra, HANDLER_KEY, HandlerId, SIGNAL_KEY};
use crate::script::ScriptId;
use crate::scripting::Scripting;
use mlua::{Function, LuaSerdeExt};
use serde_json::Value as JsonValue;

/// A scoped record matches only when both the handler and the signal name are equal
pub fn matches_scoped(record: &CallbackRecord, handler: HandlerId, signal: &str) -> bool {
    record.kind() == CallbackKind::Signal
        && record.extra().handler(HANDLER_KEY) == Some(handler)
        && record.extra().string(SIGNAL_KEY) == Some(signal)
}

pub fn matches_global(record: &CallbackRecord, handler: HandlerId) -> bool {
    record.kind() == CallbackKind::GlobalSignal && record.extra().handler(HANDLER_KEY) == Some(handler)
}

impl Scripting {
    /// Connect `func` to `signal` on `handler`
    pub fn connect(
        &self,
        script: ScriptId,
        handler: HandlerId,
        signal: &str,
        func: Function,
    ) -> Result<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let extra = Extra::new()
            .with_handler(HANDLER_KEY, handler)
            .with_str(SIGNAL_KEY, signal);
        let id = self.add_callback(script, func, CallbackKind::Signal, extra)?;
        self.inner.host.connect(handler, signal, id);
        Ok(id)
    }

    /// Disconnect the first connection of `script` with this handler, signal and function
    pub fn disconnect(
        &self,
        script: ScriptId,
        handler: HandlerId,
        signal: &str,
        func: &Function,
    ) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        match self.find_matching(script, func, |record| matches_scoped(record, handler, signal)) {
            Some(id) => self.remove_callback(id),
            None => false,
        }
    }

    /// Connect `func` to every signal `handler` emits
    pub fn connect_global(
        &self,
        script: ScriptId,
        handler: HandlerId,
        func: Function,
    ) -> Result<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let extra = Extra::new().with_handler(HANDLER_KEY, handler);
        let id = self.add_callback(script, func, CallbackKind::GlobalSignal, extra)?;
        self.inner.host.connect_global(handler, id);
        Ok(id)
    }

    pub fn disconnect_global(&self, script: ScriptId, handler: HandlerId, func: &Function) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        match self.find_matching(script, func, |record| matches_global(record, handler)) {
            Some(id) => self.remove_callback(id),
            None => false,
        }
    }

    /// Host entry point for a scoped connection; the callback gets the calldata
    pub fn deliver_signal(&self, id: CallbackId, calldata: &JsonValue) -> Delivery {
        let delivery = self.invoke(id, |lua, func| {
            let data = lua.to_value(calldata)?;
            func.call::<()>(data)
        });
        if delivery == Delivery::Unregister {
            self.free_callback(id);
        }
        delivery
    }

    /// Host entry point for a global connection; the callback gets the signal
    /// name followed by the calldata
    pub fn deliver_global_signal(&self, id: CallbackId, signal: &str, calldata: &JsonValue) -> Delivery {
        let delivery = self.invoke(id, |lua, func| {
            let data = lua.to_value(calldata)?;
            func.call::<()>((signal, data))
        });
        if delivery == Delivery::Unregister {
            self.free_callback(id);
        }
        delivery
    }
}

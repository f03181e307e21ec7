use crate::clock::{Clock, SystemClock};
use crate::config::ScriptingConfig;
use crate::error::{Result, ScriptingError};
use crate::host::{Delivery, HostEvents};
use crate::lock::{ExecutionLock, Frame};
use crate::pinned::{FunctionIdentity, PinnedFunction};
use crate::record::{CallbackId, CallbackKind, CallbackRecord, Extra};
use crate::registry::CallbackRegistry;
use crate::script::{ScriptHandle, ScriptId, ScriptState, global_function};
use crate::slot::SlotMap;
use crate::tick::TickList;
use crate::timer::TimerTable;
use mlua::{Function, Lua};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub(crate) struct Inner {
    pub(crate) config: ScriptingConfig,
    pub(crate) host: Arc<dyn HostEvents>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) lock: ExecutionLock,
    pub(crate) scripts: Mutex<SlotMap<ScriptHandle>>,
    pub(crate) registry: Mutex<CallbackRegistry>,
    pub(crate) timers: Mutex<TimerTable>,
    pub(crate) ticks: Mutex<TickList>,
    shut_down: AtomicBool,
}

/// Callback registry and dispatch scheduler for one host session.
///
/// Cheap to clone; every clone talks to the same session. All entry into Lua
/// (script chunks, hooks, callbacks) happens under the session's
/// [`ExecutionLock`]. The list locks (scripts, registry, timers, ticks) are
/// only held for bookkeeping and never while Lua code runs.
#[derive(Clone)]
pub struct Scripting {
    pub(crate) inner: Arc<Inner>,
}

/// Non-owning handle captured by the Lua API closures
#[derive(Clone)]
pub struct WeakScripting(Weak<Inner>);

impl WeakScripting {
    pub fn upgrade(&self) -> Option<Scripting> {
        self.0.upgrade().map(|inner| Scripting { inner })
    }
}

impl Scripting {
    pub fn new(host: Arc<dyn HostEvents>) -> Self {
        Self::with_clock(host, Arc::new(SystemClock::new()), ScriptingConfig::default())
    }

    pub fn with_clock(
        host: Arc<dyn HostEvents>,
        clock: Arc<dyn Clock>,
        config: ScriptingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                host,
                clock,
                lock: ExecutionLock::new(),
                scripts: Mutex::new(SlotMap::new()),
                registry: Mutex::new(CallbackRegistry::new()),
                timers: Mutex::new(TimerTable::new()),
                ticks: Mutex::new(TickList::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakScripting {
        WeakScripting(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Run one host frame: script entrypoints first, then the timer sweep
    pub fn tick(&self, seconds: f32) {
        self.dispatch_script_ticks(seconds);
        self.sweep_timers();
    }

    // ------------------------------------------------------------------
    // Script lifecycle

    /// Create an interpreter for `source`, install the API and run the chunk.
    ///
    /// A chunk error discards the script (and anything it registered);
    /// an error in the load hook is only logged.
    pub fn load_script(&self, name: &str, source: &str) -> Result<ScriptId> {
        if self.is_shut_down() {
            return Err(ScriptingError::ShutDown);
        }

        let _guard = self.inner.lock.enter(Frame::host());
        let lua = Lua::new();
        let script = ScriptId(
            self.inner
                .scripts
                .lock()
                .insert(ScriptHandle::new(name, lua.clone())),
        );

        if let Err(err) = self.prepare_script(script, &lua, name, source) {
            warn!(script = %name, "Failed to load script: {}", err);
            self.detach_callbacks(script, &lua);
            let freed = self.inner.registry.lock().free_owned(script);
            self.release_records(freed);
            let handle = self.inner.scripts.lock().remove(script.0);
            drop(handle);
            return Err(ScriptingError::LoadFailed {
                name: name.to_string(),
                message: err.to_string(),
            });
        }

        info!(script = %name, "Script loaded");
        Ok(script)
    }

    fn prepare_script(
        &self,
        script: ScriptId,
        lua: &Lua,
        name: &str,
        source: &str,
    ) -> mlua::Result<()> {
        crate::lua::register_api(lua, self.downgrade(), script, &self.inner.config)?;

        {
            let _frame = self.inner.lock.enter(Frame::script(script));
            lua.load(source).set_name(name).exec()?;
        }

        if let Some(tick) = global_function(lua, &self.inner.config.tick_entrypoint)? {
            let pinned = PinnedFunction::pin(lua, tick)?;
            if let Some(handle) = self.inner.scripts.lock().get_mut(script.0) {
                handle.tick = Some(pinned);
            }
            self.inner.ticks.lock().subscribe(script);
        }

        self.call_hook(script, lua, &self.inner.config.load_hook);
        self.set_state(script, ScriptState::Loaded);
        Ok(())
    }

    /// Unhook the entrypoint, remove every callback, run the unload hook and
    /// free the script's records. Unloading an unloaded script is a no-op.
    pub fn unload_script(&self, script: ScriptId) -> Result<()> {
        let _guard = self.inner.lock.enter(Frame::host());
        let (lua, name) = {
            let mut scripts = self.inner.scripts.lock();
            let handle = scripts
                .get_mut(script.0)
                .ok_or(ScriptingError::ScriptNotFound(script))?;
            if handle.state != ScriptState::Loaded {
                return Ok(());
            }
            handle.state = ScriptState::Unloading;
            (handle.lua().clone(), handle.name().to_string())
        };

        let removed = self.detach_callbacks(script, &lua);
        self.call_hook(script, &lua, &self.inner.config.unload_hook);

        // Nothing can have registered since: the script is Unloading
        let freed = self.inner.registry.lock().free_owned(script);
        self.release_records(freed);
        self.set_state(script, ScriptState::Unloaded);

        info!(script = %name, callbacks = removed, "Script unloaded");
        Ok(())
    }

    /// Unload (if needed) and drop the script's interpreter
    pub fn destroy_script(&self, script: ScriptId) -> Result<()> {
        let _guard = self.inner.lock.enter(Frame::host());
        self.unload_script(script)?;
        let handle = self.inner.scripts.lock().remove(script.0);
        if let Some(handle) = handle {
            debug!(script = %handle.name(), "Script destroyed");
        }
        Ok(())
    }

    /// Destroy every script and drain the global lists. Later loads fail.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let _guard = self.inner.lock.enter(Frame::host());
        for script in self.scripts() {
            if let Err(err) = self.destroy_script(script) {
                warn!(script = %script, "Failed to destroy script during shutdown: {}", err);
            }
        }

        let reaped = self.inner.timers.lock().clear();
        let freed: Vec<CallbackRecord> = {
            let mut registry = self.inner.registry.lock();
            reaped.into_iter().filter_map(|id| registry.free(id)).collect()
        };
        self.release_records(freed);
        self.inner.ticks.lock().clear();
        info!("Scripting shut down");
    }

    fn detach_callbacks(&self, script: ScriptId, lua: &Lua) -> usize {
        self.inner.ticks.lock().unsubscribe(script);

        let tick = self
            .inner
            .scripts
            .lock()
            .get_mut(script.0)
            .and_then(|handle| handle.tick.take());
        if let Some(tick) = tick {
            if let Err(err) = tick.release(lua) {
                warn!(script = %script, "Failed to unpin tick entrypoint: {}", err);
            }
        }

        let removed = self.inner.registry.lock().remove_owned(script);
        let count = removed.len();
        for (id, pinned) in removed {
            if let Err(err) = pinned.release(lua) {
                warn!(script = %script, callback = %id, "Failed to unpin callback: {}", err);
            }
        }
        count
    }

    fn set_state(&self, script: ScriptId, state: ScriptState) {
        if let Some(handle) = self.inner.scripts.lock().get_mut(script.0) {
            handle.state = state;
        }
    }

    fn call_hook(&self, script: ScriptId, lua: &Lua, hook: &str) {
        let func = match global_function(lua, hook) {
            Ok(Some(func)) => func,
            Ok(None) => return,
            Err(err) => {
                self.report_failure(script, hook, &err);
                return;
            }
        };

        let _frame = self.inner.lock.enter(Frame::script(script));
        if let Err(err) = func.call::<()>(()) {
            self.report_failure(script, hook, &err);
        }
    }

    // ------------------------------------------------------------------
    // Introspection

    pub fn scripts(&self) -> Vec<ScriptId> {
        self.inner
            .scripts
            .lock()
            .keys()
            .into_iter()
            .map(ScriptId)
            .collect()
    }

    pub fn script_name(&self, script: ScriptId) -> Option<String> {
        self.inner
            .scripts
            .lock()
            .get(script.0)
            .map(|handle| handle.name().to_string())
    }

    pub fn script_state(&self, script: ScriptId) -> Option<ScriptState> {
        self.inner
            .scripts
            .lock()
            .get(script.0)
            .map(ScriptHandle::state)
    }

    /// The script's interpreter, for binding code that marshals values
    pub fn script_lua(&self, script: ScriptId) -> Option<Lua> {
        self.inner
            .scripts
            .lock()
            .get(script.0)
            .map(|handle| handle.lua().clone())
    }

    /// Script whose code is running on this thread (blocks while another thread runs Lua)
    pub fn current_script(&self) -> Option<ScriptId> {
        self.inner.lock.current_script()
    }

    /// Callback being dispatched on this thread, if any
    pub fn current_callback(&self) -> Option<CallbackId> {
        self.inner.lock.current_callback()
    }

    /// Live callbacks registered by `script`
    pub fn callback_count(&self, script: ScriptId) -> usize {
        self.inner.registry.lock().owned_count(script)
    }

    /// Allocated records, including removed ones not yet freed
    pub fn record_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn callback_kind(&self, id: CallbackId) -> Option<CallbackKind> {
        self.inner.registry.lock().get(id).map(CallbackRecord::kind)
    }

    /// True once a callback has been removed or freed
    pub fn is_removed(&self, id: CallbackId) -> bool {
        self.inner
            .registry
            .lock()
            .get(id)
            .is_none_or(CallbackRecord::is_removed)
    }

    // ------------------------------------------------------------------
    // Registry operations

    /// Pin `func` and register it for `script`
    pub fn add_callback(
        &self,
        script: ScriptId,
        func: Function,
        kind: CallbackKind,
        extra: Extra,
    ) -> Result<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let lua = self.accepting_lua(script)?;
        let pinned = PinnedFunction::pin(&lua, func)?;
        let id = self.inner.registry.lock().add(script, pinned, kind, extra);
        debug!(script = %script, callback = %id, kind = kind.as_str(), "Callback added");
        Ok(id)
    }

    pub fn find_callback(&self, script: ScriptId, func: &Function) -> Option<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        // Resolving the identity touches the Lua state; never under the registry lock
        let identity = FunctionIdentity::of(func);
        self.inner.registry.lock().find(script, identity)
    }

    pub fn find_next_callback(
        &self,
        script: ScriptId,
        after: CallbackId,
        func: &Function,
    ) -> Option<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let identity = FunctionIdentity::of(func);
        self.inner.registry.lock().find_next(script, after, identity)
    }

    /// First record of `script` holding `func` that satisfies `matches`
    pub(crate) fn find_matching(
        &self,
        script: ScriptId,
        func: &Function,
        matches: impl Fn(&CallbackRecord) -> bool,
    ) -> Option<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let identity = FunctionIdentity::of(func);
        let registry = self.inner.registry.lock();
        let mut cursor = registry.find(script, identity);
        while let Some(id) = cursor {
            if registry.get(id).is_some_and(&matches) {
                return Some(id);
            }
            cursor = registry.find_next(script, id, identity);
        }
        None
    }

    /// Flag a callback removed and unpin its function. The record is freed
    /// later (next sweep, next delivery or unload). Returns false if it was
    /// unknown or already removed.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        let removed = self.inner.registry.lock().remove(id);
        match removed {
            Some((owner, pinned)) => {
                self.release_pin(owner, pinned);
                debug!(script = %owner, callback = %id, "Callback removed");
                true
            }
            None => false,
        }
    }

    /// Deallocate a record immediately. Only safe once no host source can
    /// still deliver to it.
    pub fn free_callback(&self, id: CallbackId) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        let record = self.inner.registry.lock().free(id);
        match record {
            Some(record) => {
                self.release_records(vec![record]);
                true
            }
            None => false,
        }
    }

    /// Remove the callback currently being dispatched on this thread
    pub fn remove_current_callback(&self) -> bool {
        match self.inner.lock.current_callback() {
            Some(id) => self.remove_callback(id),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Internals shared by the dispatchers

    fn accepting_lua(&self, script: ScriptId) -> Result<Lua> {
        let scripts = self.inner.scripts.lock();
        let handle = scripts
            .get(script.0)
            .ok_or(ScriptingError::ScriptNotFound(script))?;
        if !handle.accepts_callbacks() {
            return Err(ScriptingError::ScriptNotLoaded(script));
        }
        Ok(handle.lua().clone())
    }

    fn lua_for(&self, script: ScriptId) -> Option<Lua> {
        self.inner
            .scripts
            .lock()
            .get(script.0)
            .map(|handle| handle.lua().clone())
    }

    pub(crate) fn release_pin(&self, owner: ScriptId, pinned: PinnedFunction) {
        let _guard = self.inner.lock.enter(Frame::host());
        // Without the interpreter the key simply expires with it
        if let Some(lua) = self.lua_for(owner) {
            if let Err(err) = pinned.release(&lua) {
                warn!(script = %owner, "Failed to unpin callback: {}", err);
            }
        }
    }

    pub(crate) fn release_records(&self, records: Vec<CallbackRecord>) {
        for mut record in records {
            if let Some(pinned) = record.pinned.take() {
                self.release_pin(record.owner, pinned);
            }
        }
    }

    /// Dispatch one callback under the execution lock.
    ///
    /// The removal check happens with the lock held, so a callback removed
    /// before this point is never entered. Lua errors are logged and the
    /// registration kept; a removed or freed record answers
    /// [`Delivery::Unregister`] without touching the runtime.
    pub(crate) fn invoke<F>(&self, id: CallbackId, call: F) -> Delivery
    where
        F: FnOnce(&Lua, Function) -> mlua::Result<()>,
    {
        let _guard = self.inner.lock.enter(Frame::host());

        let live = {
            let registry = self.inner.registry.lock();
            registry
                .get(id)
                .filter(|record| !record.is_removed())
                .map(|record| (record.owner, record.kind))
        };
        let Some((owner, kind)) = live else {
            return Delivery::Unregister;
        };
        let Some(lua) = self.lua_for(owner) else {
            return Delivery::Unregister;
        };

        let func = {
            let registry = self.inner.registry.lock();
            match registry.get(id).and_then(CallbackRecord::pinned) {
                Some(pinned) => pinned.function(&lua),
                None => return Delivery::Unregister,
            }
        };
        let func = match func {
            Ok(func) => func,
            Err(err) => {
                self.report_failure(owner, kind.as_str(), &err);
                return Delivery::Keep;
            }
        };

        let _frame = self.inner.lock.enter(Frame::callback(owner, id));
        if let Err(err) = call(&lua, func) {
            self.report_failure(owner, kind.as_str(), &err);
        }
        Delivery::Keep
    }

    pub(crate) fn report_failure(&self, script: ScriptId, what: &str, err: &mlua::Error) {
        let name = self
            .script_name(script)
            .unwrap_or_else(|| script.to_string());
        warn!(script = %name, "Failed to call {}: {}", what, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::host::StubHost;

    fn scripting() -> Scripting {
        Scripting::with_clock(
            Arc::new(StubHost::new()),
            Arc::new(ManualClock::new()),
            ScriptingConfig::default(),
        )
    }

    #[test]
    fn test_load_runs_chunk_and_hook() {
        let scripting = scripting();
        let script = scripting
            .load_script(
                "hooks.lua",
                r#"
                order = {}
                table.insert(order, "chunk")
                function script_load() table.insert(order, "load") end
                "#,
            )
            .unwrap();

        let lua = scripting.script_lua(script).unwrap();
        let order: Vec<String> = lua.load("return order").eval().unwrap();
        assert_eq!(order, vec!["chunk", "load"]);
        assert_eq!(scripting.script_state(script), Some(ScriptState::Loaded));
        assert_eq!(scripting.script_name(script).as_deref(), Some("hooks.lua"));
    }

    #[test]
    fn test_failed_chunk_discards_script() {
        let scripting = scripting();
        let err = scripting
            .load_script(
                "broken.lua",
                r#"
                rover.timer_add(function() end, 10)
                error("nope")
                "#,
            )
            .unwrap_err();

        assert!(matches!(err, ScriptingError::LoadFailed { .. }));
        assert!(scripting.scripts().is_empty());
        assert_eq!(scripting.record_count(), 0);
    }

    #[test]
    fn test_registration_rejected_after_unload() {
        let scripting = scripting();
        let script = scripting.load_script("a.lua", "function f() end").unwrap();
        let lua = scripting.script_lua(script).unwrap();
        let f: Function = lua.globals().get("f").unwrap();

        scripting.unload_script(script).unwrap();
        let err = scripting
            .add_callback(script, f, CallbackKind::Tick, Extra::new())
            .unwrap_err();
        assert!(matches!(err, ScriptingError::ScriptNotLoaded(_)));
    }

    #[test]
    fn test_remove_callback_is_idempotent() {
        let scripting = scripting();
        let script = scripting.load_script("a.lua", "function f() end").unwrap();
        let lua = scripting.script_lua(script).unwrap();
        let f: Function = lua.globals().get("f").unwrap();

        let id = scripting
            .add_callback(script, f.clone(), CallbackKind::Tick, Extra::new())
            .unwrap();
        assert_eq!(scripting.find_callback(script, &f), Some(id));

        assert!(scripting.remove_callback(id));
        assert!(!scripting.remove_callback(id));
        assert!(scripting.is_removed(id));
        assert!(scripting.find_callback(script, &f).is_none());

        assert!(scripting.free_callback(id));
        assert!(!scripting.free_callback(id));
        assert_eq!(scripting.record_count(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_scripts() {
        let scripting = scripting();
        scripting.load_script("a.lua", "").unwrap();
        scripting.shutdown();

        assert!(scripting.scripts().is_empty());
        assert!(matches!(
            scripting.load_script("b.lua", ""),
            Err(ScriptingError::ShutDown)
        ));
    }
}

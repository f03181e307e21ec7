use crate::error::Result;
use crate::host::Delivery;
use crate::lock::Frame;
use crate::record::{CallbackId, CallbackKind, Extra};
use crate::script::{ScriptHandle, ScriptId};
use crate::scripting::Scripting;
use mlua::Function;
use smallvec::SmallVec;

/// Scripts whose tick entrypoint runs every frame, in load order
#[derive(Debug, Default)]
pub struct TickList {
    scripts: Vec<ScriptId>,
}

impl TickList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the script was already subscribed
    pub fn subscribe(&mut self, script: ScriptId) -> bool {
        if self.contains(script) {
            return false;
        }
        self.scripts.push(script);
        true
    }

    pub fn unsubscribe(&mut self, script: ScriptId) -> bool {
        match self.scripts.iter().position(|id| *id == script) {
            Some(index) => {
                self.scripts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> SmallVec<[ScriptId; 8]> {
        self.scripts.iter().copied().collect()
    }

    pub fn contains(&self, script: ScriptId) -> bool {
        self.scripts.contains(&script)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
    }
}

impl Scripting {
    /// Call every subscribed tick entrypoint with the frame's elapsed seconds.
    ///
    /// Iterates a snapshot; a script unhooked by an earlier entrypoint in the
    /// same frame is skipped.
    pub(crate) fn dispatch_script_ticks(&self, seconds: f32) {
        if self.inner.ticks.lock().is_empty() {
            return;
        }

        let _guard = self.inner.lock.enter(Frame::host());
        let snapshot = self.inner.ticks.lock().snapshot();
        for script in snapshot {
            if !self.inner.ticks.lock().contains(script) {
                continue;
            }

            let resolved = self
                .inner
                .scripts
                .lock()
                .get(script.0)
                .map(ScriptHandle::tick_function);
            let tick = match resolved {
                Some(Ok(Some(tick))) => tick,
                Some(Ok(None)) | None => continue,
                Some(Err(err)) => {
                    self.report_failure(script, &self.inner.config.tick_entrypoint, &err);
                    continue;
                }
            };

            let _frame = self.inner.lock.enter(Frame::script(script));
            if let Err(err) = tick.call::<()>(seconds) {
                self.report_failure(script, &self.inner.config.tick_entrypoint, &err);
            }
        }
    }

    /// Register an ad-hoc per-frame callback and hand it to the host
    pub fn add_tick_callback(&self, script: ScriptId, func: Function) -> Result<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let id = self.add_callback(script, func, CallbackKind::Tick, Extra::new())?;
        self.inner.host.add_tick_callback(id);
        Ok(id)
    }

    /// Remove the first tick callback of `script` holding `func`.
    /// The host drops it on its next delivery.
    pub fn remove_tick_callback(&self, script: ScriptId, func: &Function) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        match self.find_matching(script, func, |record| record.kind() == CallbackKind::Tick) {
            Some(id) => self.remove_callback(id),
            None => false,
        }
    }

    /// Host entry point for a tick callback. On [`Delivery::Unregister`] the
    /// record has been freed and the host must drop the registration.
    pub fn deliver_tick(&self, id: CallbackId, seconds: f32) -> Delivery {
        let delivery = self.invoke(id, |_, func| func.call::<()>(seconds));
        if delivery == Delivery::Unregister {
            self.free_callback(id);
        }
        delivery
    }

    /// Number of scripts with a tick entrypoint
    pub fn tick_subscribers(&self) -> usize {
        self.inner.ticks.lock().len()
    }
}

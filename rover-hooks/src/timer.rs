use crate::clock::NANOS_PER_MILLI;
use crate::error::Result;
use crate::lock::Frame;
use crate::record::{CallbackId, CallbackKind, CallbackRecord, Extra, RemovalFlag};
use crate::script::ScriptId;
use crate::scripting::Scripting;
use mlua::Function;
use tracing::debug;

/// Interval and phase of a timer, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub interval: u64,
    pub last_fire: u64,
}

impl TimerState {
    pub fn from_millis(interval_ms: u64, now: u64) -> Self {
        Self {
            interval: interval_ms.saturating_mul(NANOS_PER_MILLI),
            last_fire: now,
        }
    }

    /// A clock that went backwards counts as no time elapsed
    pub fn is_due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_fire) >= self.interval
    }

    /// Move the phase by exactly one interval so late sweeps do not drift
    pub fn advance(&mut self) {
        self.last_fire = self.last_fire.saturating_add(self.interval);
    }
}

#[derive(Debug)]
struct TimerEntry {
    callback: CallbackId,
    removed: RemovalFlag,
    state: TimerState,
}

/// Result of one sweep: timers to fire, and entries dropped because their
/// record had been removed
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub due: Vec<CallbackId>,
    pub reaped: Vec<CallbackId>,
}

/// Global timer list, swept once per frame
#[derive(Debug, Default)]
pub struct TimerTable {
    entries: Vec<TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: CallbackId, removed: RemovalFlag, interval_ms: u64, now: u64) {
        self.entries.push(TimerEntry {
            callback,
            removed,
            state: TimerState::from_millis(interval_ms, now),
        });
    }

    /// Reap removed entries and advance every due timer.
    ///
    /// A timer fires at most once per sweep however late the sweep is.
    pub fn sweep(&mut self, now: u64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        self.entries.retain_mut(|entry| {
            if entry.removed.is_set() {
                outcome.reaped.push(entry.callback);
                return false;
            }
            if entry.state.is_due(now) {
                entry.state.advance();
                outcome.due.push(entry.callback);
            }
            true
        });
        outcome
    }

    pub fn state(&self, callback: CallbackId) -> Option<TimerState> {
        self.entries
            .iter()
            .find(|entry| entry.callback == callback)
            .map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning their callback ids
    pub fn clear(&mut self) -> Vec<CallbackId> {
        self.entries.drain(..).map(|entry| entry.callback).collect()
    }
}

impl Scripting {
    /// Register `func` to run every `interval_ms` milliseconds, starting one
    /// interval from now
    pub fn add_timer(&self, script: ScriptId, func: Function, interval_ms: u64) -> Result<CallbackId> {
        let _guard = self.inner.lock.enter(Frame::host());
        let id = self.add_callback(script, func, CallbackKind::Timer, Extra::new())?;
        let flag = self
            .inner
            .registry
            .lock()
            .get(id)
            .map(|record| record.removal_flag().clone());

        if let Some(flag) = flag {
            let now = self.inner.clock.now_ns();
            self.inner.timers.lock().add(id, flag, interval_ms, now);
            debug!(script = %script, callback = %id, interval_ms, "Timer added");
        }
        Ok(id)
    }

    /// Remove the first timer of `script` holding `func`
    pub fn remove_timer(&self, script: ScriptId, func: &Function) -> bool {
        let _guard = self.inner.lock.enter(Frame::host());
        match self.find_matching(script, func, |record| record.kind() == CallbackKind::Timer) {
            Some(id) => self.remove_callback(id),
            None => false,
        }
    }

    /// Free records of removed timers, then fire every due one
    pub(crate) fn sweep_timers(&self) {
        let now = self.inner.clock.now_ns();
        let outcome = self.inner.timers.lock().sweep(now);

        if !outcome.reaped.is_empty() {
            let _guard = self.inner.lock.enter(Frame::host());
            let freed: Vec<CallbackRecord> = {
                let mut registry = self.inner.registry.lock();
                outcome
                    .reaped
                    .iter()
                    .filter_map(|id| registry.free(*id))
                    .collect()
            };
            self.release_records(freed);
        }

        for id in outcome.due {
            self.invoke(id, |_, func| func.call::<()>(()));
        }
    }

    /// Entries in the timer table, including removed ones awaiting the next sweep
    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub fn timer_state(&self, id: CallbackId) -> Option<TimerState> {
        self.inner.timers.lock().state(id)
    }
}

use crate::record::CallbackId;
use crate::script::ScriptId;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use smallvec::SmallVec;
use std::cell::RefCell;

/// Who is executing under the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub script: Option<ScriptId>,
    pub callback: Option<CallbackId>,
}

impl Frame {
    /// Host code entering on its own behalf (dispatch loops, lifecycle)
    pub fn host() -> Self {
        Self {
            script: None,
            callback: None,
        }
    }

    pub fn script(script: ScriptId) -> Self {
        Self {
            script: Some(script),
            callback: None,
        }
    }

    pub fn callback(script: ScriptId, callback: CallbackId) -> Self {
        Self {
            script: Some(script),
            callback: Some(callback),
        }
    }
}

#[derive(Debug, Default)]
struct ExecContext {
    frames: SmallVec<[Frame; 4]>,
}

impl ExecContext {
    fn current_script(&self) -> Option<ScriptId> {
        self.frames.iter().rev().find_map(|frame| frame.script)
    }

    fn current_callback(&self) -> Option<CallbackId> {
        self.frames.last().and_then(|frame| frame.callback)
    }
}

/// Process-wide reentrant lock serializing every entry into the scripting runtime.
///
/// Only one thread runs script code at a time. The owning thread may enter
/// again (a callback may call back into the host, which dispatches more
/// callbacks) without deadlocking. Every entry pushes a [`Frame`] so the
/// innermost running script and callback can be recovered.
#[derive(Default)]
pub struct ExecutionLock {
    inner: ReentrantMutex<RefCell<ExecContext>>,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock and push `frame`; dropping the guard pops it and releases
    pub fn enter(&self, frame: Frame) -> ExecGuard<'_> {
        let guard = self.inner.lock();
        guard.borrow_mut().frames.push(frame);
        ExecGuard { guard }
    }

    /// Innermost script on the frame stack (acquires the lock)
    pub fn current_script(&self) -> Option<ScriptId> {
        self.inner.lock().borrow().current_script()
    }

    /// Callback of the innermost frame, if that frame is a callback dispatch
    pub fn current_callback(&self) -> Option<CallbackId> {
        self.inner.lock().borrow().current_callback()
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().borrow().frames.len()
    }
}

/// Proof that the current thread holds the execution lock
pub struct ExecGuard<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<ExecContext>>,
}

impl ExecGuard<'_> {
    pub fn current_script(&self) -> Option<ScriptId> {
        self.guard.borrow().current_script()
    }

    pub fn current_callback(&self) -> Option<CallbackId> {
        self.guard.borrow().current_callback()
    }
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.guard.borrow_mut().frames.pop();
    }
}

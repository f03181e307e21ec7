use crate::pinned::{FunctionIdentity, PinnedFunction};
use crate::script::ScriptId;
use crate::slot::SlotKey;
use mlua::{FromLua, Lua, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const HANDLER_KEY: &str = "handler";
pub const SIGNAL_KEY: &str = "signal";

/// Handle to a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) SlotKey);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}v{}", self.0.index(), self.0.generation())
    }
}

/// Identity of a host signal emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

impl FromLua for HandlerId {
    fn from_lua(value: Value, lua: &Lua) -> mlua::Result<Self> {
        u64::from_lua(value, lua).map(HandlerId)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Which event source a callback was registered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Timer,
    Tick,
    Signal,
    GlobalSignal,
}

impl CallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Timer => "timer",
            CallbackKind::Tick => "tick",
            CallbackKind::Signal => "signal",
            CallbackKind::GlobalSignal => "global signal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraValue {
    Handler(HandlerId),
    Str(String),
}

/// Small key/value blob carried by a record (disconnect keys and the like)
#[derive(Debug, Clone, Default)]
pub struct Extra {
    entries: SmallVec<[(String, ExtraValue); 2]>,
}

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, key: &str, handler: HandlerId) -> Self {
        self.set(key, ExtraValue::Handler(handler));
        self
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, ExtraValue::Str(value.into()));
        self
    }

    pub fn set(&mut self, key: &str, value: ExtraValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn handler(&self, key: &str) -> Option<HandlerId> {
        match self.get(key) {
            Some(ExtraValue::Handler(handler)) => Some(*handler),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ExtraValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removal marker shared between a record and the lists that refer to it.
/// Once set it is never cleared.
#[derive(Debug, Clone, Default)]
pub struct RemovalFlag(Arc<AtomicBool>);

impl RemovalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A single registration linking a pinned Lua function to a host event source
#[derive(Debug)]
pub struct CallbackRecord {
    pub(crate) owner: ScriptId,
    pub(crate) pinned: Option<PinnedFunction>,
    pub(crate) removed: RemovalFlag,
    pub(crate) extra: Extra,
    pub(crate) kind: CallbackKind,
    pub(crate) seq: u64,
}

impl CallbackRecord {
    pub fn owner(&self) -> ScriptId {
        self.owner
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_set()
    }

    pub fn removal_flag(&self) -> &RemovalFlag {
        &self.removed
    }

    /// `None` once the record has been removed and its function unpinned
    pub fn pinned(&self) -> Option<&PinnedFunction> {
        self.pinned.as_ref()
    }

    pub fn identity(&self) -> Option<FunctionIdentity> {
        self.pinned.as_ref().map(PinnedFunction::identity)
    }
}

use crate::pinned::PinnedFunction;
use crate::slot::SlotKey;
use mlua::{Function, Lua, Value};
use std::fmt;

/// Handle to a loaded script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub(crate) SlotKey);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script#{}v{}", self.0.index(), self.0.generation())
    }
}

/// Script lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Chunk and `script_load` are running
    Loading,
    Loaded,
    /// Callbacks are being torn down and `script_unload` is running
    Unloading,
    Unloaded,
}

impl ScriptState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptState::Loading => "loading",
            ScriptState::Loaded => "loaded",
            ScriptState::Unloading => "unloading",
            ScriptState::Unloaded => "unloaded",
        }
    }
}

/// A script and the interpreter state it owns
pub struct ScriptHandle {
    name: String,
    lua: Lua,
    pub(crate) tick: Option<PinnedFunction>,
    pub(crate) state: ScriptState,
}

impl ScriptHandle {
    pub fn new(name: impl Into<String>, lua: Lua) -> Self {
        Self {
            name: name.into(),
            lua,
            tick: None,
            state: ScriptState::Loading,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    /// Registrations are accepted while loading and once loaded
    pub fn accepts_callbacks(&self) -> bool {
        matches!(self.state, ScriptState::Loading | ScriptState::Loaded)
    }

    /// Resolve the frame entrypoint, if the script defined one
    pub fn tick_function(&self) -> mlua::Result<Option<Function>> {
        self.tick
            .as_ref()
            .map(|pinned| pinned.function(&self.lua))
            .transpose()
    }
}

/// Look up a global function; any other value reads as absent
pub fn global_function(lua: &Lua, name: &str) -> mlua::Result<Option<Function>> {
    match lua.globals().get::<Value>(name)? {
        Value::Function(func) => Ok(Some(func)),
        _ => Ok(None),
    }
}

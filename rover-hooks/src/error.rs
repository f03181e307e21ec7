use crate::script::ScriptId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptingError {
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("Script {0} not found")]
    ScriptNotFound(ScriptId),

    #[error("Script {0} is not accepting callbacks")]
    ScriptNotLoaded(ScriptId),

    #[error("Failed to load script '{name}': {message}")]
    LoadFailed { name: String, message: String },

    #[error("Scripting has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, ScriptingError>;

impl From<ScriptingError> for mlua::Error {
    fn from(err: ScriptingError) -> Self {
        match err {
            ScriptingError::Lua(err) => err,
            other => mlua::Error::RuntimeError(other.to_string()),
        }
    }
}

use anyhow::anyhow;
use mlua::{FromLua, Lua, Value};

const LOG_LEVELS: &str = "debug, info, warn, error, nope";

/// Settings for a [`Scripting`](crate::Scripting) session
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptingConfig {
    /// Global table the script API is installed under
    pub api_global: String,
    /// Tracing level used by [`init_tracing`](crate::logging::init_tracing); "nope" disables it
    pub log_level: String,
    /// Global function called every frame
    pub tick_entrypoint: String,
    /// Global function called once the chunk has run
    pub load_hook: String,
    /// Global function called after the script's callbacks were removed
    pub unload_hook: String,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            api_global: "rover".to_string(),
            log_level: "info".to_string(),
            tick_entrypoint: "script_tick".to_string(),
            load_hook: "script_load".to_string(),
            unload_hook: "script_unload".to_string(),
        }
    }
}

impl ScriptingConfig {
    /// Evaluate a Lua chunk returning a config table
    pub fn from_lua_source(source: &str) -> mlua::Result<Self> {
        let lua = Lua::new();
        lua.load(source).set_name("scripting config").eval()
    }
}

fn string_field(config: &mlua::Table, key: &str, default: &str) -> mlua::Result<String> {
    match config.get::<Value>(key)? {
        Value::Nil => Ok(default.to_string()),
        Value::String(s) => {
            let value = s.to_str()?.to_string();
            if value.is_empty() {
                Err(anyhow!("{} must not be empty", key))?
            }
            Ok(value)
        }
        _ => Err(anyhow!("{} should be a string", key))?,
    }
}

impl FromLua for ScriptingConfig {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        let defaults = ScriptingConfig::default();
        match value {
            Value::Nil => Ok(defaults),
            Value::Table(config) => {
                let log_level = match config.get::<Value>("log_level")? {
                    Value::Nil => defaults.log_level,
                    Value::String(s) => {
                        let level = s.to_str()?.to_lowercase();
                        match level.as_str() {
                            "debug" | "info" | "warn" | "error" | "nope" => level,
                            _ => Err(anyhow!("log_level must be one of: {}", LOG_LEVELS))?,
                        }
                    }
                    _ => Err(anyhow!("log_level should be a string"))?,
                };

                Ok(ScriptingConfig {
                    api_global: string_field(&config, "api_global", &defaults.api_global)?,
                    log_level,
                    tick_entrypoint: string_field(
                        &config,
                        "tick_entrypoint",
                        &defaults.tick_entrypoint,
                    )?,
                    load_hook: string_field(&config, "load_hook", &defaults.load_hook)?,
                    unload_hook: string_field(&config, "unload_hook", &defaults.unload_hook)?,
                })
            }
            _ => Err(anyhow!("Scripting config must be a table"))?,
        }
    }
}

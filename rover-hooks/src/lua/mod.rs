use crate::config::ScriptingConfig;
use crate::logging;
use crate::record::HandlerId;
use crate::script::ScriptId;
use crate::scripting::{Scripting, WeakScripting};
use mlua::{Function, Lua, Result};

fn upgrade(scripting: &WeakScripting) -> Result<Scripting> {
    scripting
        .upgrade()
        .ok_or_else(|| mlua::Error::RuntimeError("Scripting has been shut down".to_string()))
}

/// Install the callback API for `script` under `config.api_global`
pub fn register_api(
    lua: &Lua,
    scripting: WeakScripting,
    script: ScriptId,
    config: &ScriptingConfig,
) -> Result<()> {
    let api = lua.create_table()?;

    // rover.timer_add(fn, ms) - call fn every ms milliseconds
    let weak = scripting.clone();
    let timer_add_fn = lua.create_function(move |_, (callback, ms): (Function, u64)| {
        upgrade(&weak)?.add_timer(script, callback, ms)?;
        Ok(())
    })?;
    api.set("timer_add", timer_add_fn)?;

    // rover.timer_remove(fn)
    let weak = scripting.clone();
    let timer_remove_fn = lua.create_function(move |_, callback: Function| {
        Ok(upgrade(&weak)?.remove_timer(script, &callback))
    })?;
    api.set("timer_remove", timer_remove_fn)?;

    // rover.add_tick_callback(fn) - call fn(seconds) every frame
    let weak = scripting.clone();
    let add_tick_fn = lua.create_function(move |_, callback: Function| {
        upgrade(&weak)?.add_tick_callback(script, callback)?;
        Ok(())
    })?;
    api.set("add_tick_callback", add_tick_fn)?;

    // rover.remove_tick_callback(fn)
    let weak = scripting.clone();
    let remove_tick_fn = lua.create_function(move |_, callback: Function| {
        Ok(upgrade(&weak)?.remove_tick_callback(script, &callback))
    })?;
    api.set("remove_tick_callback", remove_tick_fn)?;

    // rover.signal_handler_connect(handler, signal, fn) - fn(calldata)
    let weak = scripting.clone();
    let connect_fn = lua.create_function(
        move |_, (handler, signal, callback): (HandlerId, String, Function)| {
            upgrade(&weak)?.connect(script, handler, &signal, callback)?;
            Ok(())
        },
    )?;
    api.set("signal_handler_connect", connect_fn)?;

    // rover.signal_handler_disconnect(handler, signal, fn)
    let weak = scripting.clone();
    let disconnect_fn = lua.create_function(
        move |_, (handler, signal, callback): (HandlerId, String, Function)| {
            Ok(upgrade(&weak)?.disconnect(script, handler, &signal, &callback))
        },
    )?;
    api.set("signal_handler_disconnect", disconnect_fn)?;

    // rover.signal_handler_connect_global(handler, fn) - fn(signal, calldata)
    let weak = scripting.clone();
    let connect_global_fn =
        lua.create_function(move |_, (handler, callback): (HandlerId, Function)| {
            upgrade(&weak)?.connect_global(script, handler, callback)?;
            Ok(())
        })?;
    api.set("signal_handler_connect_global", connect_global_fn)?;

    // rover.signal_handler_disconnect_global(handler, fn)
    let weak = scripting.clone();
    let disconnect_global_fn =
        lua.create_function(move |_, (handler, callback): (HandlerId, Function)| {
            Ok(upgrade(&weak)?.disconnect_global(script, handler, &callback))
        })?;
    api.set("signal_handler_disconnect_global", disconnect_global_fn)?;

    // rover.remove_current_callback() - from inside a callback, remove it
    let weak = scripting.clone();
    let remove_current_fn = lua.create_function(move |_, ()| {
        Ok(upgrade(&weak)?.remove_current_callback())
    })?;
    api.set("remove_current_callback", remove_current_fn)?;

    // rover.script_log(level, message) - 100 error, 200 warning, 300 info, 400 debug
    let weak = scripting.clone();
    let log_fn = lua.create_function(move |_, (level, message): (i64, String)| {
        let name = upgrade(&weak)?
            .script_name(script)
            .unwrap_or_else(|| script.to_string());
        logging::script_log(&name, level, &message);
        Ok(())
    })?;
    api.set("script_log", log_fn)?;

    // rover.script_name()
    let weak = scripting;
    let name_fn = lua.create_function(move |_, ()| Ok(upgrade(&weak)?.script_name(script)))?;
    api.set("script_name", name_fn)?;

    api.set("LOG_ERROR", 100)?;
    api.set("LOG_WARNING", 200)?;
    api.set("LOG_INFO", 300)?;
    api.set("LOG_DEBUG", 400)?;

    lua.globals().set(config.api_global.as_str(), api)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::host::StubHost;
    use std::sync::Arc;

    fn scripting(config: ScriptingConfig) -> Scripting {
        Scripting::with_clock(Arc::new(StubHost::new()), Arc::new(ManualClock::new()), config)
    }

    #[test]
    fn test_api_installed_under_configured_global() {
        let config = ScriptingConfig {
            api_global: "obs".to_string(),
            ..ScriptingConfig::default()
        };
        let scripting = scripting(config);
        let script = scripting
            .load_script("named.lua", "seen = obs.script_name()")
            .unwrap();

        let lua = scripting.script_lua(script).unwrap();
        let seen: String = lua.globals().get("seen").unwrap();
        assert_eq!(seen, "named.lua");
        assert!(lua.globals().get::<mlua::Value>("rover").unwrap().is_nil());
    }

    #[test]
    fn test_api_errors_after_shutdown() {
        let scripting = scripting(ScriptingConfig::default());
        let script = scripting.load_script("late.lua", "").unwrap();
        let lua = scripting.script_lua(script).unwrap();
        drop(scripting);

        let result = lua
            .load("rover.timer_add(function() end, 10)")
            .exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let scripting = scripting(ScriptingConfig::default());
        let err = scripting
            .load_script("bad.lua", "rover.timer_add(function() end, -5)")
            .unwrap_err();
        assert!(matches!(err, crate::error::ScriptingError::LoadFailed { .. }));
    }
}

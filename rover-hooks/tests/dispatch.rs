/// Integration tests for tick, timer and ad-hoc callback dispatch
/// driven through StubHost and a ManualClock

use mlua::{FromLua, Function};
use rover_hooks::{CallbackKind, ManualClock, ScriptId, Scripting, ScriptingConfig, StubHost};
use std::sync::Arc;

struct Harness {
    host: Arc<StubHost>,
    clock: Arc<ManualClock>,
    scripting: Scripting,
}

impl Harness {
    fn new() -> Self {
        let host = Arc::new(StubHost::new());
        let clock = Arc::new(ManualClock::new());
        let scripting = Scripting::with_clock(host.clone(), clock.clone(), ScriptingConfig::default());
        Self { host, clock, scripting }
    }

    fn load(&self, source: &str) -> ScriptId {
        self.scripting.load_script("test.lua", source).unwrap()
    }

    fn global<T: FromLua>(&self, script: ScriptId, name: &str) -> T {
        self.scripting
            .script_lua(script)
            .unwrap()
            .globals()
            .get(name)
            .unwrap()
    }

    /// One host frame: entrypoints, timers, then ad-hoc tick callbacks
    fn frame(&self, ms: u64) {
        self.clock.advance_ms(ms);
        let seconds = ms as f32 / 1000.0;
        self.scripting.tick(seconds);
        self.host.run_tick_callbacks(&self.scripting, seconds);
    }
}

#[test]
fn test_tick_callback_removes_itself() {
    let h = Harness::new();
    let script = h.load(
        r#"
        count = 0
        rover.add_tick_callback(function(seconds)
            count = count + 1
            rover.remove_current_callback()
        end)
        "#,
    );
    assert_eq!(h.host.tick_callback_count(), 1);

    h.frame(16);
    assert_eq!(h.global::<i64>(script, "count"), 1);
    // Flagged but still allocated until the host drops it
    assert_eq!(h.scripting.record_count(), 1);

    h.frame(16);
    assert_eq!(h.global::<i64>(script, "count"), 1);
    assert_eq!(h.host.tick_callback_count(), 0);
    assert_eq!(h.scripting.record_count(), 0);
}

#[test]
fn test_sibling_removed_mid_frame_never_runs() {
    let h = Harness::new();
    let script = h.load(
        r#"
        a_count, b_count = 0, 0
        local function b() b_count = b_count + 1 end
        local function a()
            a_count = a_count + 1
            rover.remove_tick_callback(b)
        end
        rover.add_tick_callback(a)
        rover.add_tick_callback(b)
        "#,
    );

    h.frame(16);
    h.frame(16);
    assert_eq!(h.global::<i64>(script, "a_count"), 2);
    assert_eq!(h.global::<i64>(script, "b_count"), 0);
    assert_eq!(h.host.tick_callback_count(), 1);
}

#[test]
fn test_failing_callback_stays_registered() {
    let h = Harness::new();
    let script = h.load(
        r#"
        fails, runs = 0, 0
        rover.add_tick_callback(function()
            fails = fails + 1
            error("boom")
        end)
        rover.add_tick_callback(function() runs = runs + 1 end)
        "#,
    );

    h.frame(16);
    h.frame(16);
    assert_eq!(h.global::<i64>(script, "fails"), 2);
    assert_eq!(h.global::<i64>(script, "runs"), 2);
    assert_eq!(h.scripting.callback_count(script), 2);
}

#[test]
fn test_find_next_walks_duplicate_registrations() {
    let h = Harness::new();
    let script = h.load("function f() end\nfunction g() end");
    let f: Function = h.global(script, "f");
    let g: Function = h.global(script, "g");

    let first = h.scripting.add_tick_callback(script, f.clone()).unwrap();
    h.scripting.add_tick_callback(script, g.clone()).unwrap();
    let second = h.scripting.add_tick_callback(script, f.clone()).unwrap();

    assert_eq!(h.scripting.find_callback(script, &f), Some(first));
    assert_eq!(h.scripting.find_next_callback(script, first, &f), Some(second));
    assert_eq!(h.scripting.find_next_callback(script, second, &f), None);

    // Enumeration continues past a record removed during the walk
    assert!(h.scripting.remove_callback(first));
    assert_eq!(h.scripting.find_next_callback(script, first, &f), Some(second));
    assert_eq!(h.scripting.find_callback(script, &f), Some(second));
}

#[test]
fn test_removed_callback_is_never_dispatched() {
    let h = Harness::new();
    let script = h.load("count = 0\nfunction f() count = count + 1 end");
    let f: Function = h.global(script, "f");

    let id = h.scripting.add_tick_callback(script, f).unwrap();
    assert_eq!(h.scripting.callback_kind(id), Some(CallbackKind::Tick));
    h.scripting.remove_callback(id);

    h.frame(16);
    assert_eq!(h.global::<i64>(script, "count"), 0);
    assert!(h.scripting.is_removed(id));
}

#[test]
fn test_lua_timer_fires_on_interval() {
    let h = Harness::new();
    let script = h.load(
        r#"
        fired = 0
        rover.timer_add(function() fired = fired + 1 end, 100)
        "#,
    );

    for _ in 0..5 {
        h.frame(40);
    }
    // Due at 100ms (swept at 120) and 200ms
    assert_eq!(h.global::<i64>(script, "fired"), 2);
}

#[test]
fn test_timer_removes_itself_and_is_reaped() {
    let h = Harness::new();
    let script = h.load(
        r#"
        fired = 0
        rover.timer_add(function()
            fired = fired + 1
            rover.remove_current_callback()
        end, 10)
        "#,
    );

    h.frame(10);
    assert_eq!(h.global::<i64>(script, "fired"), 1);
    assert_eq!(h.scripting.timer_count(), 1);

    h.frame(10);
    assert_eq!(h.global::<i64>(script, "fired"), 1);
    assert_eq!(h.scripting.timer_count(), 0);
    assert_eq!(h.scripting.record_count(), 0);
}

#[test]
fn test_timer_remove_by_function() {
    let h = Harness::new();
    let script = h.load(
        r#"
        fired = 0
        local function t() fired = fired + 1 end
        rover.timer_add(t, 10)
        removed = rover.timer_remove(t)
        removed_again = rover.timer_remove(t)
        "#,
    );

    assert!(h.global::<bool>(script, "removed"));
    assert!(!h.global::<bool>(script, "removed_again"));
    assert_eq!(h.scripting.callback_count(script), 0);

    h.frame(20);
    assert_eq!(h.global::<i64>(script, "fired"), 0);
    assert_eq!(h.scripting.timer_count(), 0);
}

#[test]
fn test_timer_remove_ignores_tick_registrations() {
    let h = Harness::new();
    let script = h.load(
        r#"
        runs = 0
        local function f() runs = runs + 1 end
        rover.add_tick_callback(f)
        removed = rover.timer_remove(f)
        "#,
    );

    assert!(!h.global::<bool>(script, "removed"));
    h.frame(16);
    assert_eq!(h.global::<i64>(script, "runs"), 1);
}

#[test]
fn test_timer_removed_by_sibling_in_same_sweep_never_fires() {
    let h = Harness::new();
    let script = h.load(
        r#"
        a_fired, b_fired = 0, 0
        local function b() b_fired = b_fired + 1 end
        local function a()
            a_fired = a_fired + 1
            removed_sibling = rover.timer_remove(b)
        end
        rover.timer_add(a, 10)
        rover.timer_add(b, 10)
        "#,
    );

    // Both are due in this sweep; a runs first and removes b
    h.frame(10);
    assert_eq!(h.global::<i64>(script, "a_fired"), 1);
    assert_eq!(h.global::<i64>(script, "b_fired"), 0);
    assert!(h.global::<bool>(script, "removed_sibling"));

    h.frame(10);
    assert_eq!(h.global::<i64>(script, "a_fired"), 2);
    assert_eq!(h.global::<i64>(script, "b_fired"), 0);
    assert_eq!(h.scripting.timer_count(), 1);
    assert_eq!(h.scripting.callback_count(script), 1);
}

#[test]
fn test_timer_callback_can_register_timers() {
    let h = Harness::new();
    let script = h.load(
        r#"
        inner = 0
        rover.timer_add(function()
            rover.timer_add(function() inner = inner + 1 end, 10)
            rover.remove_current_callback()
        end, 10)
        "#,
    );

    h.frame(10);
    assert_eq!(h.scripting.callback_count(script), 1);
    h.frame(10);
    assert_eq!(h.global::<i64>(script, "inner"), 1);
}

#[test]
fn test_tick_entrypoint_receives_seconds() {
    let h = Harness::new();
    let script = h.load(
        r#"
        total = 0
        function script_tick(seconds) total = total + seconds end
        "#,
    );
    assert_eq!(h.scripting.tick_subscribers(), 1);

    h.scripting.tick(0.25);
    h.scripting.tick(0.5);
    assert_eq!(h.global::<f64>(script, "total"), 0.75);
}

#[test]
fn test_current_script_inside_callback() {
    let h = Harness::new();
    let script = h.load("function f() seen = inspect() end");
    let lua = h.scripting.script_lua(script).unwrap();

    let weak = h.scripting.downgrade();
    let inspect = lua
        .create_function(move |_, ()| {
            let scripting = weak.upgrade().unwrap();
            Ok(scripting.current_script() == Some(script) && scripting.current_callback().is_some())
        })
        .unwrap();
    lua.globals().set("inspect", inspect).unwrap();

    let f: Function = h.global(script, "f");
    h.scripting.add_tick_callback(script, f).unwrap();
    h.frame(16);

    assert!(h.global::<bool>(script, "seen"));
    assert_eq!(h.scripting.current_script(), None);
    assert_eq!(h.scripting.current_callback(), None);
}

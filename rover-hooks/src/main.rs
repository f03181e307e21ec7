use anyhow::{Context, Result};
use clap::Parser;
use rover_hooks::logging::init_tracing;
use rover_hooks::{HandlerId, ManualClock, Scripting, ScriptingConfig, StubHost};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rover-hooks-demo")]
#[command(version, about = "Drive a Lua script's ticks, timers and signals", long_about = None)]
struct Cli {
    /// Path to the Lua script to load
    file: PathBuf,
    /// Number of frames to run
    #[arg(short, long, default_value_t = 60)]
    frames: u32,
    /// Frames per simulated second
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Signal emitted from `--handler` every `--every` frames
    #[arg(short, long)]
    signal: Option<String>,
    /// Emit interval in frames
    #[arg(long, default_value_t = 30)]
    every: u32,
    /// Handler id the signal is emitted from
    #[arg(long, default_value_t = 1)]
    handler: u64,
    /// Sleep between frames instead of only advancing the simulated clock
    #[arg(long)]
    realtime: bool,
    /// Lua file returning a scripting config table
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log level (debug, info, warn, error, nope); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            ScriptingConfig::from_lua_source(&source)
                .map_err(|err| anyhow::anyhow!("Invalid config {}: {}", path.display(), err))?
        }
        None => ScriptingConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read script {}", cli.file.display()))?;
    let name = cli.file.display().to_string();

    let host = Arc::new(StubHost::new());
    let clock = Arc::new(ManualClock::new());
    let scripting = Scripting::with_clock(host.clone(), clock.clone(), config);
    scripting.load_script(&name, &source)?;

    let fps = cli.fps.max(1);
    let frame = Duration::from_secs_f64(1.0 / f64::from(fps));
    let handler = HandlerId(cli.handler);
    let every = cli.every.max(1);

    for index in 1..=cli.frames {
        clock.advance(frame);
        scripting.tick(frame.as_secs_f32());
        host.run_tick_callbacks(&scripting, frame.as_secs_f32());

        if let Some(signal) = &cli.signal {
            if index % every == 0 {
                let delivered = host.emit(&scripting, handler, signal, &json!({ "frame": index }));
                tracing::debug!(signal = %signal, delivered, "Signal emitted");
            }
        }

        if cli.realtime {
            std::thread::sleep(frame);
        }
    }

    tracing::info!(
        frames = cli.frames,
        timers = scripting.timer_count(),
        tick_callbacks = host.tick_callback_count(),
        connections = host.connection_count(),
        "Run finished"
    );
    scripting.shutdown();
    Ok(())
}

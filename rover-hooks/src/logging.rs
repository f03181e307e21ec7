use tracing::Level;

/// Install a fmt subscriber. `RUST_LOG` wins over `level`; "nope" installs nothing.
/// Returns false if logging stays off or a subscriber was already set.
pub fn init_tracing(level: &str) -> bool {
    if level == "nope" {
        return false;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}

/// Map a script log level (100 error, 200 warning, 300 info, 400 debug) to tracing
pub fn script_level(level: i64) -> Level {
    match level {
        i64::MIN..=100 => Level::ERROR,
        101..=200 => Level::WARN,
        201..=300 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Emit a line logged by a script
pub fn script_log(script: &str, level: i64, message: &str) {
    let level = script_level(level);
    if level == Level::ERROR {
        tracing::error!(script = %script, "{}", message);
    } else if level == Level::WARN {
        tracing::warn!(script = %script, "{}", message);
    } else if level == Level::INFO {
        tracing::info!(script = %script, "{}", message);
    } else {
        tracing::debug!(script = %script, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_levels() {
        assert_eq!(script_level(100), Level::ERROR);
        assert_eq!(script_level(200), Level::WARN);
        assert_eq!(script_level(300), Level::INFO);
        assert_eq!(script_level(400), Level::DEBUG);
        assert_eq!(script_level(-5), Level::ERROR);
        assert_eq!(script_level(250), Level::INFO);
    }

    #[test]
    fn test_nope_disables_tracing() {
        assert!(!init_tracing("nope"));
    }
}

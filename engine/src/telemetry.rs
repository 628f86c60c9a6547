//! Telemetry and Observability
//!
//! Handles setting up `tracing-subscriber` for structured logging.
//! Supports config-driven log levels, environment variable overrides,
//! and format switching between pretty (debug) and JSON (release).
//! Logs are written to stderr; stdout belongs to the conversation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding a log filter
pub const LOG_ENV: &str = "CREW_LOG";

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `CREW_LOG` env var > `log_level` parameter > default "info"
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));
    install(env_filter);
}

/// Initialize with an explicit level that ignores `CREW_LOG` (the `--log` flag)
pub fn init_telemetry_override(log_level: &str) {
    install(EnvFilter::new(default_filter(log_level)));
}

fn install(env_filter: EnvFilter) {
    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

fn default_filter(log_level: &str) -> String {
    format!("{},crew_engine={}", log_level, log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_engine() {
        assert_eq!(default_filter("debug"), "debug,crew_engine=debug");
        assert!(EnvFilter::try_new(default_filter("warn")).is_ok());
    }
}

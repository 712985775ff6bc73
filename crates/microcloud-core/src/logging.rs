//! Logging bootstrap shared by every service binary.

use crate::config::{LogConfig, LogFormat};
use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// The level comes from the config (overridable via `RUST_LOG`); the format
/// is either human-readable or JSON. Safe to call more than once; later
/// calls are no-ops.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let level = cfg
        .level
        .parse::<tracing::Level>()
        .map_err(|_| Error::config(format!("invalid log level: {}", cfg.level)))?;

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let result = match cfg.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .try_init(),
    };

    // A second init (tests, embedded use) is not an error worth surfacing.
    let _ = result;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_accepts_valid_levels() {
        let cfg = LogConfig {
            level: "debug".to_string(),
            format: LogFormat::Text,
        };
        assert!(init(&cfg).is_ok());
        // Re-initialization is tolerated.
        assert!(init(&cfg).is_ok());
    }

    #[test]
    fn init_rejects_bad_level() {
        let cfg = LogConfig {
            level: "loud".to_string(),
            format: LogFormat::Json,
        };
        assert!(init(&cfg).is_err());
    }
}

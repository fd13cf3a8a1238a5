//! Logging setup
//!
//! Everything in this crate logs through `tracing`; embedders that already install a subscriber
//! don't need this module.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::FrameworkConfig;

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Fails if a global subscriber is already installed.
pub fn setup_logging(level: &str, json: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    }
}

/// Installs the global subscriber at the config's `log_level`
pub fn setup_logging_from(config: &FrameworkConfig, json: bool) -> Result<(), TryInitError> {
    setup_logging(&config.log_level, json)
}

#[cfg(test)]
mod tests {
    use crate::config::FrameworkConfig;

    use super::{setup_logging, setup_logging_from};

    #[test]
    /// Only one global subscriber can be installed
    fn test_setup_once() {
        let _ = setup_logging("debug", false);
        assert!(setup_logging("info", true).is_err());

        let config = FrameworkConfig {
            log_level: "warn".to_string(),
            ..FrameworkConfig::default()
        };
        assert!(setup_logging_from(&config, false).is_err());
    }
}

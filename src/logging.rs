//! Process-wide `tracing` subscriber setup.

use crate::config::LoggingConfig;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to the
/// configured directive.
///
/// Returns `false` when a global subscriber was already installed; calling
/// this more than once is harmless.
#[cfg(feature = "logging")]
pub fn init_logging(config: &LoggingConfig) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Without the `logging` feature the host application owns the subscriber.
#[cfg(not(feature = "logging"))]
pub fn init_logging(_config: &LoggingConfig) -> bool {
    false
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LoggingConfig {
            default_directive: "redfish_tasks=debug".into(),
            ansi: false,
        };
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}

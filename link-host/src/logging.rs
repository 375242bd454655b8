//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::{HostError, HostResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.filter` when set.
///
/// # Errors
///
/// Returns [`HostError::Logging`] if the filter is invalid or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> HostResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| HostError::Logging(format!("invalid filter {:?}: {}", config.filter, e)))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(config.with_target))
        .try_init()
        .map_err(|e| HostError::Logging(e.to_string()))
}

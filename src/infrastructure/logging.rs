//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::infrastructure::config::LoggingConfig;

/// Initialize the global subscriber. `RUST_LOG` wins over the config file
/// when set, so ad-hoc debugging never requires a config edit.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) => {
            let mut spec = config.level.clone();
            for (module, level) in &config.module_filters {
                spec.push_str(&format!(",{module}={level}"));
            }
            EnvFilter::new(spec)
        }
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing subscriber: {e}"))?;
    Ok(())
}

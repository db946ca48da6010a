use anyhow::Context;
use std::env;

/// Runtime tuning knobs, loaded from the environment. Every value is range
/// checked at startup so a bad deployment fails fast instead of degrading.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard time budget applied when the caller passes no timeout.
    pub default_timeout_secs: u64,
    /// Upper bound on concurrently running invocations.
    pub max_concurrent_invocations: usize,
    /// Buffer size used by the CLI's progress channel subscriber.
    pub progress_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_concurrent_invocations: 32,
            progress_channel_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn load() -> anyhow::Result<Self> {
        let default_timeout_secs = env::var("RELAY_ACTION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse RELAY_ACTION_TIMEOUT_SECS")?;

        if default_timeout_secs == 0 || default_timeout_secs > 300 {
            anyhow::bail!(
                "RELAY_ACTION_TIMEOUT_SECS must be between 1 and 300 (got {})",
                default_timeout_secs
            );
        }

        let max_concurrent_invocations = env::var("RELAY_MAX_CONCURRENT")
            .unwrap_or_else(|_| "32".to_string())
            .parse::<usize>()
            .context("Failed to parse RELAY_MAX_CONCURRENT")?;

        if max_concurrent_invocations == 0 || max_concurrent_invocations > 256 {
            anyhow::bail!(
                "RELAY_MAX_CONCURRENT must be between 1 and 256 (got {})",
                max_concurrent_invocations
            );
        }

        let progress_channel_capacity = env::var("RELAY_PROGRESS_CAPACITY")
            .unwrap_or_else(|_| "64".to_string())
            .parse::<usize>()
            .context("Failed to parse RELAY_PROGRESS_CAPACITY")?;

        if progress_channel_capacity == 0 || progress_channel_capacity > 4096 {
            anyhow::bail!(
                "RELAY_PROGRESS_CAPACITY must be between 1 and 4096 (got {})",
                progress_channel_capacity
            );
        }

        Ok(Self {
            default_timeout_secs,
            max_concurrent_invocations,
            progress_channel_capacity,
        })
    }
}

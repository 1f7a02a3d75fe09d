//! Stage runtime configuration (SPEC_FULL §10.4), following the
//! `Config`/`ConfigBuilder` shape used throughout this workspace.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default outbound request deadline (§5 "default 30 s, configurable").
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval the request-cache sweeper checks for expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Default idle-reap grace period (SPEC_FULL §10.7): how long a stage may
/// have an empty actor table before it is torn down.
pub const DEFAULT_IDLE_REAP_GRACE: Duration = Duration::from_secs(30);

/// Tunable limits for the stage/actor runtime.
///
/// # Examples
///
/// ```rust
/// use playhouse_rt::config::StageRuntimeConfig;
/// use std::time::Duration;
///
/// let config = StageRuntimeConfig::builder()
///     .with_request_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.request_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRuntimeConfig {
    /// Deadline for an outbound request before it fails with
    /// `RequestTimeout` (§5).
    pub request_timeout: Duration,

    /// How often the request-cache sweeper scans for expired entries.
    pub sweep_interval: Duration,

    /// Number of worker threads backing `AsyncBlock` off-loads (§4.9);
    /// defaults to the host's logical CPU count.
    pub compute_pool_size: usize,

    /// How long a stage may sit with an empty actor table before it is
    /// reaped (SPEC_FULL §10.7).
    pub idle_reap_grace: Duration,
}

impl Default for StageRuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            compute_pool_size: num_cpus::get(),
            idle_reap_grace: DEFAULT_IDLE_REAP_GRACE,
        }
    }
}

impl StageRuntimeConfig {
    pub fn builder() -> StageRuntimeConfigBuilder {
        StageRuntimeConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }
        if self.compute_pool_size == 0 {
            return Err("compute_pool_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for [`StageRuntimeConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct StageRuntimeConfigBuilder {
    config: StageRuntimeConfig,
}

impl StageRuntimeConfigBuilder {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn with_compute_pool_size(mut self, size: usize) -> Self {
        self.config.compute_pool_size = size;
        self
    }

    pub fn with_idle_reap_grace(mut self, grace: Duration) -> Self {
        self.config.idle_reap_grace = grace;
        self
    }

    pub fn build(self) -> Result<StageRuntimeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

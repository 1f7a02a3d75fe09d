//! Transport and mesh configuration (SPEC_FULL §10.4), following the
//! `Config`/`ConfigBuilder` shape used throughout this workspace.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default interval between heartbeat checks (§4.2).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default idle duration after which a session is closed with
/// `HeartbeatTimeout` (§4.2).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a session's outbound frame queue before
/// `BackpressureExceeded` closes the session (§4.9).
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Tunable limits for client-facing listeners and sessions (§4.2, §4.3).
///
/// # Examples
///
/// ```rust
/// use playhouse_net::config::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::builder()
///     .with_heartbeat_timeout(Duration::from_secs(60))
///     .build()
///     .unwrap();
/// assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How often a session emits `@Heart@Beat@` to its peer.
    pub heartbeat_interval: Duration,

    /// Idle duration past which a session is closed (`HeartbeatTimeout`).
    pub heartbeat_timeout: Duration,

    /// Capacity of a session's bounded outbound frame queue.
    pub outbound_queue_capacity: usize,

    /// Authenticate message id routed by the Session Manager (§4.3).
    pub authenticate_msg_id: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            authenticate_msg_id: "Authenticate".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err("heartbeat_timeout must exceed heartbeat_interval".to_string());
        }
        if self.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be > 0".to_string());
        }
        if self.authenticate_msg_id.is_empty() {
            return Err("authenticate_msg_id must not be empty".to_string());
        }
        Ok(())
    }
}

/// Builder for [`TransportConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    pub fn with_authenticate_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.config.authenticate_msg_id = msg_id.into();
        self
    }

    pub fn build(self) -> Result<TransportConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Default base delay for mesh reconnect backoff.
pub const DEFAULT_MESH_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Default cap for mesh reconnect backoff.
pub const DEFAULT_MESH_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Default per-peer outbound send queue capacity.
pub const DEFAULT_MESH_SEND_QUEUE_CAPACITY: usize = 4096;

/// Tunable limits for the mesh transport (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Initial reconnect backoff delay.
    pub backoff_base: Duration,

    /// Maximum reconnect backoff delay (exponential growth is capped here).
    pub backoff_max: Duration,

    /// Capacity of a peer link's outbound send queue.
    pub send_queue_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_MESH_BACKOFF_BASE,
            backoff_max: DEFAULT_MESH_BACKOFF_MAX,
            send_queue_capacity: DEFAULT_MESH_SEND_QUEUE_CAPACITY,
        }
    }
}

impl MeshConfig {
    pub fn builder() -> MeshConfigBuilder {
        MeshConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_base.is_zero() {
            return Err("backoff_base must be > 0".to_string());
        }
        if self.backoff_max < self.backoff_base {
            return Err("backoff_max must be >= backoff_base".to_string());
        }
        if self.send_queue_capacity == 0 {
            return Err("send_queue_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for [`MeshConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.config.backoff_max = max;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.send_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<MeshConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

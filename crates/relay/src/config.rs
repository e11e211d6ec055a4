use std::{num::NonZeroUsize, time::Duration};

pub const DEFAULT_LANGUAGE: &str = "python";

/// Timeouts and limits for one bridge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Bound on the startup readiness handshake.
    pub ready_timeout: Duration,
    /// Bound on waiting for readiness after a restart.
    pub restart_timeout: Duration,
    /// Bound on the language query made after startup.
    pub kernel_info_timeout: Duration,
    /// How long the event relay waits for an event before re-checking
    /// cancellation.
    pub poll_interval: Duration,
    /// Bound on each teardown step at shutdown.
    pub teardown_timeout: Duration,
    /// Evict the oldest correlation entries beyond this many; unbounded if unset.
    pub correlation_capacity: Option<NonZeroUsize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_secs(30),
            kernel_info_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            teardown_timeout: Duration::from_secs(5),
            correlation_capacity: None,
        }
    }
}

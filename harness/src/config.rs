//! Harness configuration
//!
//! Timeouts, bind host and connection retry policy for a single run.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Capped exponential backoff for connecting to a peer that may not be
/// listening yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time spent retrying before giving up
    pub budget: Duration,
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            budget: Duration::ZERO,
        }
    }

    /// Backoff to sleep after the given (zero-based) failed attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            budget: Duration::from_secs(5),
        }
    }
}

/// Configuration for one orchestrated run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Interface the payload server binds on
    pub bind_host: IpAddr,
    /// How long to wait for the client's start notification (`None` = forever)
    pub startup_timeout: Option<Duration>,
    /// How long to wait for the client to exit after shutdown (`None` = forever)
    pub exit_timeout: Option<Duration>,
    /// How long the server waits for in-flight calls when stopping
    pub drain_timeout: Duration,
    /// Deadline for one request/response exchange on the control channel,
    /// once connected (`None` = forever)
    pub call_timeout: Option<Duration>,
    /// Retry policy for the client control stub
    pub retry: RetryPolicy,
    /// Let the client write to the harness's stdout/stderr
    pub inherit_client_output: bool,
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure bind host (fluent API)
    pub fn with_bind_host(mut self, bind_host: IpAddr) -> Self {
        self.bind_host = bind_host;
        self
    }

    /// Configure startup timeout (fluent API)
    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Configure exit timeout (fluent API)
    pub fn with_exit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exit_timeout = timeout;
        self
    }

    /// Configure drain timeout (fluent API)
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Configure control call timeout (fluent API)
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Configure retry policy (fluent API)
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Configure client output inheritance (fluent API)
    pub fn with_inherit_client_output(mut self, inherit: bool) -> Self {
        self.inherit_client_output = inherit;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            startup_timeout: Some(Duration::from_secs(10)),
            exit_timeout: Some(Duration::from_secs(10)),
            drain_timeout: Duration::from_secs(1),
            call_timeout: Some(Duration::from_secs(5)),
            retry: RetryPolicy::default(),
            inherit_client_output: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_fluent_configuration() {
        let config = HarnessConfig::new()
            .with_startup_timeout(None)
            .with_exit_timeout(Some(Duration::from_millis(250)))
            .with_call_timeout(None)
            .with_retry(RetryPolicy::no_retry());

        assert_eq!(config.startup_timeout, None);
        assert_eq!(config.exit_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.call_timeout, None);
        assert_eq!(config.retry.budget, Duration::ZERO);
        assert!(config.bind_host.is_unspecified());
    }
}

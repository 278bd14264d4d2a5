//! Test fixtures: client entry points and configurations

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use harness::client::Scenario;
use harness::{ClientEntryPoint, HarnessConfig};

/// Path to the compiled client binary (resolved by cargo at build time)
pub const ECHO_CLIENT_BIN: &str = env!("CARGO_BIN_EXE_echo-client");

pub struct TestFixtures;

#[allow(dead_code)] // Not every suite uses every fixture
impl TestFixtures {
    /// Loopback-only config with timeouts short enough for tests
    pub fn config() -> HarnessConfig {
        HarnessConfig::new()
            .with_bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_startup_timeout(Some(Duration::from_secs(5)))
            .with_exit_timeout(Some(Duration::from_secs(5)))
    }

    /// Config whose startup wait gives up quickly
    pub fn impatient_config() -> HarnessConfig {
        Self::config().with_startup_timeout(Some(Duration::from_millis(500)))
    }

    /// The echo client running the given scenario
    pub fn client(scenario: Scenario) -> ClientEntryPoint {
        ClientEntryPoint::new(ECHO_CLIENT_BIN).with_args(["--scenario", scenario.as_arg(), "--log-level", "warn"])
    }

    /// `/bin/sh -c <script>`; the port flags land in the positional parameters
    pub fn shell_client(script: &str) -> ClientEntryPoint {
        ClientEntryPoint::new("/bin/sh").with_args(["-c", script])
    }

    /// An entry point that cannot be spawned
    pub fn missing_client() -> ClientEntryPoint {
        ClientEntryPoint::new("/nonexistent/echo-client")
    }

    /// Upper bound for the client reporting in
    pub fn startup_bound() -> Duration {
        Duration::from_secs(5)
    }
}

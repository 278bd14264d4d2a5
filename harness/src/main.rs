//! Main entry point for the harness binary
//!
//! Runs one end-to-end test against a client binary and prints the outcome
//! as JSON.

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use harness::client::Scenario;
use harness::{ClientEntryPoint, HarnessConfig, HarnessError, TestOrchestrator};
use shared::{logging, process_info, ProcessId};

/// Run an end-to-end test of the echo service across a process boundary
#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Runs an RPC server in-process and drives a spawned client against it")]
pub struct Args {
    /// Client binary (defaults to echo-client next to this binary)
    #[arg(long)]
    pub client: Option<PathBuf>,

    /// Scenario passed to the client
    #[arg(long, value_enum, default_value = "echo")]
    pub scenario: Scenario,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Milliseconds to wait for the client to report in (0 waits forever)
    #[arg(long, default_value = "10000")]
    pub startup_timeout_ms: u64,

    /// Milliseconds to wait for the client to exit after shutdown (0 waits forever)
    #[arg(long, default_value = "10000")]
    pub exit_timeout_ms: u64,

    /// Milliseconds to wait for a control call's reply once connected (0 waits forever)
    #[arg(long, default_value = "5000")]
    pub call_timeout_ms: u64,

    /// Interface the RPC server binds on
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_host: IpAddr,
}

fn millis_or_forever(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn default_client_path() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate harness binary")?;
    Ok(exe.with_file_name(format!("echo-client{}", std::env::consts::EXE_SUFFIX)))
}

const HARNESS_PROBE: &str = "hello from the harness";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ProcessId::init_harness();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "end-to-end harness");

    let client = match args.client {
        Some(path) => path,
        None => default_client_path()?,
    };
    let entry_point = ClientEntryPoint::new(client).with_args([
        "--scenario",
        args.scenario.as_arg(),
        "--log-level",
        args.log_level.as_str(),
    ]);

    let config = HarnessConfig::new()
        .with_bind_host(args.bind_host)
        .with_startup_timeout(millis_or_forever(args.startup_timeout_ms))
        .with_exit_timeout(millis_or_forever(args.exit_timeout_ms))
        .with_call_timeout(millis_or_forever(args.call_timeout_ms));

    let outcome = TestOrchestrator::new(config)
        .run(&entry_point, |context| async move {
            let reply = context.echo_stub().echo(HARNESS_PROBE).await?;
            if reply != HARNESS_PROBE {
                return Err(HarnessError::orchestration(format!("Echo mismatch: got {reply:?}")));
            }
            process_info!(ProcessId::current(), "✅ Harness echo round trip ok");
            Ok(())
        })
        .await
        .context("End-to-end run aborted")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    outcome.into_result()?;
    logging::log_success(ProcessId::current(), "End-to-end run passed");
    Ok(())
}

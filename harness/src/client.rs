//! Client side of an end-to-end run
//!
//! Runs inside the spawned `echo-client` process: hosts `ClientController`
//! on the control port, reports in through `ClientWaiter`, exercises the
//! payload service and waits for the harness to shut it down.

use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use shared::{process_error, process_info, process_warn, ProcessId};

use crate::config::RetryPolicy;
use crate::control::{ClientControllerService, ClientWaiterStub};
use crate::echo::EchoStub;
use crate::error::{HarnessError, HarnessResult};
use crate::rpc::RpcServer;

/// Text the `echo` scenario sends to the server
pub const ECHO_PROBE: &str = "hello from the client";

/// What the client does between reporting in and shutting down
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// One echo round trip; fails if the reply differs
    Echo,
    /// Report in and wait
    Idle,
    /// Report in, wait, then exit with status 1
    Fail,
    /// Never report in
    Silent,
}

impl Scenario {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Scenario::Echo => "echo",
            Scenario::Idle => "idle",
            Scenario::Fail => "fail",
            Scenario::Silent => "silent",
        }
    }
}

/// Command line of the client process
#[derive(Parser, Debug, Clone)]
#[command(name = "echo-client")]
#[command(about = "Client process driven by the end-to-end harness")]
pub struct ClientArgs {
    /// Port to host the ClientController service on
    #[arg(long = "client_control_port")]
    pub client_control_port: u16,

    /// Port of the harness's RPC server
    #[arg(long = "server_port")]
    pub server_port: u16,

    /// Behaviour between start notification and shutdown
    #[arg(long, value_enum, default_value = "echo")]
    pub scenario: Scenario,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Run the client to completion and return its exit code
pub async fn run_client(args: ClientArgs) -> HarnessResult<i32> {
    let control_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.client_control_port));
    let (controller, mut shutdown_rx) = ClientControllerService::new();

    let mut server = RpcServer::bind(control_addr)?;
    server.add_service(Arc::new(controller));

    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(Some(ready_tx), async move {
        let _ = stop_rx.await;
    }));
    ready_rx
        .await
        .map_err(|_| HarnessError::orchestration("Control server exited before accepting"))?;

    let interrupts = watch_interrupts()?;

    let mut failed = false;
    if args.scenario != Scenario::Silent {
        ClientWaiterStub::new(args.server_port, RetryPolicy::default())
            .client_started()
            .await?;
        process_info!(ProcessId::current(), "📣 Notified server on port {}", args.server_port);
    }

    if args.scenario == Scenario::Echo {
        let stub = EchoStub::new(args.server_port, RetryPolicy::default());
        match stub.echo(ECHO_PROBE).await {
            Ok(reply) if reply == ECHO_PROBE => {
                process_info!(ProcessId::current(), "✅ Echo round trip ok");
            }
            Ok(reply) => {
                process_error!(ProcessId::current(), "❌ Echo mismatch: got {:?}", reply);
                failed = true;
            }
            Err(e) => {
                process_error!(ProcessId::current(), "❌ Echo failed: {}", e);
                failed = true;
            }
        }
    }

    if shutdown_rx.wait_for(|requested| *requested).await.is_err() {
        process_warn!(ProcessId::current(), "⚠️ Control service went away before shutdown");
        failed = true;
    }

    // Drain so the Shutdown reply is delivered before the process exits
    let _ = stop_tx.send(());
    match serving.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            process_error!(ProcessId::current(), "❌ Control server failed: {}", e);
            failed = true;
        }
        Err(e) => {
            process_error!(ProcessId::current(), "❌ Control server task failed: {}", e);
            failed = true;
        }
    }

    let received = interrupts.load(Ordering::SeqCst);
    if received > 0 {
        process_info!(ProcessId::current(), "📶 Handled {} interrupt signal(s)", received);
    }

    Ok(if failed || args.scenario == Scenario::Fail { 1 } else { 0 })
}

/// Count SIGINTs instead of dying on them, so the harness can signal the
/// client and still shut it down over the control channel.
///
/// The handler is installed before this returns.
#[cfg(unix)]
fn watch_interrupts() -> HarnessResult<Arc<AtomicU32>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupts = signal(SignalKind::interrupt())?;
    let count = Arc::new(AtomicU32::new(0));
    let counter = count.clone();
    tokio::spawn(async move {
        while interrupts.recv().await.is_some() {
            let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
            process_info!(ProcessId::current(), "📶 Interrupt received ({}), still serving", seen);
        }
    });
    Ok(count)
}

#[cfg(not(unix))]
fn watch_interrupts() -> HarnessResult<Arc<AtomicU32>> {
    let count = Arc::new(AtomicU32::new(0));
    let counter = count.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    Ok(count)
}

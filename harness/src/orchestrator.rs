//! Test orchestrator: sequences server startup, client launch, the start
//! handshake, the test body and teardown.
//!
//! Stages advance strictly in order:
//! `Init → ServerRunning → ClientLaunched → ClientReady → TestBody →
//! ShuttingDown → Done`. A step invoked out of order fails with
//! `OrchestrationError`. On any fatal error `run` still kills and reaps the
//! client and stops the server before returning the error.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

use shared::{process_debug, process_error, process_info, process_warn, ProcessId};

use crate::config::{HarnessConfig, RetryPolicy};
use crate::echo::EchoStub;
use crate::error::{HarnessError, HarnessResult};
use crate::launcher::{ClientEntryPoint, ClientProcessHandle, ClientProcessLauncher};
use crate::server_runner::ServerRunner;

/// Orchestrator lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ServerRunning,
    ClientLaunched,
    ClientReady,
    TestBody,
    ShuttingDown,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub run_id: Uuid,
    /// `None` when the client was terminated by a signal
    pub client_exit_code: Option<i32>,
    pub server_stopped: bool,
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        self.client_exit_code == Some(0) && self.server_stopped
    }

    /// Turn a non-zero client exit into `ClientFailure`
    pub fn into_result(self) -> HarnessResult<Self> {
        if self.client_exit_code != Some(0) {
            return Err(HarnessError::ClientFailure {
                exit_code: self.client_exit_code,
            });
        }
        if !self.server_stopped {
            return Err(HarnessError::orchestration("Server not stopped"));
        }
        Ok(self)
    }
}

/// What the test body gets to work with
#[derive(Debug, Clone)]
pub struct TestContext {
    pub run_id: Uuid,
    pub server_port: u16,
    pub client_pid: u32,
    pub client_control_port: u16,
    retry: RetryPolicy,
    client_reaped: Arc<AtomicBool>,
}

impl TestContext {
    /// Stub for the payload service hosted by the in-process server
    pub fn echo_stub(&self) -> EchoStub {
        EchoStub::new(self.server_port, self.retry)
    }

    /// Send a signal to the client process; refused once the orchestrator
    /// has reaped it
    #[cfg(unix)]
    pub fn signal_client(&self, signal: nix::sys::signal::Signal) -> HarnessResult<()> {
        crate::launcher::signal_unreaped(self.client_pid, &self.client_reaped, signal)
    }
}

/// Drives one end-to-end run; not reusable once `Done`
pub struct TestOrchestrator {
    config: HarnessConfig,
    run_id: Uuid,
    stage: Stage,
    launcher: ClientProcessLauncher,
    server: Option<ServerRunner>,
    client: Option<ClientProcessHandle>,
}

impl TestOrchestrator {
    pub fn new(config: HarnessConfig) -> Self {
        let launcher = ClientProcessLauncher::new(&config);
        Self {
            config,
            run_id: Uuid::new_v4(),
            stage: Stage::Init,
            launcher,
            server: None,
            client: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn expect_stage(&self, expected: Stage, action: &str) -> HarnessResult<()> {
        if self.stage != expected {
            return Err(HarnessError::orchestration(format!(
                "Cannot {action} in stage {} (expected {expected})",
                self.stage
            )));
        }
        Ok(())
    }

    fn advance(&mut self, next: Stage) {
        process_debug!(ProcessId::current(), run = %self.run_id, "➡️ {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn server(&self) -> HarnessResult<&ServerRunner> {
        self.server
            .as_ref()
            .ok_or_else(|| HarnessError::orchestration("No server running"))
    }

    fn client_mut(&mut self) -> HarnessResult<&mut ClientProcessHandle> {
        self.client
            .as_mut()
            .ok_or_else(|| HarnessError::orchestration("No client launched"))
    }

    /// `Init → ServerRunning`; returns the server port
    pub async fn start_server(&mut self) -> HarnessResult<u16> {
        self.expect_stage(Stage::Init, "start server")?;

        let server = ServerRunner::start(&self.config).await?;
        let port = server.port();
        self.server = Some(server);
        self.advance(Stage::ServerRunning);
        Ok(port)
    }

    /// `ServerRunning → ClientLaunched`; returns the client PID
    pub fn launch_client(&mut self, entry_point: &ClientEntryPoint) -> HarnessResult<u32> {
        self.expect_stage(Stage::ServerRunning, "launch client")?;

        let server_port = self.server()?.port();
        let client = self.launcher.launch(entry_point, server_port)?;
        let pid = client.pid();
        self.client = Some(client);
        self.advance(Stage::ClientLaunched);
        Ok(pid)
    }

    /// `ClientLaunched → ClientReady`; blocks until the client reports in
    pub async fn await_client_ready(&mut self) -> HarnessResult<()> {
        self.expect_stage(Stage::ClientLaunched, "await client")?;

        self.server()?.await_client_started().await?;
        self.advance(Stage::ClientReady);
        Ok(())
    }

    /// `ClientReady → TestBody`
    pub fn enter_test_body(&mut self) -> HarnessResult<TestContext> {
        self.expect_stage(Stage::ClientReady, "enter test body")?;

        let server_port = self.server()?.port();
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| HarnessError::orchestration("No client launched"))?;
        let context = TestContext {
            run_id: self.run_id,
            server_port,
            client_pid: client.pid(),
            client_control_port: client.control_port(),
            retry: self.config.retry,
            client_reaped: client.reaped_flag(),
        };
        self.advance(Stage::TestBody);
        Ok(context)
    }

    /// `TestBody → ShuttingDown → Done`
    ///
    /// Asks the client to shut down, waits for it to exit, then stops the
    /// server. A non-zero client exit is reported in the outcome, not as an
    /// error, including a client that exited before it was asked to.
    pub async fn shutdown(&mut self) -> HarnessResult<TestOutcome> {
        self.expect_stage(Stage::TestBody, "shut down")?;
        self.advance(Stage::ShuttingDown);

        let exit_timeout = self.config.exit_timeout;
        let client_exit_code = self.client_mut()?.shutdown(exit_timeout).await?;
        self.client = None;

        if client_exit_code != Some(0) {
            process_warn!(
                ProcessId::current(),
                run = %self.run_id,
                "⚠️ Client exited with {:?}",
                client_exit_code
            );
        }

        let server = self
            .server
            .take()
            .ok_or_else(|| HarnessError::orchestration("No server running"))?;
        server.stop().await?;

        self.advance(Stage::Done);
        Ok(TestOutcome {
            run_id: self.run_id,
            client_exit_code,
            server_stopped: true,
        })
    }

    /// Best-effort cleanup after a fatal error: kill and reap the client,
    /// then stop the server.
    pub async fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.kill().await {
                process_error!(ProcessId::current(), run = %self.run_id, "❌ Failed to kill client: {}", e);
            }
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.stop().await {
                process_error!(ProcessId::current(), run = %self.run_id, "❌ Failed to stop server: {}", e);
            }
        }
        self.stage = Stage::Done;
    }

    /// Run the whole sequence with `body` as the test body
    pub async fn run<F, Fut>(mut self, entry_point: &ClientEntryPoint, body: F) -> HarnessResult<TestOutcome>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        process_info!(ProcessId::current(), run = %self.run_id, "🚀 Starting end-to-end run");

        let result = self.drive(entry_point, body).await;
        match &result {
            Ok(outcome) => {
                process_info!(
                    ProcessId::current(),
                    run = %self.run_id,
                    "🏁 Run finished, client exit code {:?}",
                    outcome.client_exit_code
                );
            }
            Err(e) => {
                process_error!(ProcessId::current(), run = %self.run_id, "❌ Run aborted in stage {}: {}", self.stage, e);
                self.teardown().await;
            }
        }
        result
    }

    async fn drive<F, Fut>(&mut self, entry_point: &ClientEntryPoint, body: F) -> HarnessResult<TestOutcome>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        self.start_server().await?;
        self.launch_client(entry_point)?;
        self.await_client_ready().await?;
        let context = self.enter_test_body()?;
        body(context).await?;
        self.shutdown().await
    }
}

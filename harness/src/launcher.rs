//! Client process spawning and control
//!
//! Reserves a control port for the client, spawns the client with
//! `--client_control_port` and `--server_port`, and hands back a handle
//! holding the child and a `ClientController` stub.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};

use shared::{process_debug, process_info, process_warn, ProcessId};

use crate::config::{HarnessConfig, RetryPolicy};
use crate::control::ClientControllerStub;
use crate::error::{HarnessError, HarnessResult};

/// Program to run as the client, plus arguments placed before the port flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntryPoint {
    program: PathBuf,
    args: Vec<String>,
}

impl ClientEntryPoint {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add one argument (fluent API)
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments (fluent API)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list handed to the child
    pub fn command_args(&self, control_port: u16, server_port: u16) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("--client_control_port={control_port}"));
        args.push(format!("--server_port={server_port}"));
        args
    }
}

/// Find a free loopback port by binding port 0 and releasing it.
///
/// Another process may grab the port before the client binds it; that race
/// is accepted for test environments.
pub fn reserve_port() -> HarnessResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|source| HarnessError::BindFailure {
        address: "127.0.0.1:0".to_string(),
        source,
    })?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Spawns client processes
#[derive(Debug, Clone)]
pub struct ClientProcessLauncher {
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
    inherit_output: bool,
}

impl ClientProcessLauncher {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            retry: config.retry,
            call_timeout: config.call_timeout,
            inherit_output: config.inherit_client_output,
        }
    }

    /// Spawn `entry_point` as a child told to talk to `server_port`.
    ///
    /// The returned stub is lazy: the child need not be listening yet.
    pub fn launch(&self, entry_point: &ClientEntryPoint, server_port: u16) -> HarnessResult<ClientProcessHandle> {
        let control_port = reserve_port()?;

        let mut cmd = Command::new(entry_point.program());
        cmd.args(entry_point.command_args(control_port, server_port))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd.spawn().map_err(|source| HarnessError::SpawnFailure {
            program: entry_point.program().display().to_string(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        process_info!(
            ProcessId::current(),
            "🧪 Spawned client {} (PID: {}) control port {} -> server port {}",
            entry_point.program().display(),
            pid,
            control_port,
            server_port
        );

        Ok(ClientProcessHandle {
            child,
            pid,
            control_port,
            control: ClientControllerStub::new(control_port, self.retry).with_call_timeout(self.call_timeout),
            reaped: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A running client process and the stub for its control endpoint
#[derive(Debug)]
pub struct ClientProcessHandle {
    child: Child,
    pid: u32,
    control_port: u16,
    control: ClientControllerStub,
    /// Set once the exit status has been collected; the PID may be reused after
    reaped: Arc<AtomicBool>,
}

impl ClientProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn control(&self) -> &ClientControllerStub {
        &self.control
    }

    /// Shared flag that turns true once the client has been reaped
    pub fn reaped_flag(&self) -> Arc<AtomicBool> {
        self.reaped.clone()
    }

    fn mark_reaped(&self, status: ExitStatus) -> ExitStatus {
        self.reaped.store(true, Ordering::SeqCst);
        status
    }

    /// Exit status if the client has already exited, without blocking
    pub fn try_wait(&mut self) -> HarnessResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?.map(|status| self.mark_reaped(status)))
    }

    /// Ask the client to shut down over the control channel and wait for it
    /// to exit, returning its exit code.
    ///
    /// A client that exits before or during the request is not an error:
    /// its exit code is returned and the failed control call is dropped.
    pub async fn shutdown(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<i32>> {
        if let Some(status) = self.try_wait()? {
            process_warn!(
                ProcessId::current(),
                "⚠️ Client {} exited with {} before shutdown was requested",
                self.pid,
                status
            );
            return Ok(status.code());
        }

        let requested = tokio::select! {
            result = self.control.shutdown() => result,
            status = self.child.wait() => {
                let status = self.mark_reaped(status?);
                process_warn!(ProcessId::current(), "⚠️ Client {} exited with {} during shutdown", self.pid, status);
                return Ok(status.code());
            }
        };

        if let Err(e) = requested {
            return match self.try_wait()? {
                Some(status) => Ok(status.code()),
                None => Err(e),
            };
        }
        self.wait(timeout).await
    }

    /// Wait for the child to exit and return its exit code (`None` if it was
    /// terminated by a signal).
    pub async fn wait(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<i32>> {
        let status = match timeout {
            Some(after) => tokio::time::timeout(after, self.child.wait())
                .await
                .map_err(|_| HarnessError::timeout(format!("client process {} to exit", self.pid), after))??,
            None => self.child.wait().await?,
        };

        let status = self.mark_reaped(status);
        process_debug!(ProcessId::current(), "🏁 Client {} exited with {}", self.pid, status);
        Ok(status.code())
    }

    /// Send a signal to the client
    #[cfg(unix)]
    pub fn signal(&self, signal: nix::sys::signal::Signal) -> HarnessResult<()> {
        signal_unreaped(self.pid, &self.reaped, signal)
    }

    /// Kill the client if it is still running and reap it
    pub async fn kill(&mut self) -> HarnessResult<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        process_warn!(ProcessId::current(), "🔨 Force killing client {}", self.pid);
        self.child.kill().await?;
        self.reaped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Signal `pid` unless it has been reaped.
///
/// An unreaped child keeps its PID even after exiting, so the signal cannot
/// reach an unrelated process.
#[cfg(unix)]
pub(crate) fn signal_unreaped(pid: u32, reaped: &AtomicBool, signal: nix::sys::signal::Signal) -> HarnessResult<()> {
    if reaped.load(Ordering::SeqCst) {
        return Err(HarnessError::orchestration(format!(
            "Client {pid} already exited, cannot send {signal}"
        )));
    }
    send_signal(pid, signal)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> HarnessResult<()> {
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| HarnessError::orchestration(format!("Invalid client PID {pid}")))?;
    nix::sys::signal::kill(Pid::from_raw(raw), signal).map_err(|errno| HarnessError::IoError(errno.into()))?;
    process_debug!(ProcessId::current(), "📶 Sent {} to client {}", signal, pid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_port_is_bindable() {
        let port = reserve_port().unwrap();
        assert_ne!(port, 0);
        // Released again, so it can normally be bound right away
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn test_port_flags_follow_entry_point_args() {
        let entry = ClientEntryPoint::new("/bin/client").with_args(["--scenario", "idle"]);

        assert_eq!(
            entry.command_args(4100, 4200),
            vec![
                "--scenario".to_string(),
                "idle".to_string(),
                "--client_control_port=4100".to_string(),
                "--server_port=4200".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let launcher = ClientProcessLauncher::new(&HarnessConfig::default());
        let entry = ClientEntryPoint::new("/definitely/not/a/client");

        let result = launcher.launch(&entry, 1);
        assert!(matches!(result, Err(HarnessError::SpawnFailure { .. })));
    }

    #[tokio::test]
    async fn test_non_executable_file_is_spawn_failure() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = ClientProcessLauncher::new(&HarnessConfig::default());

        let result = launcher.launch(&ClientEntryPoint::new(file.path()), 1);
        assert!(matches!(result, Err(HarnessError::SpawnFailure { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let launcher = ClientProcessLauncher::new(&HarnessConfig::default().with_inherit_client_output(false));
        // `sh -c 'exit 3' <port flags>`: the flags become positional parameters
        let entry = ClientEntryPoint::new("/bin/sh").with_args(["-c", "exit 3"]);

        let mut handle = launcher.launch(&entry, 1).unwrap();
        let code = handle.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_timeout_then_kill() {
        let launcher = ClientProcessLauncher::new(&HarnessConfig::default().with_inherit_client_output(false));
        let entry = ClientEntryPoint::new("/bin/sh").with_args(["-c", "sleep 30"]);

        let mut handle = launcher.launch(&entry, 1).unwrap();
        let result = handle.wait(Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));

        handle.kill().await.unwrap();
        let code = handle.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_of_exited_client_returns_exit_code() {
        let launcher = ClientProcessLauncher::new(&HarnessConfig::default().with_inherit_client_output(false));
        let entry = ClientEntryPoint::new("/bin/sh").with_args(["-c", "exit 3"]);

        let mut handle = launcher.launch(&entry, 1).unwrap();
        // Nothing listens on the control port; the exit must win over the retries
        let started = std::time::Instant::now();
        let code = handle.shutdown(Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(code, Some(3));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(handle.reaped_flag().load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_after_reap_is_refused() {
        use nix::sys::signal::Signal;

        let launcher = ClientProcessLauncher::new(&HarnessConfig::default().with_inherit_client_output(false));
        let entry = ClientEntryPoint::new("/bin/sh").with_args(["-c", "sleep 30"]);

        let mut handle = launcher.launch(&entry, 1).unwrap();
        assert!(handle.signal(Signal::SIGCONT).is_ok());

        handle.kill().await.unwrap();
        assert!(matches!(
            handle.signal(Signal::SIGINT),
            Err(HarnessError::OrchestrationError { .. })
        ));
    }
}

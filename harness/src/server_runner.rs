//! Runs the payload RPC server on a dedicated thread
//!
//! The serve loop gets its own thread and tokio runtime, so it keeps serving
//! while the driver blocks on the startup latch or on the client process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::oneshot;

use shared::{process_debug, process_info, ProcessId};

use crate::config::HarnessConfig;
use crate::control::ClientWaiterService;
use crate::echo::EchoService;
use crate::error::{HarnessError, HarnessResult};
use crate::latch::StartupLatch;
use crate::rpc::{RpcServer, ServeSummary, ServiceHandler};

type ServeThread = JoinHandle<HarnessResult<ServeSummary>>;

/// A started payload server plus its `ClientWaiter` endpoint
///
/// There is no unstarted state: `start` returns the runner and `stop`
/// consumes it.
pub struct ServerRunner {
    port: u16,
    latch: Arc<StartupLatch>,
    startup_timeout: Option<Duration>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<ServeThread>,
}

impl ServerRunner {
    /// Start a server hosting `EchoService` as the payload service
    pub async fn start(config: &HarnessConfig) -> HarnessResult<Self> {
        Self::start_with_payload(config, Arc::new(EchoService)).await
    }

    /// Bind an ephemeral port, register `payload` and `ClientWaiter`, and run
    /// the serve loop on a new thread. Returns once the server is accepting.
    pub async fn start_with_payload(config: &HarnessConfig, payload: Arc<dyn ServiceHandler>) -> HarnessResult<Self> {
        let latch = Arc::new(StartupLatch::new());

        let mut server =
            RpcServer::bind(SocketAddr::new(config.bind_host, 0))?.with_drain_timeout(config.drain_timeout);
        server.add_service(payload);
        server.add_service(Arc::new(ClientWaiterService::new(latch.clone())));
        let port = server.port();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("rpc-server".to_string())
            .spawn(move || -> HarnessResult<ServeSummary> {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("rpc-server-worker")
                    .enable_all()
                    .build()?;
                runtime.block_on(server.serve(Some(ready_tx), async move {
                    let _ = shutdown_rx.await;
                }))
            })
            .map_err(|e| HarnessError::orchestration(format!("Failed to spawn server thread: {e}")))?;

        if ready_rx.await.is_err() {
            // The thread finished without ever accepting
            let result = join_serve_thread(thread).await;
            return Err(match result {
                Err(e) => e,
                Ok(_) => HarnessError::orchestration("Server exited before it started accepting"),
            });
        }

        process_info!(ProcessId::current(), "🚀 Server running on port {}", port);

        Ok(Self {
            port,
            latch,
            startup_timeout: config.startup_timeout,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True once any client has called `ClientStarted`
    pub fn client_started(&self) -> bool {
        self.latch.is_signaled()
    }

    /// Wait until the client has called `ClientStarted`, bounded by the
    /// configured startup timeout.
    pub async fn await_client_started(&self) -> HarnessResult<()> {
        let latch = self.latch.clone();
        let timeout = self.startup_timeout;

        tokio::task::spawn_blocking(move || latch.wait(timeout))
            .await
            .map_err(|e| HarnessError::orchestration(format!("Startup waiter failed: {e}")))??;

        process_debug!(ProcessId::current(), "✅ Client start notification received");
        Ok(())
    }

    /// Stop accepting, drain, and join the serve thread.
    ///
    /// Fails with `OrchestrationError` if the serve loop did not return
    /// cleanly.
    pub async fn stop(mut self) -> HarnessResult<ServeSummary> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        let thread = self
            .thread
            .take()
            .ok_or_else(|| HarnessError::orchestration("Server thread already joined"))?;

        let summary = join_serve_thread(thread)
            .await
            .map_err(|e| HarnessError::orchestration(format!("Server not stopped: {e}")))?;

        process_info!(
            ProcessId::current(),
            "🛑 Server on port {} stopped ({} connections served)",
            self.port,
            summary.connections
        );
        Ok(summary)
    }
}

impl Drop for ServerRunner {
    fn drop(&mut self) {
        // Dropped without stop (e.g. a panicking test): let the thread wind down
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

async fn join_serve_thread(thread: ServeThread) -> HarnessResult<ServeSummary> {
    let joined = tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(|e| HarnessError::orchestration(format!("Failed to join server thread: {e}")))?;

    match joined {
        Ok(result) => result,
        Err(_) => Err(HarnessError::orchestration("Server thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::control::ClientWaiterStub;
    use crate::echo::EchoStub;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> HarnessConfig {
        HarnessConfig::new()
            .with_bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_startup_timeout(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_port_is_connectable_after_start() {
        let runner = ServerRunner::start(&test_config()).await.unwrap();

        let stream = tokio::net::TcpStream::connect(("127.0.0.1", runner.port())).await;
        assert!(stream.is_ok());
        drop(stream);

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_echo_payload() {
        let runner = ServerRunner::start(&test_config()).await.unwrap();

        let stub = EchoStub::new(runner.port(), RetryPolicy::default());
        assert_eq!(stub.echo("round trip").await.unwrap(), "round trip");

        let summary = runner.stop().await.unwrap();
        assert_eq!(summary.connections, 1);
    }

    #[tokio::test]
    async fn test_notify_unblocks_await() {
        let runner = ServerRunner::start(&test_config()).await.unwrap();
        assert!(!runner.client_started());

        let stub = ClientWaiterStub::new(runner.port(), RetryPolicy::default());
        stub.client_started().await.unwrap();
        stub.client_started().await.unwrap();

        runner.await_client_started().await.unwrap();
        assert!(runner.client_started());
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_await_times_out_without_notify() {
        let config = test_config().with_startup_timeout(Some(Duration::from_millis(50)));
        let runner = ServerRunner::start(&config).await.unwrap();

        let result = runner.await_client_started().await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_port() {
        let runner = ServerRunner::start(&test_config()).await.unwrap();
        let port = runner.port();

        runner.stop().await.unwrap();

        let stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
        assert!(stream.is_err());
    }
}

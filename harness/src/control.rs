//! Control channel services and stubs
//!
//! `ClientWaiter` lives on the harness side and flips the startup latch when
//! the client reports in. `ClientController` lives in the client process and
//! lets the harness end the client's run.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use shared::{client_controller, client_waiter, process_debug, process_info, ProcessId, RpcStatus, Void};

use crate::config::RetryPolicy;
use crate::error::HarnessResult;
use crate::latch::StartupLatch;
use crate::rpc::{decode_request, encode_reply, RpcClient, ServiceHandler};

/// Hosted by the server: receives the client's start notification
pub struct ClientWaiterService {
    latch: Arc<StartupLatch>,
}

impl ClientWaiterService {
    pub fn new(latch: Arc<StartupLatch>) -> Self {
        Self { latch }
    }
}

#[async_trait]
impl ServiceHandler for ClientWaiterService {
    fn service_name(&self) -> &'static str {
        client_waiter::SERVICE
    }

    async fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, RpcStatus> {
        match method {
            client_waiter::CLIENT_STARTED => {
                let _: Void = decode_request(payload)?;
                self.latch.signal();
                process_info!(ProcessId::current(), "📣 Client reported started");
                encode_reply(&Void)
            }
            other => Err(RpcStatus::unimplemented(format!("{}.{}", client_waiter::SERVICE, other))),
        }
    }
}

/// Hosted by the client: receives the harness's shutdown request
///
/// The handler only records the request; the hosting process exits after
/// its server has drained, so the reply reaches the caller first.
pub struct ClientControllerService {
    shutdown_tx: watch::Sender<bool>,
}

impl ClientControllerService {
    /// Create the service and the receiver that observes shutdown requests
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (Self { shutdown_tx }, shutdown_rx)
    }
}

#[async_trait]
impl ServiceHandler for ClientControllerService {
    fn service_name(&self) -> &'static str {
        client_controller::SERVICE
    }

    async fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, RpcStatus> {
        match method {
            client_controller::SHUTDOWN => {
                let _: Void = decode_request(payload)?;
                self.shutdown_tx.send_replace(true);
                process_debug!(ProcessId::current(), "🛑 Shutdown requested over control channel");
                encode_reply(&Void)
            }
            other => Err(RpcStatus::unimplemented(format!("{}.{}", client_controller::SERVICE, other))),
        }
    }
}

/// Stub for `ClientWaiter`, used by the client process
#[derive(Debug, Clone)]
pub struct ClientWaiterStub {
    client: RpcClient,
}

impl ClientWaiterStub {
    pub fn new(server_port: u16, retry: RetryPolicy) -> Self {
        Self {
            client: RpcClient::localhost(server_port, retry),
        }
    }

    pub async fn client_started(&self) -> HarnessResult<()> {
        let _: Void = self
            .client
            .call(client_waiter::SERVICE, client_waiter::CLIENT_STARTED, &Void)
            .await?;
        Ok(())
    }
}

/// Stub for `ClientController`, used by the harness
#[derive(Debug, Clone)]
pub struct ClientControllerStub {
    client: RpcClient,
}

impl ClientControllerStub {
    pub fn new(control_port: u16, retry: RetryPolicy) -> Self {
        Self {
            client: RpcClient::localhost(control_port, retry),
        }
    }

    /// Bound each control call once connected (fluent API)
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.client = self.client.with_call_timeout(call_timeout);
        self
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    pub async fn shutdown(&self) -> HarnessResult<()> {
        let _: Void = self
            .client
            .call(client_controller::SERVICE, client_controller::SHUTDOWN, &Void)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{codec, StatusCode};

    fn void_payload() -> Vec<u8> {
        codec::encode(&Void).unwrap()
    }

    #[tokio::test]
    async fn test_client_started_signals_latch() {
        let latch = Arc::new(StartupLatch::new());
        let service = ClientWaiterService::new(latch.clone());

        assert!(!latch.is_signaled());
        service
            .handle(client_waiter::CLIENT_STARTED, &void_payload())
            .await
            .unwrap();
        assert!(latch.is_signaled());

        // Second notification is harmless
        service
            .handle(client_waiter::CLIENT_STARTED, &void_payload())
            .await
            .unwrap();
        assert!(latch.is_signaled());
    }

    #[tokio::test]
    async fn test_waiter_rejects_unknown_method() {
        let service = ClientWaiterService::new(Arc::new(StartupLatch::new()));

        let status = service.handle("ClientStopped", &void_payload()).await.unwrap_err();
        assert_eq!(status.code, StatusCode::Unimplemented);
    }

    #[tokio::test]
    async fn test_shutdown_flips_receiver() {
        let (service, mut shutdown_rx) = ClientControllerService::new();
        assert!(!*shutdown_rx.borrow());

        service
            .handle(client_controller::SHUTDOWN, &void_payload())
            .await
            .unwrap();

        shutdown_rx.wait_for(|requested| *requested).await.unwrap();
        assert!(*shutdown_rx.borrow());
    }
}

//! Lazy RPC client stub with connect retry

use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use shared::{codec, process_debug, process_warn, ProcessId, RpcRequest, RpcResponse};

use crate::config::RetryPolicy;
use crate::error::{HarnessError, HarnessResult};

/// Client for a `host:port` endpoint, plaintext and unauthenticated.
///
/// Nothing is connected until the first call; every call uses a fresh
/// connection so a peer that restarts or is not listening yet is retried
/// transparently within the retry budget. The exchange after connecting
/// is bounded separately by the call timeout.
#[derive(Debug, Clone)]
pub struct RpcClient {
    address: String,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(address: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            address: address.into(),
            retry,
            call_timeout: None,
        }
    }

    /// Configure the request/response deadline (fluent API)
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Client for `localhost:<port>`
    pub fn localhost(port: u16, retry: RetryPolicy) -> Self {
        Self::new(format!("localhost:{port}"), retry)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect with capped exponential backoff until the retry budget runs out
    async fn connect(&self) -> HarnessResult<TcpStream> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            let backoff = self.retry.backoff_for(attempts);
            attempts += 1;

            match TcpStream::connect(self.address.as_str()).await {
                Ok(stream) => {
                    if attempts > 1 {
                        process_debug!(
                            ProcessId::current(),
                            "🔗 Connected to {} after {} attempts",
                            self.address,
                            attempts
                        );
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    if started.elapsed() + backoff >= self.retry.budget {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Giving up on {} after {} attempts: {}",
                            self.address,
                            attempts,
                            e
                        );
                        return Err(HarnessError::ClientUnreachable {
                            address: self.address.clone(),
                            attempts,
                        });
                    }
                    process_debug!(
                        ProcessId::current(),
                        "⏳ {} not ready ({}), retrying in {:?}",
                        self.address,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Invoke `service.method` with `request` and decode the reply
    pub async fn call<Req, Resp>(&self, service: &str, method: &str, request: &Req) -> HarnessResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request = RpcRequest::new(service, method, request)?;
        let mut stream = self.connect().await?;

        let exchange = async {
            codec::write_frame(&mut stream, &request).await?;
            codec::read_frame::<_, RpcResponse>(&mut stream).await
        };
        let response = match self.call_timeout {
            Some(after) => tokio::time::timeout(after, exchange).await.map_err(|_| {
                HarnessError::timeout(format!("reply to {service}.{method} from {}", self.address), after)
            })??,
            None => exchange.await?,
        };

        match response {
            RpcResponse::Ok(payload) => Ok(codec::decode(&payload)?),
            RpcResponse::Err(status) => Err(status.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Void;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_no_retry_fails_after_one_attempt() {
        let client = RpcClient::localhost(closed_port(), RetryPolicy::no_retry());

        let result: HarnessResult<Void> = client.call("ClientController", "Shutdown", &Void).await;
        match result {
            Err(HarnessError::ClientUnreachable { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected ClientUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retries_until_budget_exhausted() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            budget: Duration::from_millis(200),
        };
        let client = RpcClient::localhost(closed_port(), policy);

        let started = Instant::now();
        let result: HarnessResult<Void> = client.call("ClientController", "Shutdown", &Void).await;

        assert!(matches!(result, Err(HarnessError::ClientUnreachable { attempts, .. }) if attempts > 1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_silent_peer_hits_call_timeout() {
        // Accepted by the kernel backlog, never read or answered
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = RpcClient::localhost(port, RetryPolicy::no_retry())
            .with_call_timeout(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let result: HarnessResult<Void> = client.call("ClientController", "Shutdown", &Void).await;

        assert!(matches!(result, Err(HarnessError::Timeout { .. })), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[test]
    fn test_localhost_address() {
        let client = RpcClient::localhost(4242, RetryPolicy::default());
        assert_eq!(client.address(), "localhost:4242");
    }
}

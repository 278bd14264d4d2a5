//! RPC server: accepts connections and dispatches calls to registered services

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use shared::{codec, process_debug, process_warn, ProcessId, RpcRequest, RpcResponse, RpcStatus, SharedError};

use crate::error::{HarnessError, HarnessResult};
use crate::rpc::service::ServiceHandler;

type ServiceMap = HashMap<&'static str, Arc<dyn ServiceHandler>>;

/// What happened while the server was serving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections accepted over the server's lifetime
    pub connections: u64,
    /// In-flight connections aborted because draining exceeded the timeout
    pub aborted: usize,
}

/// A bound, not yet serving, RPC server
pub struct RpcServer {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    services: ServiceMap,
    drain_timeout: Duration,
}

impl RpcServer {
    /// Bind to `addr` (port 0 picks an ephemeral port).
    ///
    /// The socket is listening as soon as this returns, so the port is
    /// connectable even before `serve` runs.
    pub fn bind(addr: SocketAddr) -> HarnessResult<Self> {
        let bind_failure = |source| HarnessError::BindFailure {
            address: addr.to_string(),
            source,
        };

        let listener = std::net::TcpListener::bind(addr).map_err(bind_failure)?;
        listener.set_nonblocking(true).map_err(bind_failure)?;
        let local_addr = listener.local_addr().map_err(bind_failure)?;

        Ok(Self {
            listener,
            local_addr,
            services: HashMap::new(),
            drain_timeout: Duration::from_secs(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Configure drain timeout (fluent API)
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Register a service; a later registration under the same name replaces
    /// the earlier one.
    pub fn add_service(&mut self, handler: Arc<dyn ServiceHandler>) {
        let name = handler.service_name();
        if self.services.insert(name, handler).is_some() {
            process_warn!(ProcessId::current(), "⚠️ Service {} registered twice, replacing", name);
        }
    }

    /// Serve until `shutdown` resolves, then stop accepting and drain
    /// in-flight connections.
    ///
    /// `ready` fires once the accept loop is running. Must be called from
    /// within a tokio runtime.
    pub async fn serve<F>(self, ready: Option<oneshot::Sender<SocketAddr>>, shutdown: F) -> HarnessResult<ServeSummary>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::from_std(self.listener)?;
        let services = Arc::new(self.services);
        let mut tasks = JoinSet::new();
        let mut summary = ServeSummary::default();

        process_debug!(
            ProcessId::current(),
            "🌐 RPC server accepting on {} ({} services)",
            self.local_addr,
            services.len()
        );
        if let Some(ready) = ready {
            let _ = ready.send(self.local_addr);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        summary.connections += 1;
                        tasks.spawn(handle_connection(stream, peer, services.clone()));
                    }
                    Err(e) => {
                        process_warn!(ProcessId::current(), "⚠️ Accept failed on {}: {}", self.local_addr, e);
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Stop accepting before draining
        drop(listener);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            summary.aborted = tasks.len();
            process_warn!(
                ProcessId::current(),
                "⚠️ Aborting {} connections still open after {:?}",
                summary.aborted,
                self.drain_timeout
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        process_debug!(
            ProcessId::current(),
            "🛑 RPC server on {} stopped after {} connections",
            self.local_addr,
            summary.connections
        );
        Ok(summary)
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, services: Arc<ServiceMap>) {
    loop {
        let request: RpcRequest = match codec::read_frame(&mut stream).await {
            Ok(request) => request,
            Err(SharedError::ConnectionClosed) => break,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Bad request from {}: {}", peer, e);
                break;
            }
        };

        let response = dispatch(&services, &request).await;
        if let Err(e) = codec::write_frame(&mut stream, &response).await {
            process_warn!(ProcessId::current(), "⚠️ Failed to reply to {}: {}", peer, e);
            break;
        }
    }
}

async fn dispatch(services: &ServiceMap, request: &RpcRequest) -> RpcResponse {
    let Some(handler) = services.get(request.service.as_str()) else {
        return RpcResponse::Err(RpcStatus::unimplemented(format!(
            "unknown service {}",
            request.service
        )));
    };

    process_debug!(ProcessId::current(), "📨 {}.{}", request.service, request.method);
    match handler.handle(&request.method, &request.payload).await {
        Ok(payload) => RpcResponse::Ok(payload),
        Err(status) => RpcResponse::Err(status),
    }
}

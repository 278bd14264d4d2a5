//! Echo payload service

use async_trait::async_trait;

use shared::{echo_server, EchoReply, EchoRequest, RpcStatus};

use crate::config::RetryPolicy;
use crate::error::HarnessResult;
use crate::rpc::{decode_request, encode_reply, RpcClient, ServiceHandler};

/// Replies with the request text unchanged
#[derive(Debug, Default)]
pub struct EchoService;

#[async_trait]
impl ServiceHandler for EchoService {
    fn service_name(&self) -> &'static str {
        echo_server::SERVICE
    }

    async fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, RpcStatus> {
        match method {
            echo_server::ECHO => {
                let request: EchoRequest = decode_request(payload)?;
                encode_reply(&EchoReply {
                    response: request.request,
                })
            }
            other => Err(RpcStatus::unimplemented(format!("{}.{}", echo_server::SERVICE, other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EchoStub {
    client: RpcClient,
}

impl EchoStub {
    pub fn new(server_port: u16, retry: RetryPolicy) -> Self {
        Self {
            client: RpcClient::localhost(server_port, retry),
        }
    }

    pub async fn echo(&self, text: &str) -> HarnessResult<String> {
        let reply: EchoReply = self
            .client
            .call(echo_server::SERVICE, echo_server::ECHO, &EchoRequest::new(text))
            .await?;
        Ok(reply.response)
    }
}

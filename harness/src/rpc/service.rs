//! Service handler abstraction consumed by `RpcServer`

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use shared::{codec, RpcStatus};

/// A service that can be registered with an `RpcServer`
///
/// Implementations own one service name and dispatch on the method name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Name the service is registered under, e.g. `EchoServer`
    fn service_name(&self) -> &'static str;

    /// Handle one call and return the encoded reply
    async fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, RpcStatus>;
}

/// Decode a request payload, mapping failures to `InvalidArgument`
pub fn decode_request<T: DeserializeOwned>(payload: &[u8]) -> Result<T, RpcStatus> {
    codec::decode(payload).map_err(|e| RpcStatus::invalid_argument(e.to_string()))
}

/// Encode a reply, mapping failures to `Internal`
pub fn encode_reply<T: Serialize>(reply: &T) -> Result<Vec<u8>, RpcStatus> {
    codec::encode(reply).map_err(|e| RpcStatus::internal(e.to_string()))
}

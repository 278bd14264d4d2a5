//! Request/response envelopes for unary calls

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec;
use crate::errors::SharedResult;

/// A unary call addressed to `service.method`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub payload: Vec<u8>,
}

impl RpcRequest {
    /// Build a request whose payload is the bincode encoding of `message`
    pub fn new<T: Serialize>(service: &str, method: &str, message: &T) -> SharedResult<Self> {
        Ok(Self {
            service: service.to_string(),
            method: method.to_string(),
            payload: codec::encode(message)?,
        })
    }
}

/// Reply to a unary call
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum RpcResponse {
    Ok(Vec<u8>),
    Err(RpcStatus),
}

/// Status codes a handler can fail with
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    /// No handler for the requested service or method
    Unimplemented,
    /// Payload could not be decoded
    InvalidArgument,
    /// Handler failed
    Internal,
}

/// Error status returned by the remote side
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

//! Echo payload service messages

use serde::{Deserialize, Serialize};

pub mod echo_server {
    pub const SERVICE: &str = "EchoServer";
    pub const ECHO: &str = "Echo";
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EchoRequest {
    pub request: String,
}

impl EchoRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EchoReply {
    pub response: String,
}

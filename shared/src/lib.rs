//! Shared types for the cross-process RPC harness
//!
//! Contains the wire messages, framing and logging used by both the
//! harness process and the spawned client process.

pub mod codec;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Envelopes
    RpcRequest, RpcResponse, RpcStatus, StatusCode,

    // Control channel
    client_controller, client_waiter, Void,

    // Payload service
    echo_server, EchoReply, EchoRequest,
};

//! Message types exchanged between the harness and client processes
//!
//! This module organizes all wire messages by category:
//! - `rpc`: Request/response envelopes and call status
//! - `control`: Orchestration control channel (start notification, shutdown)
//! - `echo`: Payload service under test

pub mod control;
pub mod echo;
pub mod rpc;

pub use control::{client_controller, client_waiter, Void};
pub use echo::{echo_server, EchoReply, EchoRequest};
pub use rpc::{RpcRequest, RpcResponse, RpcStatus, StatusCode};

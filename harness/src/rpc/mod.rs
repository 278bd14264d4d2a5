//! Minimal unary RPC runtime over TCP
//!
//! Each call opens a connection, writes one length-prefixed bincode
//! `RpcRequest` and reads one `RpcResponse`. Servers dispatch on the service
//! name to a registered `ServiceHandler`.

pub mod client;
pub mod server;
pub mod service;

pub use client::RpcClient;
pub use server::{RpcServer, ServeSummary};
pub use service::{decode_request, encode_reply, ServiceHandler};

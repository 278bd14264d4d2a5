//! End-to-end harness for RPC services across process boundaries
//!
//! The harness runs a payload RPC server on a dedicated thread, spawns a
//! client process, waits for the client to report in over a control
//! channel, hands over to a test body, and tears everything down in a fixed
//! order.

pub mod client;
pub mod config;
pub mod control;
pub mod echo;
pub mod error;
pub mod latch;
pub mod launcher;
pub mod orchestrator;
pub mod rpc;
pub mod server_runner;

// Re-export commonly used types
pub use config::{HarnessConfig, RetryPolicy};
pub use control::{ClientControllerService, ClientControllerStub, ClientWaiterService, ClientWaiterStub};
pub use echo::{EchoService, EchoStub};
pub use error::{HarnessError, HarnessResult};
pub use latch::StartupLatch;
pub use launcher::{reserve_port, ClientEntryPoint, ClientProcessHandle, ClientProcessLauncher};
pub use orchestrator::{Stage, TestContext, TestOrchestrator, TestOutcome};
pub use rpc::{RpcClient, RpcServer, ServiceHandler};
pub use server_runner::ServerRunner;

//! Control channel messages
//!
//! `ClientWaiter` is hosted by the server and called by the client once it
//! is ready. `ClientController` is hosted by the client and called by the
//! harness to end the run.

use serde::{Deserialize, Serialize};

/// Empty request/response body
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Void;

pub mod client_waiter {
    pub const SERVICE: &str = "ClientWaiter";
    pub const CLIENT_STARTED: &str = "ClientStarted";
}

pub mod client_controller {
    pub const SERVICE: &str = "ClientController";
    pub const SHUTDOWN: &str = "Shutdown";
}

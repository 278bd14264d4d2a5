//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Global process ID for this process
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Process identifier for each side of an end-to-end run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// Test driver plus the in-process RPC server
    Harness,
    /// Spawned client process
    Client,
}

impl ProcessId {
    /// Initialize the global process ID for the harness
    pub fn init_harness() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Harness)
    }

    /// Initialize the global process ID for a client process
    pub fn init_client() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Client)
    }

    /// Get the global process ID, defaulting to the harness when uninitialized
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Harness)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Harness => write!(f, "harness"),
            ProcessId::Client => write!(f, "client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId::Harness.to_string(), "harness");
        assert_eq!(ProcessId::Client.to_string(), "client");
    }

    #[test]
    fn test_current_is_stable() {
        let first = *ProcessId::current();
        // A later init cannot change an already-initialized id
        let second = *ProcessId::init_client();
        assert_eq!(first, second);
    }
}

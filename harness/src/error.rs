//! Harness error types

use shared::{RpcStatus, SharedError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to bind RPC server to {address}: {source}")]
    BindFailure {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn client process {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("RPC endpoint {address} unreachable after {attempts} attempts")]
    ClientUnreachable { address: String, attempts: u32 },

    #[error("Client process failed with exit code {exit_code:?}")]
    ClientFailure { exit_code: Option<i32> },

    #[error("Orchestration error: {message}")]
    OrchestrationError { message: String },

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Remote call failed: {0}")]
    Rpc(RpcStatus),

    #[error("Protocol error: {0}")]
    Protocol(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl HarnessError {
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::OrchestrationError {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Errors that abort the run, as opposed to a client reporting failure
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HarnessError::ClientFailure { .. })
    }
}

impl From<RpcStatus> for HarnessError {
    fn from(status: RpcStatus) -> Self {
        HarnessError::Rpc(status)
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

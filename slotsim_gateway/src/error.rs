//! Error types for the engine gateway boundary.

use crate::gateway::CommandKind;
use thiserror::Error;

/// Errors that can occur when issuing a command to the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The engine rejected or could not execute the command
    #[error("engine rejected {command}: {reason}")]
    Rejected {
        command: CommandKind,
        reason: String,
    },

    /// The bounded wait on an acknowledgement elapsed
    #[error("{command} timed out after {elapsed_ms}ms")]
    Timeout {
        command: CommandKind,
        elapsed_ms: u64,
    },

    /// The connection to the engine is gone
    #[error("engine connection closed")]
    Disconnected,
}

impl GatewayError {
    /// Creates a rejection for the given command.
    pub fn rejected(command: CommandKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            reason: reason.into(),
        }
    }

    /// Creates a timeout for the given command.
    pub fn timeout(command: CommandKind, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            command,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

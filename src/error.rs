//! Error handling for the debugger core.

use thiserror::Error;

/// Main error type for the debugger core.
///
/// Every failure path through the core resolves to one of these variants;
/// the dispatcher (`dispatch`) turns them into dialect-specific error
/// responses (`spec.md` §7).
#[derive(Debug, Error)]
pub enum DebuggerError {
    /// No debuggee is attached or launched.
    #[error("no process: {0}")]
    NoProcess(String),

    /// The command is not valid in the current process state.
    #[error("wrong state: {0}")]
    WrongState(String),

    /// Malformed breakpoint spec, bad id, missing required argument, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying native runtime API returned a failure status.
    #[error("runtime failure (status=0x{status:08x}): {message}")]
    RuntimeFailure { status: u32, message: String },

    /// A command exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// Explicit cancel, or displaced by a queue-cancelling command.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure on the wire.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DebuggerError>;

impl DebuggerError {
    pub fn no_process(msg: impl Into<String>) -> Self {
        DebuggerError::NoProcess(msg.into())
    }

    pub fn wrong_state(msg: impl Into<String>) -> Self {
        DebuggerError::WrongState(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DebuggerError::InvalidArgument(msg.into())
    }

    pub fn runtime_failure(status: u32, msg: impl Into<String>) -> Self {
        DebuggerError::RuntimeFailure {
            status,
            message: msg.into(),
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        DebuggerError::Cancelled(msg.into())
    }

    /// Render the message the way the dispatcher puts it on the wire when a
    /// command has no more specific message of its own (`spec.md` §7: every
    /// failed command yields `"Failed command '<name>': 0x<status>"`).
    pub fn status_code(&self) -> u32 {
        match self {
            DebuggerError::NoProcess(_) => 0x8000_0001,
            DebuggerError::WrongState(_) => 0x8000_0002,
            DebuggerError::InvalidArgument(_) => 0x8000_0003,
            DebuggerError::RuntimeFailure { status, .. } => *status,
            DebuggerError::Timeout => 0x8000_0004,
            DebuggerError::Cancelled(_) => 0x8000_0005,
            DebuggerError::Io(_) => 0x8000_0006,
            DebuggerError::Json(_) => 0x8000_0007,
        }
    }

    pub fn failed_command_message(&self, command: &str) -> String {
        format!("Failed command '{}': 0x{:08x}", command, self.status_code())
    }
}

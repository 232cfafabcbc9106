//! Error types for pmlink-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Agent-Signalled Errors
// =============================================================================

/// An error status signalled by the agent itself, either as an ErrorResult
/// PDU or as a per-metric code inside a fetch value set.
///
/// These are ordinary expected outcomes ("no such metric") and never make the
/// connection suspect. Codes outside the named set pass through unchanged;
/// their meaning is owned by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError(pub i32);

impl AgentError {
    /// Unspecified agent failure.
    pub const GENERIC: AgentError = AgentError(-12345);
    /// The metric identifier is unknown to the agent.
    pub const NO_SUCH_METRIC: AgentError = AgentError(-12346);
    /// The instance domain identifier is unknown to the agent.
    pub const NO_SUCH_INDOM: AgentError = AgentError(-12347);
    /// The instance is not present in the instance domain.
    pub const NO_SUCH_INSTANCE: AgentError = AgentError(-12348);
    /// A supplied value was malformed or out of range.
    pub const BAD_VALUE: AgentError = AgentError(-12349);
    /// A supplied value has the wrong type for the metric.
    pub const TYPE_MISMATCH: AgentError = AgentError(-12350);
    /// The operation is not permitted (e.g. store into a read-only metric).
    pub const PERMISSION: AgentError = AgentError(-12351);
    /// The agent does not implement the requested operation.
    pub const NOT_SUPPORTED: AgentError = AgentError(-12352);
    /// Notification that the peer considers the session closed.
    pub const NOT_CONNECTED: AgentError = AgentError(-12353);
    /// Transient agent-side condition; the caller may retry.
    pub const TRY_AGAIN: AgentError = AgentError(-12354);

    /// The raw status code.
    pub fn code(self) -> i32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        match self {
            AgentError::GENERIC => Some("generic agent failure"),
            AgentError::NO_SUCH_METRIC => Some("no such metric"),
            AgentError::NO_SUCH_INDOM => Some("no such instance domain"),
            AgentError::NO_SUCH_INSTANCE => Some("no such instance"),
            AgentError::BAD_VALUE => Some("bad value"),
            AgentError::TYPE_MISMATCH => Some("value type mismatch"),
            AgentError::PERMISSION => Some("operation not permitted"),
            AgentError::NOT_SUPPORTED => Some("not supported by agent"),
            AgentError::NOT_CONNECTED => Some("not connected"),
            AgentError::TRY_AGAIN => Some("try again"),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "agent status {}", self.0),
        }
    }
}

// =============================================================================
// Controller Errors
// =============================================================================

/// Main error type for pmlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Agent subprocess could not be created.
    #[error("cannot start agent {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    /// No loadable module is known under the requested path.
    #[error("module not found: {path}")]
    ModuleNotFound { path: String },

    /// The module exists but does not export the requested entry point.
    #[error("module {path} has no entry point {symbol}")]
    SymbolMissing { path: String, symbol: String },

    /// The module's initialization routine reported failure.
    #[error("module {path} initialization failed with status {status}")]
    ModuleInit { path: String, status: i32 },

    /// Credential exchange failed and strict handshaking was requested.
    #[error("handshake failed: {message}")]
    HandshakeFailed { message: String },

    /// Negotiated interface or protocol version is out of range.
    #[error("unsupported {field} version {value}")]
    VersionMismatch { field: &'static str, value: u32 },

    /// Protocol violation: unexpected PDU tag or malformed exchange.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Connection was closed (by the peer or from another task).
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection is currently open.
    #[error("not connected to an agent")]
    NotConnected,

    /// Another operation is still awaiting its response.
    #[error("operation already in flight on this connection")]
    Busy,

    /// The agent's interface version predates the requested operation.
    #[error("{operation} unsupported by this agent (interface version {interface})")]
    Unsupported {
        operation: &'static str,
        interface: u32,
    },

    /// Store ordering violated: no valid describe+fetch preceded the store.
    #[error("store sequence error: {message}")]
    StoreSequence { message: String },

    /// A value's type does not match the metric descriptor.
    #[error("type mismatch for {metric}: expected {expected}, found {found}")]
    TypeMismatch {
        metric: String,
        expected: String,
        found: String,
    },

    /// Error status signalled by the agent.
    #[error("agent error: {0}")]
    Agent(AgentError),
}

impl Error {
    /// Returns true if this error makes the connection suspect.
    ///
    /// The caller should close (and possibly reopen) the connection rather
    /// than dispatch further operations on it.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Spawn { .. }
                | Error::ModuleNotFound { .. }
                | Error::SymbolMissing { .. }
                | Error::ModuleInit { .. }
                | Error::HandshakeFailed { .. }
                | Error::VersionMismatch { .. }
                | Error::Protocol { .. }
                | Error::Codec { .. }
                | Error::Timeout
                | Error::ConnectionClosed
        )
    }

    /// Returns true if this error is operation-local and the connection
    /// remains usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Agent(_)
                | Error::Unsupported { .. }
                | Error::Busy
                | Error::NotConnected
                | Error::StoreSequence { .. }
                | Error::TypeMismatch { .. }
        )
    }
}

/// Convenience result type for pmlink operations.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

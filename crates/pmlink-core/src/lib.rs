//! pmlink-core: controller-side protocol for performance-metric agents.
//!
//! This crate provides:
//! - Protocol message definitions and wire format codec
//! - Transport bindings (pipe subprocess, Unix/INET/IPv6 socket, in-process module)
//! - Credential/version handshake
//! - Instance-profile cache
//! - The synchronous operation dispatcher
//! - Connection lifecycle management

pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod module;
pub mod profile;
pub mod protocol;
pub mod transport;

pub use connection::{ConnectConfig, Connection, ConnectionKind, ConnectionManager};
pub use dispatch::PreparedStore;
pub use error::{AgentError, Error, Result};
pub use handshake::HandshakeOutcome;
pub use logging::{init_logging, LogFormat};
pub use module::{AgentModule, InitContext};
pub use transport::{CloseHandle, ModuleRegistry};

//! Protocol and configuration constants for pmlink.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u32 = 2;

/// Pre-credential-exchange protocol version, assumed for agents that never
/// complete the version handshake (degraded mode).
pub const PROTOCOL_VERSION_1: u32 = 1;

/// Oldest agent interface generation the dispatcher can drive.
pub const INTERFACE_OLDEST: u32 = 2;

/// Latest agent interface generation.
pub const INTERFACE_LATEST: u32 = 7;

/// Interface generation that introduced the namespace operations
/// (name lookup, children, traversal).
pub const INTERFACE_NAMESPACE: u32 = 4;

/// Interface generation that introduced the attribute exchange.
pub const INTERFACE_ATTRIBUTE: u32 = 6;

/// Interface generation that introduced label metadata.
pub const INTERFACE_LABEL: u32 = 7;

/// Maximum PDU frame size (1 MiB), including the header.
pub const MAX_PDU_SIZE: usize = 1024 * 1024;

// =============================================================================
// Handshake Constants
// =============================================================================

/// Default time to wait for an agent's credential exchange after connect.
pub const DEFAULT_CREDS_TIMEOUT: Duration = Duration::from_secs(3);

//! Capability/version handshake.
//!
//! Two distinct flows, depending on the transport:
//!
//! - **Pipe/Socket**: immediately after connect, the agent is expected to
//!   send a CredentialExchange carrying a Version credential; the controller
//!   replies with its own. An agent that stays silent past the configured
//!   timeout, or sends something else, is assumed to speak the old protocol
//!   and the connection continues in a degraded mode. That fallback keeps
//!   pre-version-exchange agents usable and is not an error by default.
//!
//! - **Module (DSO)**: the controller plants challenge values in the init
//!   context (interface = all bits set, protocol = complement of its own
//!   version), calls the module's init, and reads back what the module wrote.
//!   Anything out of range is fatal to the open attempt.

use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{
    INTERFACE_LATEST, INTERFACE_OLDEST, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};
use crate::module::InitContext;
use crate::protocol::{Credential, CredentialExchange, Pdu};
use crate::transport::FrameStream;

/// Outcome of the credential exchange on a pipe or socket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The agent completed the version exchange.
    Negotiated {
        protocol_version: u32,
        agent_pid: u32,
    },
    /// No usable credential exchange; the connection continues with
    /// pre-exchange protocol semantics.
    Degraded { reason: String },
}

/// Run the controller side of the credential exchange.
///
/// Waits up to `timeout` for the agent's CredentialExchange and answers it
/// with our own version credential. Transport failures (EOF, I/O errors)
/// propagate; a silent or confused agent yields `Degraded`.
pub async fn exchange_credentials(
    stream: &mut FrameStream,
    pid: u32,
    timeout: Duration,
) -> Result<HandshakeOutcome> {
    let frame = match stream.recv_timeout(timeout).await {
        Ok(frame) => frame,
        Err(Error::Timeout) => {
            return Ok(HandshakeOutcome::Degraded {
                reason: format!("no credential exchange within {:?}", timeout),
            });
        }
        Err(e) => return Err(e),
    };

    let creds = match frame.pdu {
        Pdu::CredentialExchange(creds) => creds,
        other => {
            return Ok(HandshakeOutcome::Degraded {
                reason: format!(
                    "expected CredentialExchange, agent sent {}",
                    other.kind_name()
                ),
            });
        }
    };

    let announced = creds.credentials.iter().find_map(|cred| match cred {
        Credential::Version { version } => Some(*version),
    });

    let Some(version) = announced else {
        return Ok(HandshakeOutcome::Degraded {
            reason: "credential exchange carried no version credential".into(),
        });
    };

    // Complete the exchange: tell the agent which version we speak.
    stream
        .send(&Pdu::CredentialExchange(CredentialExchange {
            pid,
            credentials: vec![Credential::Version {
                version: PROTOCOL_VERSION,
            }],
        }))
        .await?;

    let negotiated = version.min(PROTOCOL_VERSION);
    debug!(
        announced = version,
        negotiated,
        agent_pid = creds.pid,
        "credential exchange complete"
    );

    Ok(HandshakeOutcome::Negotiated {
        protocol_version: negotiated,
        agent_pid: creds.pid,
    })
}

/// Build the challenge init context handed to a module's init routine.
///
/// Interface field: all bits set. Protocol field: bitwise complement of the
/// controller's own version. A module that fails to overwrite either has not
/// performed version discovery and is rejected by [`validate_module`].
pub fn module_challenge(domain: u32) -> InitContext {
    InitContext {
        domain,
        interface_version: u32::MAX,
        protocol_version: !PROTOCOL_VERSION,
        status: 0,
    }
}

/// Validate what a module wrote into the challenge fields during init.
///
/// Returns (interface_version, protocol_version) on success. Any failure is
/// fatal to the open attempt.
pub fn validate_module(path: &str, ctx: &InitContext) -> Result<(u32, u32)> {
    if ctx.status != 0 {
        return Err(Error::ModuleInit {
            path: path.to_string(),
            status: ctx.status,
        });
    }

    let interface = ctx.interface_version;
    if interface == u32::MAX || !(INTERFACE_OLDEST..=INTERFACE_LATEST).contains(&interface) {
        warn!(path, interface, "module announced unusable interface version");
        return Err(Error::VersionMismatch {
            field: "interface",
            value: interface,
        });
    }

    if ctx.protocol_version != PROTOCOL_VERSION {
        warn!(
            path,
            protocol = ctx.protocol_version,
            "module announced unusable protocol version"
        );
        return Err(Error::VersionMismatch {
            field: "protocol",
            value: ctx.protocol_version,
        });
    }

    Ok((interface, ctx.protocol_version))
}

// =============================================================================
// Tests
// =============================================================================

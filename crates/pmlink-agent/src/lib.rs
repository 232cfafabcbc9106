//! Agent-side serve loop.
//!
//! Adapts wire PDUs onto an [`AgentModule`], so the same module
//! implementation that backs an in-process (DSO) connection can also run as
//! a pipe subprocess or a socket daemon. The loop serves exactly one
//! controller session: it announces its credentials, answers requests until
//! the controller disconnects or sends its goodbye, then runs the module's
//! end-of-session callback.

pub mod cli;
mod sample;

pub use sample::SampleModule;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info, warn};

use pmlink_core::constants::PROTOCOL_VERSION;
use pmlink_core::error::{AgentError, Error, Result};
use pmlink_core::handshake::module_challenge;
use pmlink_core::module::AgentModule;
use pmlink_core::protocol::{
    AttributeAck, ChildrenResult, Credential, CredentialExchange, ErrorResult, FetchResult,
    InstanceList, LabelSet, NamePmidResult, Pdu, PmidNameResult, StoreAck, Text, TraverseResult,
};
use pmlink_core::transport::FrameStream;

/// Options for one serve session.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Process id stamped into outgoing frame headers.
    pub pid: u32,
    /// Performance domain handed to the module's init routine.
    pub domain: u32,
    /// Send the credential announcement on connect. Disabled, the agent
    /// behaves like one that predates the version exchange.
    pub announce_credentials: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            pid: std::process::id(),
            domain: 29,
            announce_credentials: true,
        }
    }
}

fn ok_or_error(result: std::result::Result<Pdu, AgentError>) -> Pdu {
    result.unwrap_or_else(|e| Pdu::ErrorResult(ErrorResult { error: e }))
}

/// Serve one controller session over the given byte channel.
pub async fn serve<M: AgentModule>(
    mut module: M,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    config: ServeConfig,
) -> Result<()> {
    let mut ctx = module_challenge(config.domain);
    module.init(&mut ctx);
    if ctx.status != 0 {
        return Err(Error::ModuleInit {
            path: "agent module".into(),
            status: ctx.status,
        });
    }
    info!(
        domain = ctx.domain,
        interface = ctx.interface_version,
        "module initialized"
    );

    let mut stream = FrameStream::new(reader, writer, config.pid);
    if config.announce_credentials {
        stream
            .send(&Pdu::CredentialExchange(CredentialExchange {
                pid: config.pid,
                credentials: vec![Credential::Version {
                    version: PROTOCOL_VERSION,
                }],
            }))
            .await?;
    }

    loop {
        let frame = match stream.recv().await {
            Ok(frame) => frame,
            Err(Error::ConnectionClosed) => break,
            Err(e) => return Err(e),
        };

        let reply = match frame.pdu {
            // The controller's half of the version exchange; nothing to do
            // beyond noting it.
            Pdu::CredentialExchange(creds) => {
                debug!(controller_pid = creds.pid, "controller credentials");
                continue;
            }
            // Profile pushes are one-way.
            Pdu::ProfileUpdate(update) => {
                if let Err(e) = module.profile(&update.spec) {
                    warn!(error = %e, "profile update rejected");
                }
                continue;
            }
            Pdu::ErrorResult(e) if e.error == AgentError::NOT_CONNECTED => {
                debug!("controller said goodbye");
                break;
            }
            Pdu::DescriptorRequest(req) => {
                ok_or_error(module.descriptor(req.metric).map(Pdu::Descriptor))
            }
            Pdu::InstanceRequest(req) => ok_or_error(
                module.instances(req.indom, &req.filter).map(|instances| {
                    Pdu::InstanceList(InstanceList {
                        indom: req.indom,
                        instances,
                    })
                }),
            ),
            Pdu::FetchRequest(req) => ok_or_error(
                module
                    .fetch(&req.metrics)
                    .map(|values| Pdu::FetchResult(FetchResult { values })),
            ),
            Pdu::StoreRequest(req) => match module.store(req.metric, &req.values) {
                Ok(()) => Pdu::StoreAck(StoreAck { status: 0 }),
                Err(e) => Pdu::StoreAck(StoreAck { status: e.code() }),
            },
            Pdu::TextRequest(req) => ok_or_error(
                module
                    .text(req.target, req.kind)
                    .map(|text| Pdu::Text(Text { text })),
            ),
            Pdu::LabelRequest(req) => ok_or_error(module.labels(&req.target).map(|labels| {
                Pdu::LabelSet(LabelSet {
                    target: req.target,
                    labels,
                })
            })),
            Pdu::NamePmidRequest(req) => ok_or_error(
                module
                    .lookup_ids(&req.names)
                    .map(|ids| Pdu::NamePmidResult(NamePmidResult { ids })),
            ),
            Pdu::PmidNameRequest(req) => ok_or_error(
                module
                    .lookup_names(req.metric)
                    .map(|names| Pdu::PmidNameResult(PmidNameResult { names })),
            ),
            Pdu::ChildrenRequest(req) => ok_or_error(
                module
                    .children(&req.name)
                    .map(|children| Pdu::ChildrenResult(ChildrenResult { children })),
            ),
            Pdu::TraverseRequest(req) => ok_or_error(
                module
                    .traverse(&req.name)
                    .map(|names| Pdu::TraverseResult(TraverseResult { names })),
            ),
            Pdu::AttributeRequest(req) => match module.attribute(&req.attribute) {
                Ok(()) => Pdu::AttributeAck(AttributeAck { status: 0 }),
                Err(e) => Pdu::AttributeAck(AttributeAck { status: e.code() }),
            },
            other => {
                warn!(pdu = other.kind_name(), "request kind not understood");
                Pdu::ErrorResult(ErrorResult {
                    error: AgentError::GENERIC,
                })
            }
        };

        stream.send(&reply).await?;
    }

    module.end_session();
    info!("session ended");
    Ok(())
}

/// Serve one session over this process's stdin/stdout.
///
/// Logs must go to stderr or a file in this mode; stdout is the protocol
/// channel.
pub async fn serve_stdio<M: AgentModule>(module: M, config: ServeConfig) -> Result<()> {
    serve(
        module,
        Box::new(tokio::io::stdin()),
        Box::new(tokio::io::stdout()),
        config,
    )
    .await
}

/// Accept one connection on a bound Unix-domain listener and serve it.
pub async fn serve_unix_listener<M: AgentModule>(
    listener: UnixListener,
    module: M,
    config: ServeConfig,
) -> Result<()> {
    let (stream, _addr) = listener.accept().await?;
    let (reader, writer) = stream.into_split();
    serve(module, Box::new(reader), Box::new(writer), config).await
}

/// Accept one connection on a bound TCP listener and serve it.
pub async fn serve_tcp<M: AgentModule>(
    listener: TcpListener,
    module: M,
    config: ServeConfig,
) -> Result<()> {
    let (stream, peer) = listener.accept().await?;
    debug!(%peer, "controller connected");
    let (reader, writer) = stream.into_split();
    serve(module, Box::new(reader), Box::new(writer), config).await
}

//! Connection lifecycle: open, handshake, close.
//!
//! A [`ConnectionManager`] holds at most one live [`Connection`]. Opening a
//! new connection implicitly closes the previous one; close itself is
//! idempotent and never fails. Teardown is best-effort throughout: the peer
//! gets a not-connected notification when the transport still works, and
//! every failure on the way down is logged rather than surfaced.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_CREDS_TIMEOUT, INTERFACE_LATEST, INTERFACE_OLDEST, PROTOCOL_VERSION_1,
};
use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeOutcome};
use crate::profile::Profile;
use crate::protocol::{FilterMode, InstanceDomainId, Pdu};
use crate::transport::{
    connect_inet, connect_inet6, connect_unix, spawn_agent, CloseHandle, DsoBinding, FrameStream,
    ModuleRegistry,
};

/// How long teardown waits for the best-effort goodbye notification.
const TEARDOWN_SEND_TIMEOUT: Duration = Duration::from_millis(250);

// =============================================================================
// Configuration
// =============================================================================

/// Options applied when opening connections.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// How long to wait for the agent's credential exchange before falling
    /// back to the degraded protocol.
    pub creds_timeout: Duration,
    /// Treat a degraded handshake as a hard failure instead of falling back.
    pub strict_handshake: bool,
    /// Process id stamped into outgoing frame headers.
    pub pid: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            creds_timeout: DEFAULT_CREDS_TIMEOUT,
            strict_handshake: false,
            pid: std::process::id(),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Transport kind of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// No connection open.
    None,
    /// In-process module.
    Dso,
    /// Agent subprocess over stdin/stdout.
    Pipe,
    /// Unix-domain or loopback TCP socket.
    Socket,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionKind::None => "none",
            ConnectionKind::Dso => "dso",
            ConnectionKind::Pipe => "pipe",
            ConnectionKind::Socket => "socket",
        };
        f.write_str(name)
    }
}

pub(crate) enum Link {
    Dso(DsoBinding),
    Pipe { stream: FrameStream, child: Child },
    Socket { stream: FrameStream },
}

/// One live agent session.
///
/// All operations are synchronous request/response exchanges and take
/// `&mut self`; an in-flight flag additionally rejects overlapping dispatch
/// with [`Error::Busy`] if a future caller ever shares the connection.
pub struct Connection {
    kind: ConnectionKind,
    pub(crate) link: Link,
    pub(crate) interface_version: u32,
    pub(crate) protocol_version: u32,
    name: String,
    pub(crate) profile: Profile,
    /// Changes on every open; store preparations are bound to it.
    pub(crate) epoch: u64,
    in_flight: Arc<AtomicBool>,
}

impl Connection {
    fn from_link(
        kind: ConnectionKind,
        link: Link,
        name: String,
        interface_version: u32,
        protocol_version: u32,
    ) -> Self {
        info!(
            %kind,
            name,
            interface = interface_version,
            protocol = protocol_version,
            "connection open"
        );
        Self {
            kind,
            link,
            interface_version,
            protocol_version,
            name,
            profile: Profile::new(),
            epoch: rand::random(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the credential exchange and report the versions to use.
    async fn negotiate(stream: &mut FrameStream, config: &ConnectConfig) -> Result<(u32, u32)> {
        match handshake::exchange_credentials(stream, config.pid, config.creds_timeout).await? {
            HandshakeOutcome::Negotiated {
                protocol_version, ..
            } => Ok((INTERFACE_LATEST, protocol_version)),
            HandshakeOutcome::Degraded { reason } => {
                if config.strict_handshake {
                    return Err(Error::HandshakeFailed { message: reason });
                }
                warn!(reason, "continuing with degraded protocol");
                Ok((INTERFACE_OLDEST, PROTOCOL_VERSION_1))
            }
        }
    }

    /// Open a socket-kind connection over caller-supplied duplex halves.
    ///
    /// The normal transports are wrappers around this; it is public so tests
    /// and embedders can splice in any byte channel.
    pub async fn open_stream(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        name: impl Into<String>,
        config: &ConnectConfig,
    ) -> Result<Self> {
        let mut stream = FrameStream::new(reader, writer, config.pid);
        let (interface, protocol) = Self::negotiate(&mut stream, config).await?;
        Ok(Self::from_link(
            ConnectionKind::Socket,
            Link::Socket { stream },
            name.into(),
            interface,
            protocol,
        ))
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Human-readable endpoint (executable path, socket address, module path).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface generation the operation dispatcher gates against.
    pub fn interface_version(&self) -> u32 {
        self.interface_version
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Handle that closes this connection from another task, unblocking any
    /// pending read. Module connections have no blocking reads and no handle.
    pub fn close_handle(&self) -> Option<CloseHandle> {
        match &self.link {
            Link::Dso(_) => None,
            Link::Pipe { stream, .. } | Link::Socket { stream } => Some(stream.close_handle()),
        }
    }

    /// Mark the start of a dispatched operation; the guard clears the flag
    /// on drop. Overlap is a caller bug and fails fast.
    pub(crate) fn begin_op(&self) -> Result<OpGuard> {
        OpGuard::acquire(&self.in_flight)
    }

    // =========================================================================
    // Profile Editing
    // =========================================================================

    /// Set the instance filter for one instance domain.
    ///
    /// Takes effect agent-side before the next fetch.
    pub fn set_instance_filter(
        &mut self,
        indom: InstanceDomainId,
        mode: FilterMode,
        instances: Vec<i32>,
    ) {
        self.profile.set_filter(indom, mode, instances);
    }

    /// Drop all per-domain filters and reset the default mode.
    pub fn clear_profile(&mut self, default_mode: FilterMode) {
        self.profile.clear_all(default_mode);
    }

    /// The current (possibly not yet pushed) filter state.
    pub fn profile_spec(&self) -> &crate::protocol::ProfileSpec {
        self.profile.spec()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tear the session down. Best-effort: the peer is notified when
    /// possible, failures are logged, and the call always completes.
    pub async fn close(mut self) {
        info!(kind = %self.kind, name = self.name, "closing connection");
        match &mut self.link {
            Link::Dso(binding) => {
                binding.module.end_session();
            }
            Link::Pipe { stream, child } => {
                goodbye(stream).await;
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "agent subprocess kill failed");
                }
            }
            Link::Socket { stream } => {
                goodbye(stream).await;
            }
        }
    }
}

/// Best-effort teardown notification followed by a write-side shutdown.
async fn goodbye(stream: &mut FrameStream) {
    let pdu = Pdu::not_connected();
    let notify = stream.send(&pdu);
    match tokio::time::timeout(TEARDOWN_SEND_TIMEOUT, notify).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "teardown notification not delivered"),
        Err(_) => debug!("teardown notification timed out"),
    }
    stream.shutdown().await;
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("interface_version", &self.interface_version)
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

/// RAII marker for an operation in flight on a connection.
pub(crate) struct OpGuard {
    flag: Arc<AtomicBool>,
}

impl OpGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Owns the single active connection and the in-process module registry.
pub struct ConnectionManager {
    config: ConnectConfig,
    registry: ModuleRegistry,
    current: Option<Connection>,
}

impl ConnectionManager {
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            registry: ModuleRegistry::new(),
            current: None,
        }
    }

    /// Registry of loadable in-process modules, for registration before
    /// [`open_dso`](Self::open_dso).
    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Kind of the active connection, `None` when nothing is open.
    pub fn kind(&self) -> ConnectionKind {
        self.current
            .as_ref()
            .map_or(ConnectionKind::None, Connection::kind)
    }

    /// The active connection, for dispatching operations.
    pub fn current(&mut self) -> Result<&mut Connection> {
        self.current.as_mut().ok_or(Error::NotConnected)
    }

    /// Close the active connection, if any. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = self.current.take() {
            conn.close().await;
        }
    }

    async fn install(&mut self, conn: Connection) {
        // Opening over a live connection closes the old one first.
        self.close().await;
        self.current = Some(conn);
    }

    /// Spawn an agent subprocess and connect over its stdio.
    pub async fn open_pipe(&mut self, executable: &Path, args: &[String]) -> Result<()> {
        let (mut stream, child) = spawn_agent(executable, args, self.config.pid).await?;
        let (interface, protocol) = Connection::negotiate(&mut stream, &self.config).await?;
        let conn = Connection::from_link(
            ConnectionKind::Pipe,
            Link::Pipe { stream, child },
            executable.display().to_string(),
            interface,
            protocol,
        );
        self.install(conn).await;
        Ok(())
    }

    /// Connect to an agent on a Unix-domain socket.
    pub async fn open_unix(&mut self, path: &Path) -> Result<()> {
        let stream = connect_unix(path, self.config.pid).await?;
        self.install_socket(stream, path.display().to_string()).await
    }

    /// Connect to an agent on the IPv4 loopback.
    pub async fn open_inet(&mut self, port: u16) -> Result<()> {
        let stream = connect_inet(port, self.config.pid).await?;
        self.install_socket(stream, format!("localhost:{port}")).await
    }

    /// Connect to an agent on the IPv6 loopback.
    pub async fn open_inet6(&mut self, port: u16) -> Result<()> {
        let stream = connect_inet6(port, self.config.pid).await?;
        self.install_socket(stream, format!("localhost6:{port}")).await
    }

    async fn install_socket(&mut self, mut stream: FrameStream, name: String) -> Result<()> {
        let (interface, protocol) = Connection::negotiate(&mut stream, &self.config).await?;
        let conn = Connection::from_link(
            ConnectionKind::Socket,
            Link::Socket { stream },
            name,
            interface,
            protocol,
        );
        self.install(conn).await;
        Ok(())
    }

    /// Bind a registered in-process module: resolve, init with challenge
    /// versions, validate what the module wrote back.
    pub async fn open_dso(&mut self, path: &str, symbol: &str, domain: u32) -> Result<()> {
        let mut module = self.registry.resolve(path, symbol)?;
        let mut ctx = handshake::module_challenge(domain);
        module.init(&mut ctx);
        let (interface, protocol) = handshake::validate_module(path, &ctx)?;
        let conn = Connection::from_link(
            ConnectionKind::Dso,
            Link::Dso(DsoBinding {
                module,
                path: path.to_string(),
            }),
            path.to_string(),
            interface,
            protocol,
        );
        self.install(conn).await;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("kind", &self.kind())
            .field("registry", &self.registry)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{INTERFACE_LATEST, PROTOCOL_VERSION};
    use crate::error::AgentError;
    use crate::module::{AgentModule, InitContext};
    use crate::protocol::{
        Credential, CredentialExchange, Descriptor, Instance, InstanceFilter, MetricId,
        ProfileSpec, TextKind, TextTarget, Value, ValueSet,
    };

    struct StubModule {
        interface: u32,
        init_status: i32,
        ended: bool,
    }

    impl StubModule {
        fn new() -> Self {
            Self {
                interface: INTERFACE_LATEST,
                init_status: 0,
                ended: false,
            }
        }
    }

    impl AgentModule for StubModule {
        fn init(&mut self, ctx: &mut InitContext) {
            ctx.interface_version = self.interface;
            ctx.protocol_version = PROTOCOL_VERSION;
            ctx.status = self.init_status;
        }
        fn profile(&mut self, _spec: &ProfileSpec) -> std::result::Result<(), AgentError> {
            Ok(())
        }
        fn descriptor(&mut self, _metric: MetricId) -> std::result::Result<Descriptor, AgentError> {
            Err(AgentError::NO_SUCH_METRIC)
        }
        fn instances(
            &mut self,
            _indom: crate::protocol::InstanceDomainId,
            _filter: &InstanceFilter,
        ) -> std::result::Result<Vec<Instance>, AgentError> {
            Err(AgentError::NO_SUCH_INDOM)
        }
        fn fetch(&mut self, _metrics: &[MetricId]) -> std::result::Result<Vec<ValueSet>, AgentError> {
            Ok(Vec::new())
        }
        fn store(
            &mut self,
            _metric: MetricId,
            _values: &[Value],
        ) -> std::result::Result<(), AgentError> {
            Err(AgentError::PERMISSION)
        }
        fn text(
            &mut self,
            _target: TextTarget,
            _kind: TextKind,
        ) -> std::result::Result<String, AgentError> {
            Ok(String::new())
        }
        fn end_session(&mut self) {
            self.ended = true;
        }
    }

    fn quick_config() -> ConnectConfig {
        ConnectConfig {
            creds_timeout: Duration::from_millis(100),
            ..ConnectConfig::default()
        }
    }

    /// Run an agent-side credential announcement over the far duplex half.
    fn announce_credentials(half: tokio::io::DuplexStream, version: u32) {
        tokio::spawn(async move {
            let (r, w) = tokio::io::split(half);
            let mut stream = FrameStream::new(Box::new(r), Box::new(w), 999);
            stream
                .send(&Pdu::CredentialExchange(CredentialExchange {
                    pid: 999,
                    credentials: vec![Credential::Version { version }],
                }))
                .await
                .unwrap();
            // Keep the channel open until the controller is done with it.
            let _ = stream.recv().await;
            let _ = stream.recv().await;
        });
    }

    #[test]
    fn kind_display() {
        assert_eq!(ConnectionKind::None.to_string(), "none");
        assert_eq!(ConnectionKind::Dso.to_string(), "dso");
        assert_eq!(ConnectionKind::Pipe.to_string(), "pipe");
        assert_eq!(ConnectionKind::Socket.to_string(), "socket");
    }

    #[tokio::test]
    async fn manager_starts_unconnected() {
        let mut manager = ConnectionManager::new(quick_config());
        assert_eq!(manager.kind(), ConnectionKind::None);
        assert!(matches!(manager.current(), Err(Error::NotConnected)));
        // Closing with nothing open is fine, repeatedly.
        manager.close().await;
        manager.close().await;
    }

    #[tokio::test]
    async fn open_stream_negotiates_latest_interface() {
        let (near, far) = tokio::io::duplex(64 * 1024);
        announce_credentials(far, PROTOCOL_VERSION);

        let (r, w) = tokio::io::split(near);
        let conn = Connection::open_stream(Box::new(r), Box::new(w), "test", &quick_config())
            .await
            .unwrap();
        assert_eq!(conn.kind(), ConnectionKind::Socket);
        assert_eq!(conn.interface_version(), INTERFACE_LATEST);
        assert_eq!(conn.protocol_version(), PROTOCOL_VERSION);
        conn.close().await;
    }

    #[tokio::test]
    async fn silent_agent_degrades_to_oldest_interface() {
        let (near, _far) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(near);
        let conn = Connection::open_stream(Box::new(r), Box::new(w), "test", &quick_config())
            .await
            .unwrap();
        assert_eq!(conn.interface_version(), INTERFACE_OLDEST);
        assert_eq!(conn.protocol_version(), PROTOCOL_VERSION_1);
        conn.close().await;
    }

    #[tokio::test]
    async fn strict_handshake_rejects_silent_agent() {
        let (near, _far) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(near);
        let config = ConnectConfig {
            strict_handshake: true,
            ..quick_config()
        };
        let result = Connection::open_stream(Box::new(r), Box::new(w), "test", &config).await;
        assert!(matches!(result, Err(Error::HandshakeFailed { .. })));
    }

    #[tokio::test]
    async fn open_dso_binds_registered_module() {
        let mut manager = ConnectionManager::new(quick_config());
        manager
            .registry_mut()
            .register("/var/lib/pmlink/stub", "stub_init", StubModule::new);

        manager
            .open_dso("/var/lib/pmlink/stub", "stub_init", 29)
            .await
            .unwrap();
        assert_eq!(manager.kind(), ConnectionKind::Dso);
        let conn = manager.current().unwrap();
        assert_eq!(conn.interface_version(), INTERFACE_LATEST);
        assert!(conn.close_handle().is_none());

        manager.close().await;
        assert_eq!(manager.kind(), ConnectionKind::None);
    }

    #[tokio::test]
    async fn open_dso_rejects_failing_init() {
        let mut manager = ConnectionManager::new(quick_config());
        manager.registry_mut().register("/m", "init", || StubModule {
            init_status: -2,
            ..StubModule::new()
        });

        let result = manager.open_dso("/m", "init", 29).await;
        assert!(matches!(result, Err(Error::ModuleInit { status: -2, .. })));
        assert_eq!(manager.kind(), ConnectionKind::None);
    }

    #[tokio::test]
    async fn open_dso_rejects_stale_interface() {
        let mut manager = ConnectionManager::new(quick_config());
        manager.registry_mut().register("/m", "init", || StubModule {
            interface: INTERFACE_OLDEST - 1,
            ..StubModule::new()
        });

        let result = manager.open_dso("/m", "init", 29).await;
        assert!(matches!(
            result,
            Err(Error::VersionMismatch {
                field: "interface",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn reopen_replaces_previous_connection() {
        let mut manager = ConnectionManager::new(quick_config());
        manager
            .registry_mut()
            .register("/a", "init", StubModule::new);
        manager
            .registry_mut()
            .register("/b", "init", StubModule::new);

        manager.open_dso("/a", "init", 29).await.unwrap();
        manager.open_dso("/b", "init", 29).await.unwrap();
        assert_eq!(manager.current().unwrap().name(), "/b");
    }

    #[tokio::test]
    async fn op_guard_rejects_overlap() {
        let mut manager = ConnectionManager::new(quick_config());
        manager
            .registry_mut()
            .register("/m", "init", StubModule::new);
        manager.open_dso("/m", "init", 29).await.unwrap();

        let conn = manager.current().unwrap();
        let guard = conn.begin_op().unwrap();
        assert!(matches!(conn.begin_op(), Err(Error::Busy)));
        drop(guard);
        assert!(conn.begin_op().is_ok());
    }

    #[tokio::test]
    async fn profile_edits_mark_dirty() {
        let mut manager = ConnectionManager::new(quick_config());
        manager
            .registry_mut()
            .register("/m", "init", StubModule::new);
        manager.open_dso("/m", "init", 29).await.unwrap();

        let conn = manager.current().unwrap();
        conn.set_instance_filter(
            crate::protocol::InstanceDomainId::new(29, 1),
            FilterMode::Include,
            vec![0, 2],
        );
        assert_eq!(conn.profile_spec().indoms.len(), 1);
        conn.clear_profile(FilterMode::Include);
        assert!(conn.profile_spec().indoms.is_empty());
    }
}

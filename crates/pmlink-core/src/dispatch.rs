//! Synchronous operation dispatch.
//!
//! Every operation is one request/response exchange (or one direct module
//! call on a DSO connection) and holds the connection's in-flight guard for
//! its duration. Interface gating happens before any I/O or module call: an
//! operation the negotiated interface generation does not cover fails with
//! [`Error::Unsupported`] without touching the agent.
//!
//! The instance profile is flushed lazily: metadata operations never push
//! it, fetch and store push it first whenever it is dirty.
//!
//! Store is a hard-ordered sequence. [`Connection::prepare_store`] runs the
//! describe and fetch legs and yields a [`PreparedStore`] token bound to the
//! connection epoch; [`Connection::commit_store`] validates the token and
//! value type before the store leg runs. [`Connection::store`] composes both
//! for the common case.

use tracing::{debug, trace};

use crate::connection::{Connection, Link};
use crate::constants::{INTERFACE_ATTRIBUTE, INTERFACE_LABEL, INTERFACE_NAMESPACE};
use crate::error::{AgentError, Error, Result};
use crate::protocol::{
    Attribute, AttributeRequest, ChildEntry, ChildrenRequest, Descriptor, DescriptorRequest,
    FetchRequest, Instance, InstanceDomainId, InstanceFilter, InstanceRequest, Label, LabelRequest,
    LabelTarget, MetricId, NamePmidRequest, Pdu, PmidNameRequest, ProfileUpdate, StoreRequest,
    TextKind, TextRequest, TextTarget, TraverseRequest, Value, ValueAtom, ValueSet, ValueType,
};
use crate::transport::FrameStream;

/// Token proving the describe and fetch legs of a store ran on this
/// connection. Invalidated by reconnecting.
#[derive(Debug, Clone)]
pub struct PreparedStore {
    metric: MetricId,
    value_type: ValueType,
    /// Instances holding a value at fetch time; the store writes all of them.
    instances: Vec<Option<i32>>,
    epoch: u64,
}

impl PreparedStore {
    pub fn metric(&self) -> MetricId {
        self.metric
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

/// One request/response exchange. An ErrorResult reply is surfaced as the
/// agent's error; anything else is handed back for shape checking.
async fn exchange(stream: &mut FrameStream, request: Pdu) -> Result<Pdu> {
    trace!(request = request.kind_name(), "dispatching");
    stream.send(&request).await?;
    let frame = stream.recv().await?;
    match frame.pdu {
        Pdu::ErrorResult(e) => Err(Error::Agent(e.error)),
        pdu => Ok(pdu),
    }
}

fn unexpected(expected: &'static str, got: &Pdu) -> Error {
    Error::Protocol {
        message: format!("expected {expected}, agent sent {}", got.kind_name()),
    }
}

impl Connection {
    fn require_interface(&self, operation: &'static str, min: u32) -> Result<()> {
        if self.interface_version < min {
            return Err(Error::Unsupported {
                operation,
                interface: self.interface_version,
            });
        }
        Ok(())
    }

    /// Push the instance profile if the agent has not seen the current state.
    /// The agent does not acknowledge a profile push.
    async fn flush_profile(&mut self) -> Result<()> {
        if !self.profile.is_dirty() {
            return Ok(());
        }
        debug!("pushing instance profile");
        match &mut self.link {
            Link::Dso(binding) => {
                binding
                    .module
                    .profile(self.profile.spec())
                    .map_err(Error::Agent)?;
            }
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                stream
                    .send(&Pdu::ProfileUpdate(ProfileUpdate {
                        spec: self.profile.spec().clone(),
                    }))
                    .await?;
            }
        }
        self.profile.mark_clean();
        Ok(())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Look up the descriptor of one metric.
    pub async fn descriptor(&mut self, metric: MetricId) -> Result<Descriptor> {
        let _guard = self.begin_op()?;
        self.descriptor_inner(metric).await
    }

    async fn descriptor_inner(&mut self, metric: MetricId) -> Result<Descriptor> {
        match &mut self.link {
            Link::Dso(binding) => binding.module.descriptor(metric).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply =
                    exchange(stream, Pdu::DescriptorRequest(DescriptorRequest { metric })).await?;
                match reply {
                    Pdu::Descriptor(desc) => Ok(desc),
                    other => Err(unexpected("Descriptor", &other)),
                }
            }
        }
    }

    /// Enumerate an instance domain, or look up one instance by id or name.
    pub async fn instances(
        &mut self,
        indom: InstanceDomainId,
        filter: InstanceFilter,
    ) -> Result<Vec<Instance>> {
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding
                .module
                .instances(indom, &filter)
                .map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply =
                    exchange(stream, Pdu::InstanceRequest(InstanceRequest { indom, filter }))
                        .await?;
                match reply {
                    Pdu::InstanceList(list) => Ok(list.instances),
                    other => Err(unexpected("InstanceList", &other)),
                }
            }
        }
    }

    /// Fetch help text for a metric or instance domain.
    pub async fn help_text(&mut self, target: TextTarget, kind: TextKind) -> Result<String> {
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.text(target, kind).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply =
                    exchange(stream, Pdu::TextRequest(TextRequest { target, kind })).await?;
                match reply {
                    Pdu::Text(text) => Ok(text.text),
                    other => Err(unexpected("Text", &other)),
                }
            }
        }
    }

    /// Fetch both text flavors: (one-line summary, full help).
    pub async fn full_text(&mut self, target: TextTarget) -> Result<(String, String)> {
        let oneline = self.help_text(target, TextKind::OneLine).await?;
        let help = self.help_text(target, TextKind::Help).await?;
        Ok((oneline, help))
    }

    /// Fetch label metadata. Requires the label interface generation.
    pub async fn labels(&mut self, target: LabelTarget) -> Result<Vec<Label>> {
        self.require_interface("labels", INTERFACE_LABEL)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.labels(&target).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(stream, Pdu::LabelRequest(LabelRequest { target })).await?;
                match reply {
                    Pdu::LabelSet(set) => Ok(set.labels),
                    other => Err(unexpected("LabelSet", &other)),
                }
            }
        }
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Fetch current values for a list of metrics.
    ///
    /// The result has one value set per requested metric, in request order;
    /// per-metric failures ride inside their value set and do not fail the
    /// fetch. A dirty instance profile is pushed first.
    pub async fn fetch(&mut self, metrics: &[MetricId]) -> Result<Vec<ValueSet>> {
        let _guard = self.begin_op()?;
        self.fetch_inner(metrics).await
    }

    async fn fetch_inner(&mut self, metrics: &[MetricId]) -> Result<Vec<ValueSet>> {
        self.flush_profile().await?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.fetch(metrics).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(
                    stream,
                    Pdu::FetchRequest(FetchRequest {
                        metrics: metrics.to_vec(),
                    }),
                )
                .await?;
                match reply {
                    Pdu::FetchResult(result) => Ok(result.values),
                    other => Err(unexpected("FetchResult", &other)),
                }
            }
        }
    }

    /// Run the describe and fetch legs of a store.
    ///
    /// The returned token records the metric's value type and the instances
    /// currently holding values, and is valid only on this connection.
    pub async fn prepare_store(&mut self, metric: MetricId) -> Result<PreparedStore> {
        let _guard = self.begin_op()?;
        let desc = self.descriptor_inner(metric).await?;

        let mut sets = self.fetch_inner(&[metric]).await?;
        let set = sets
            .iter()
            .position(|set| set.metric == metric)
            .map(|i| sets.swap_remove(i))
            .ok_or_else(|| Error::Protocol {
                message: format!("fetch result omitted metric {metric}"),
            })?;
        let values = set.result.map_err(Error::Agent)?;
        if values.is_empty() {
            return Err(Error::StoreSequence {
                message: format!("metric {metric} has no current values to replace"),
            });
        }

        Ok(PreparedStore {
            metric,
            value_type: desc.value_type,
            instances: values.into_iter().map(|v| v.instance).collect(),
            epoch: self.epoch,
        })
    }

    /// Run the store leg: write `atom` into every instance recorded at
    /// preparation time.
    pub async fn commit_store(&mut self, prepared: &PreparedStore, atom: ValueAtom) -> Result<()> {
        let _guard = self.begin_op()?;
        if prepared.epoch != self.epoch {
            return Err(Error::StoreSequence {
                message: format!(
                    "store of {} was prepared on a different connection",
                    prepared.metric
                ),
            });
        }
        if atom.value_type() != prepared.value_type {
            return Err(Error::TypeMismatch {
                metric: prepared.metric.to_string(),
                expected: prepared.value_type.to_string(),
                found: atom.value_type().to_string(),
            });
        }

        self.flush_profile().await?;
        let values: Vec<Value> = prepared
            .instances
            .iter()
            .map(|&instance| Value {
                instance,
                atom: atom.clone(),
            })
            .collect();

        match &mut self.link {
            Link::Dso(binding) => binding
                .module
                .store(prepared.metric, &values)
                .map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(
                    stream,
                    Pdu::StoreRequest(StoreRequest {
                        metric: prepared.metric,
                        values,
                    }),
                )
                .await?;
                match reply {
                    Pdu::StoreAck(ack) if ack.status == 0 => Ok(()),
                    Pdu::StoreAck(ack) => Err(Error::Agent(AgentError(ack.status))),
                    other => Err(unexpected("StoreAck", &other)),
                }
            }
        }
    }

    /// Describe, fetch, store: the full ordered sequence in one call.
    pub async fn store(&mut self, metric: MetricId, atom: ValueAtom) -> Result<()> {
        let prepared = self.prepare_store(metric).await?;
        self.commit_store(&prepared, atom).await
    }

    // =========================================================================
    // Namespace (interface generation >= 4)
    // =========================================================================

    /// Resolve external names to metric identifiers, one result per name.
    pub async fn lookup_ids(
        &mut self,
        names: &[String],
    ) -> Result<Vec<std::result::Result<MetricId, AgentError>>> {
        self.require_interface("name lookup", INTERFACE_NAMESPACE)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.lookup_ids(names).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(
                    stream,
                    Pdu::NamePmidRequest(NamePmidRequest {
                        names: names.to_vec(),
                    }),
                )
                .await?;
                match reply {
                    Pdu::NamePmidResult(result) => Ok(result.ids),
                    other => Err(unexpected("NamePmidResult", &other)),
                }
            }
        }
    }

    /// Resolve a metric identifier to its external name(s).
    pub async fn lookup_names(&mut self, metric: MetricId) -> Result<Vec<String>> {
        self.require_interface("id lookup", INTERFACE_NAMESPACE)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.lookup_names(metric).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply =
                    exchange(stream, Pdu::PmidNameRequest(PmidNameRequest { metric })).await?;
                match reply {
                    Pdu::PmidNameResult(result) => Ok(result.names),
                    other => Err(unexpected("PmidNameResult", &other)),
                }
            }
        }
    }

    /// List the immediate children of a namespace node.
    pub async fn children(&mut self, name: &str) -> Result<Vec<ChildEntry>> {
        self.require_interface("children", INTERFACE_NAMESPACE)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.children(name).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(
                    stream,
                    Pdu::ChildrenRequest(ChildrenRequest {
                        name: name.to_string(),
                    }),
                )
                .await?;
                match reply {
                    Pdu::ChildrenResult(result) => Ok(result.children),
                    other => Err(unexpected("ChildrenResult", &other)),
                }
            }
        }
    }

    /// List every leaf name at or below a namespace node.
    pub async fn traverse(&mut self, name: &str) -> Result<Vec<String>> {
        self.require_interface("traverse", INTERFACE_NAMESPACE)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.traverse(name).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply = exchange(
                    stream,
                    Pdu::TraverseRequest(TraverseRequest {
                        name: name.to_string(),
                    }),
                )
                .await?;
                match reply {
                    Pdu::TraverseResult(result) => Ok(result.names),
                    other => Err(unexpected("TraverseResult", &other)),
                }
            }
        }
    }

    // =========================================================================
    // Attributes (interface generation >= 6)
    // =========================================================================

    /// Push one connection attribute to the agent.
    pub async fn attribute(&mut self, attribute: Attribute) -> Result<()> {
        self.require_interface("attribute", INTERFACE_ATTRIBUTE)?;
        let _guard = self.begin_op()?;
        match &mut self.link {
            Link::Dso(binding) => binding.module.attribute(&attribute).map_err(Error::Agent),
            Link::Pipe { stream, .. } | Link::Socket { stream } => {
                let reply =
                    exchange(stream, Pdu::AttributeRequest(AttributeRequest { attribute }))
                        .await?;
                match reply {
                    Pdu::AttributeAck(ack) if ack.status == 0 => Ok(()),
                    Pdu::AttributeAck(ack) => Err(Error::Agent(AgentError(ack.status))),
                    other => Err(unexpected("AttributeAck", &other)),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectConfig, ConnectionManager};
    use crate::constants::{INTERFACE_LATEST, INTERFACE_OLDEST, PROTOCOL_VERSION};
    use crate::module::{AgentModule, InitContext};
    use crate::protocol::{
        Credential, CredentialExchange, FilterMode, ProfileSpec, Semantics, Units,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const COUNTER: MetricId = MetricId {
        domain: 29,
        cluster: 0,
        item: 0,
    };
    const SHADE_INDOM: InstanceDomainId = InstanceDomainId {
        domain: 29,
        serial: 1,
    };

    /// Module that records the order of calls and serves one singular
    /// counter plus one per-instance metric.
    struct RecordingModule {
        interface: u32,
        calls: Arc<std::sync::Mutex<Vec<&'static str>>>,
        namespace_calls: Arc<AtomicU32>,
        stored: Arc<std::sync::Mutex<Vec<Value>>>,
    }

    impl RecordingModule {
        fn new(interface: u32) -> Self {
            Self {
                interface,
                calls: Arc::new(std::sync::Mutex::new(Vec::new())),
                namespace_calls: Arc::new(AtomicU32::new(0)),
                stored: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }

        fn record(&self, op: &'static str) {
            self.calls.lock().unwrap().push(op);
        }
    }

    impl AgentModule for RecordingModule {
        fn init(&mut self, ctx: &mut InitContext) {
            ctx.interface_version = self.interface;
            ctx.protocol_version = PROTOCOL_VERSION;
            ctx.status = 0;
        }
        fn profile(&mut self, _spec: &ProfileSpec) -> std::result::Result<(), AgentError> {
            self.record("profile");
            Ok(())
        }
        fn descriptor(&mut self, metric: MetricId) -> std::result::Result<Descriptor, AgentError> {
            self.record("descriptor");
            if metric != COUNTER {
                return Err(AgentError::NO_SUCH_METRIC);
            }
            Ok(Descriptor {
                metric,
                value_type: ValueType::U32,
                indom: None,
                semantics: Semantics::Counter,
                units: Units::default(),
            })
        }
        fn instances(
            &mut self,
            indom: InstanceDomainId,
            _filter: &InstanceFilter,
        ) -> std::result::Result<Vec<Instance>, AgentError> {
            self.record("instances");
            if indom != SHADE_INDOM {
                return Err(AgentError::NO_SUCH_INDOM);
            }
            Ok(vec![Instance {
                id: 0,
                name: "red".into(),
            }])
        }
        fn fetch(&mut self, metrics: &[MetricId]) -> std::result::Result<Vec<ValueSet>, AgentError> {
            self.record("fetch");
            Ok(metrics
                .iter()
                .map(|&metric| ValueSet {
                    metric,
                    result: if metric == COUNTER {
                        Ok(vec![Value {
                            instance: None,
                            atom: ValueAtom::U32(7),
                        }])
                    } else {
                        Err(AgentError::NO_SUCH_METRIC)
                    },
                })
                .collect())
        }
        fn store(
            &mut self,
            _metric: MetricId,
            values: &[Value],
        ) -> std::result::Result<(), AgentError> {
            self.record("store");
            self.stored.lock().unwrap().extend_from_slice(values);
            Ok(())
        }
        fn text(
            &mut self,
            _target: TextTarget,
            _kind: TextKind,
        ) -> std::result::Result<String, AgentError> {
            self.record("text");
            Ok("a counter".into())
        }
        fn children(&mut self, _name: &str) -> std::result::Result<Vec<ChildEntry>, AgentError> {
            self.namespace_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ChildEntry {
                name: "counter".into(),
                leaf: true,
            }])
        }
        fn labels(&mut self, _target: &LabelTarget) -> std::result::Result<Vec<Label>, AgentError> {
            self.record("labels");
            Ok(vec![Label {
                name: "role".into(),
                value: "\"testing\"".into(),
            }])
        }
    }

    async fn dso_manager(interface: u32) -> (ConnectionManager, Arc<std::sync::Mutex<Vec<&'static str>>>, Arc<AtomicU32>) {
        let module = RecordingModule::new(interface);
        let calls = Arc::clone(&module.calls);
        let namespace_calls = Arc::clone(&module.namespace_calls);
        let module = std::sync::Mutex::new(Some(module));

        let mut manager = ConnectionManager::new(ConnectConfig::default());
        manager.registry_mut().register("/m", "init", move || {
            module.lock().unwrap().take().expect("module bound once")
        });
        manager.open_dso("/m", "init", 29).await.unwrap();
        (manager, calls, namespace_calls)
    }

    // =========================================================================
    // DSO Dispatch
    // =========================================================================

    #[tokio::test]
    async fn fetch_flushes_profile_first() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        conn.fetch(&[COUNTER]).await.unwrap();
        assert_eq!(&*calls.lock().unwrap(), &["profile", "fetch"]);

        // Clean profile: the second fetch skips the push.
        conn.fetch(&[COUNTER]).await.unwrap();
        assert_eq!(&*calls.lock().unwrap(), &["profile", "fetch", "fetch"]);
    }

    #[tokio::test]
    async fn profile_edit_triggers_repush_on_next_fetch() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        conn.fetch(&[COUNTER]).await.unwrap();
        conn.set_instance_filter(SHADE_INDOM, FilterMode::Include, vec![0]);
        conn.fetch(&[COUNTER]).await.unwrap();
        assert_eq!(
            &*calls.lock().unwrap(),
            &["profile", "fetch", "profile", "fetch"]
        );
    }

    #[tokio::test]
    async fn metadata_ops_do_not_flush_profile() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        conn.descriptor(COUNTER).await.unwrap();
        conn.instances(SHADE_INDOM, InstanceFilter::All).await.unwrap();
        conn.help_text(TextTarget::Metric(COUNTER), TextKind::OneLine)
            .await
            .unwrap();
        assert_eq!(
            &*calls.lock().unwrap(),
            &["descriptor", "instances", "text"]
        );
    }

    #[tokio::test]
    async fn full_text_fetches_both_flavors() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        let (oneline, help) = conn.full_text(TextTarget::Metric(COUNTER)).await.unwrap();
        assert_eq!(oneline, "a counter");
        assert_eq!(help, "a counter");
        assert_eq!(&*calls.lock().unwrap(), &["text", "text"]);
    }

    #[tokio::test]
    async fn per_metric_fetch_errors_stay_inside_value_sets() {
        let (mut manager, _, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        let bogus = MetricId::new(29, 9, 9);
        let sets = conn.fetch(&[COUNTER, bogus]).await.unwrap();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].result.is_ok());
        assert_eq!(sets[1].result, Err(AgentError::NO_SUCH_METRIC));
    }

    #[tokio::test]
    async fn unsupported_op_never_reaches_module() {
        let (mut manager, _, namespace_calls) = dso_manager(INTERFACE_OLDEST).await;
        let conn = manager.current().unwrap();

        let result = conn.children("probe").await;
        assert!(matches!(
            result,
            Err(Error::Unsupported {
                operation: "children",
                interface: 2
            })
        ));
        assert_eq!(namespace_calls.load(Ordering::SeqCst), 0);

        assert!(matches!(
            conn.labels(LabelTarget::Context).await,
            Err(Error::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn namespace_ops_pass_through_at_full_interface() {
        let (mut manager, _, namespace_calls) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        let children = conn.children("probe").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(namespace_calls.load(Ordering::SeqCst), 1);

        let labels = conn.labels(LabelTarget::Context).await.unwrap();
        assert_eq!(labels[0].name, "role");
    }

    // =========================================================================
    // Store Sequencing
    // =========================================================================

    #[tokio::test]
    async fn store_runs_describe_fetch_store_in_order() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        conn.store(COUNTER, ValueAtom::U32(42)).await.unwrap();
        assert_eq!(
            &*calls.lock().unwrap(),
            &["descriptor", "profile", "fetch", "store"]
        );
    }

    #[tokio::test]
    async fn commit_rejects_mismatched_value_type() {
        let (mut manager, calls, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        let prepared = conn.prepare_store(COUNTER).await.unwrap();
        assert_eq!(prepared.value_type(), ValueType::U32);

        let result = conn
            .commit_store(&prepared, ValueAtom::String("nope".into()))
            .await;
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        // The store leg never ran.
        assert!(!calls.lock().unwrap().contains(&"store"));
    }

    #[tokio::test]
    async fn commit_rejects_token_from_another_connection() {
        let (mut manager, _, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        let mut prepared = conn.prepare_store(COUNTER).await.unwrap();
        prepared.epoch = prepared.epoch.wrapping_add(1);

        let result = conn.commit_store(&prepared, ValueAtom::U32(1)).await;
        assert!(matches!(result, Err(Error::StoreSequence { .. })));
    }

    #[tokio::test]
    async fn prepare_rejects_metric_without_values() {
        let (mut manager, _, _) = dso_manager(INTERFACE_LATEST).await;
        let conn = manager.current().unwrap();

        // Unknown metrics fail at the describe leg already.
        let result = conn.prepare_store(MetricId::new(29, 9, 9)).await;
        assert!(matches!(
            result,
            Err(Error::Agent(AgentError::NO_SUCH_METRIC))
        ));
    }

    // =========================================================================
    // Wire Dispatch
    // =========================================================================

    fn quick_config() -> ConnectConfig {
        ConnectConfig {
            creds_timeout: Duration::from_millis(200),
            ..ConnectConfig::default()
        }
    }

    /// Agent end of a duplex channel: announce credentials, absorb the
    /// controller's reply, then hand the stream to a script.
    async fn wire_agent(half: tokio::io::DuplexStream) -> FrameStream {
        let (r, w) = tokio::io::split(half);
        let mut stream = FrameStream::new(Box::new(r), Box::new(w), 999);
        stream
            .send(&Pdu::CredentialExchange(CredentialExchange {
                pid: 999,
                credentials: vec![Credential::Version {
                    version: PROTOCOL_VERSION,
                }],
            }))
            .await
            .unwrap();
        let reply = stream.recv().await.unwrap();
        assert!(matches!(reply.pdu, Pdu::CredentialExchange(_)));
        stream
    }

    async fn wire_connection(far_script: impl FnOnce(FrameStream) -> tokio::task::JoinHandle<()>) -> Connection {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let agent = async move {
            let stream = wire_agent(far).await;
            far_script(stream)
        };
        let (r, w) = tokio::io::split(near);
        let config = quick_config();
        let open = Connection::open_stream(Box::new(r), Box::new(w), "test", &config);
        let (conn, _task) = tokio::join!(open, agent);
        conn.unwrap()
    }

    #[tokio::test]
    async fn wire_descriptor_roundtrip() {
        let mut conn = wire_connection(|mut stream| {
            tokio::spawn(async move {
                let frame = stream.recv().await.unwrap();
                let metric = match frame.pdu {
                    Pdu::DescriptorRequest(req) => req.metric,
                    other => panic!("unexpected {}", other.kind_name()),
                };
                stream
                    .send(&Pdu::Descriptor(Descriptor {
                        metric,
                        value_type: ValueType::U32,
                        indom: None,
                        semantics: Semantics::Counter,
                        units: Units::default(),
                    }))
                    .await
                    .unwrap();
            })
        })
        .await;

        let desc = conn.descriptor(COUNTER).await.unwrap();
        assert_eq!(desc.metric, COUNTER);
        assert_eq!(desc.value_type, ValueType::U32);
        conn.close().await;
    }

    #[tokio::test]
    async fn wire_fetch_sends_profile_update_first() {
        let mut conn = wire_connection(|mut stream| {
            tokio::spawn(async move {
                // New connection: a profile push must precede the fetch.
                let first = stream.recv().await.unwrap();
                assert!(
                    matches!(first.pdu, Pdu::ProfileUpdate(_)),
                    "expected ProfileUpdate, got {}",
                    first.pdu.kind_name()
                );
                let second = stream.recv().await.unwrap();
                let metrics = match second.pdu {
                    Pdu::FetchRequest(req) => req.metrics,
                    other => panic!("unexpected {}", other.kind_name()),
                };
                stream
                    .send(&Pdu::FetchResult(crate::protocol::FetchResult {
                        values: metrics
                            .into_iter()
                            .map(|metric| ValueSet {
                                metric,
                                result: Ok(vec![Value {
                                    instance: None,
                                    atom: ValueAtom::U32(1),
                                }]),
                            })
                            .collect(),
                    }))
                    .await
                    .unwrap();
            })
        })
        .await;

        let sets = conn.fetch(&[COUNTER]).await.unwrap();
        assert_eq!(sets.len(), 1);
        conn.close().await;
    }

    #[tokio::test]
    async fn wire_error_result_surfaces_as_agent_error() {
        let mut conn = wire_connection(|mut stream| {
            tokio::spawn(async move {
                let _ = stream.recv().await.unwrap();
                stream
                    .send(&Pdu::ErrorResult(crate::protocol::ErrorResult {
                        error: AgentError::NO_SUCH_METRIC,
                    }))
                    .await
                    .unwrap();
            })
        })
        .await;

        let result = conn.descriptor(COUNTER).await;
        assert!(matches!(
            result,
            Err(Error::Agent(AgentError::NO_SUCH_METRIC))
        ));
        conn.close().await;
    }

    #[tokio::test]
    async fn wire_wrong_reply_kind_is_protocol_error() {
        let mut conn = wire_connection(|mut stream| {
            tokio::spawn(async move {
                let _ = stream.recv().await.unwrap();
                stream
                    .send(&Pdu::Text(crate::protocol::Text {
                        text: "wat".into(),
                    }))
                    .await
                    .unwrap();
            })
        })
        .await;

        let result = conn.descriptor(COUNTER).await;
        match result {
            Err(Error::Protocol { message }) => {
                assert!(message.contains("Descriptor"), "message: {message}");
                assert!(message.contains("Text"), "message: {message}");
            }
            other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
        }
        conn.close().await;
    }

    #[tokio::test]
    async fn wire_store_ack_status_maps_to_agent_error() {
        let mut conn = wire_connection(|mut stream| {
            tokio::spawn(async move {
                loop {
                    let frame = match stream.recv().await {
                        Ok(frame) => frame,
                        Err(_) => return,
                    };
                    let reply = match frame.pdu {
                        Pdu::DescriptorRequest(req) => Pdu::Descriptor(Descriptor {
                            metric: req.metric,
                            value_type: ValueType::U32,
                            indom: None,
                            semantics: Semantics::Instant,
                            units: Units::default(),
                        }),
                        Pdu::ProfileUpdate(_) => continue,
                        Pdu::FetchRequest(req) => {
                            Pdu::FetchResult(crate::protocol::FetchResult {
                                values: req
                                    .metrics
                                    .into_iter()
                                    .map(|metric| ValueSet {
                                        metric,
                                        result: Ok(vec![Value {
                                            instance: None,
                                            atom: ValueAtom::U32(5),
                                        }]),
                                    })
                                    .collect(),
                            })
                        }
                        Pdu::StoreRequest(_) => Pdu::StoreAck(crate::protocol::StoreAck {
                            status: AgentError::PERMISSION.code(),
                        }),
                        Pdu::ErrorResult(_) => return,
                        other => panic!("unexpected {}", other.kind_name()),
                    };
                    stream.send(&reply).await.unwrap();
                }
            })
        })
        .await;

        let result = conn.store(COUNTER, ValueAtom::U32(9)).await;
        assert!(matches!(
            result,
            Err(Error::Agent(AgentError::PERMISSION))
        ));
        conn.close().await;
    }
}

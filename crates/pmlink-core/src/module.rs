//! Agent capability interface.
//!
//! A loaded module is the in-process equivalent of a daemon agent: the
//! controller calls straight into it, no serialization involved. The trait
//! replaces the raw version-tagged function-pointer table of native shared
//! objects: each interface generation corresponds to a slice of the trait,
//! and the dispatcher gates calls by the generation negotiated at init time.
//!
//! The same trait drives the agent-side serve loop, which adapts wire PDUs
//! onto it, so one module implementation can back every transport kind.

use crate::error::AgentError;
use crate::protocol::{
    Attribute, ChildEntry, Descriptor, Instance, InstanceDomainId, InstanceFilter, Label,
    LabelTarget, MetricId, ProfileSpec, TextKind, TextTarget, Value, ValueSet,
};

/// Capability-negotiation structure passed to a module's init routine.
///
/// Before init, the controller plants challenge values in both version
/// fields; the module must overwrite them with the versions it actually
/// implements. A non-zero `status` after init fails the open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitContext {
    /// Domain the controller expects this module to serve. The module may
    /// ignore it, verify it, or self-adapt.
    pub domain: u32,
    /// Challenge on entry; the module's interface generation on return.
    pub interface_version: u32,
    /// Challenge on entry; the module's wire protocol version on return.
    pub protocol_version: u32,
    /// 0 on success; anything else aborts the open.
    pub status: i32,
}

/// The operations an agent module serves, grouped by interface generation.
///
/// Base operations (generation 2) have no default body. Generation-gated
/// operations default to `NOT_SUPPORTED`; the dispatcher refuses to call them
/// at all below the negotiated threshold, so the defaults only matter for
/// modules that over-announce their generation.
pub trait AgentModule: Send {
    /// Capability/version negotiation; called exactly once, before any
    /// other method.
    fn init(&mut self, ctx: &mut InitContext);

    /// Replace the active instance filter.
    fn profile(&mut self, spec: &ProfileSpec) -> Result<(), AgentError>;

    fn descriptor(&mut self, metric: MetricId) -> Result<Descriptor, AgentError>;

    fn instances(
        &mut self,
        indom: InstanceDomainId,
        filter: &InstanceFilter,
    ) -> Result<Vec<Instance>, AgentError>;

    /// Fetch values; per-metric failures go inside the returned value sets,
    /// an Err return fails the whole fetch.
    fn fetch(&mut self, metrics: &[MetricId]) -> Result<Vec<ValueSet>, AgentError>;

    fn store(&mut self, metric: MetricId, values: &[Value]) -> Result<(), AgentError>;

    fn text(&mut self, target: TextTarget, kind: TextKind) -> Result<String, AgentError>;

    // =========================================================================
    // Namespace operations (interface generation >= 4)
    // =========================================================================

    fn lookup_ids(
        &mut self,
        names: &[String],
    ) -> Result<Vec<Result<MetricId, AgentError>>, AgentError> {
        let _ = names;
        Err(AgentError::NOT_SUPPORTED)
    }

    fn lookup_names(&mut self, metric: MetricId) -> Result<Vec<String>, AgentError> {
        let _ = metric;
        Err(AgentError::NOT_SUPPORTED)
    }

    fn children(&mut self, name: &str) -> Result<Vec<ChildEntry>, AgentError> {
        let _ = name;
        Err(AgentError::NOT_SUPPORTED)
    }

    fn traverse(&mut self, name: &str) -> Result<Vec<String>, AgentError> {
        let _ = name;
        Err(AgentError::NOT_SUPPORTED)
    }

    // =========================================================================
    // Attribute exchange (interface generation >= 6)
    // =========================================================================

    fn attribute(&mut self, attribute: &Attribute) -> Result<(), AgentError> {
        let _ = attribute;
        Err(AgentError::NOT_SUPPORTED)
    }

    // =========================================================================
    // Labels (interface generation >= 7)
    // =========================================================================

    fn labels(&mut self, target: &LabelTarget) -> Result<Vec<Label>, AgentError> {
        let _ = target;
        Err(AgentError::NOT_SUPPORTED)
    }

    /// End-of-session callback, invoked during close. Best-effort.
    fn end_session(&mut self) {}
}

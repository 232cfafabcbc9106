//! Value types carried inside protocol messages.
//!
//! Metric and instance-domain identifiers are opaque keys whose meaning is
//! owned by the agent; the controller only routes them. Descriptors, value
//! sets and the remaining metadata types mirror what agents serve.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque 3-part metric identifier (domain, cluster, item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricId {
    pub domain: u32,
    pub cluster: u32,
    pub item: u32,
}

impl MetricId {
    pub fn new(domain: u32, cluster: u32, item: u32) -> Self {
        Self {
            domain,
            cluster,
            item,
        }
    }
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.domain, self.cluster, self.item)
    }
}

/// Opaque 2-part instance-domain identifier (domain, serial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceDomainId {
    pub domain: u32,
    pub serial: u32,
}

impl InstanceDomainId {
    pub fn new(domain: u32, serial: u32) -> Self {
        Self { domain, serial }
    }
}

impl std::fmt::Display for InstanceDomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.domain, self.serial)
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Value type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::I32 => "32",
            ValueType::U32 => "u32",
            ValueType::I64 => "64",
            ValueType::U64 => "u64",
            ValueType::F32 => "float",
            ValueType::F64 => "double",
            ValueType::String => "string",
        };
        f.write_str(name)
    }
}

/// Semantics of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Semantics {
    /// Cumulative counter, monotonically increasing.
    Counter,
    /// Instantaneous value.
    Instant,
    /// Discrete value that changes rarely.
    Discrete,
}

/// Dimension and scale of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Units {
    pub dim_space: i8,
    pub dim_time: i8,
    pub dim_count: i8,
    pub scale_space: i8,
    pub scale_time: i8,
    pub scale_count: i8,
}

/// Metric descriptor as served by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub metric: MetricId,
    pub value_type: ValueType,
    /// Instance domain, if the metric has per-instance values.
    pub indom: Option<InstanceDomainId>,
    pub semantics: Semantics,
    pub units: Units,
}

// =============================================================================
// Values
// =============================================================================

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueAtom {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl ValueAtom {
    /// The value type this atom satisfies.
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueAtom::I32(_) => ValueType::I32,
            ValueAtom::U32(_) => ValueType::U32,
            ValueAtom::I64(_) => ValueType::I64,
            ValueAtom::U64(_) => ValueType::U64,
            ValueAtom::F32(_) => ValueType::F32,
            ValueAtom::F64(_) => ValueType::F64,
            ValueAtom::String(_) => ValueType::String,
        }
    }
}

/// One value, optionally bound to an instance of the metric's domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Instance identifier; None for singular metrics.
    pub instance: Option<i32>,
    pub atom: ValueAtom,
}

/// Per-metric result container inside a fetch response.
///
/// The error side is a per-metric condition (distinct from a connection-level
/// ErrorResult) and leaves the rest of the response intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSet {
    pub metric: MetricId,
    pub result: std::result::Result<Vec<Value>, AgentError>,
}

// =============================================================================
// Instances
// =============================================================================

/// One member of an instance domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i32,
    pub name: String,
}

/// Selector for an instance enumeration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceFilter {
    /// Enumerate every instance.
    All,
    /// Look up a single instance by identifier.
    Id(i32),
    /// Look up a single instance by external name.
    Name(String),
}

// =============================================================================
// Profile
// =============================================================================

/// Include/exclude state for instance filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Per-instance-domain filter override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndomProfile {
    pub indom: InstanceDomainId,
    pub mode: FilterMode,
    pub instances: Vec<i32>,
}

/// Full instance filter applied agent-side during fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// Default state for instance domains without an override.
    pub default_mode: FilterMode,
    pub indoms: Vec<IndomProfile>,
}

impl Default for ProfileSpec {
    fn default() -> Self {
        Self {
            default_mode: FilterMode::Include,
            indoms: Vec::new(),
        }
    }
}

impl ProfileSpec {
    /// Whether the given instance of an instance domain passes the filter.
    pub fn includes(&self, indom: InstanceDomainId, instance: i32) -> bool {
        for entry in &self.indoms {
            if entry.indom == indom {
                let listed = entry.instances.contains(&instance);
                return match entry.mode {
                    FilterMode::Include => listed,
                    FilterMode::Exclude => !listed,
                };
            }
        }
        self.default_mode == FilterMode::Include
    }
}

// =============================================================================
// Help Text and Labels
// =============================================================================

/// What a text request asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextTarget {
    Metric(MetricId),
    InstanceDomain(InstanceDomainId),
}

/// Which flavor of help text is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextKind {
    /// Terse one-line summary.
    OneLine,
    /// Full help text.
    Help,
}

/// What a label request asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelTarget {
    Context,
    Domain(u32),
    Cluster(MetricId),
    Metric(MetricId),
    InstanceDomain(InstanceDomainId),
    Instances(InstanceDomainId),
}

/// One name/value label pair.
///
/// The value is an opaque JSON fragment owned by the agent framework; the
/// codec round-trips it losslessly and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

// =============================================================================
// Namespace
// =============================================================================

/// One entry in a namespace children listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub name: String,
    pub leaf: bool,
}

// =============================================================================
// Attributes and Credentials
// =============================================================================

/// Connection attribute kinds for the attribute/authentication exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrKind {
    Username,
    UserId,
    GroupId,
    ProcessId,
    Container,
    Secure,
}

/// A single connection attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub kind: AttrKind,
    pub value: String,
}

/// A credential presented during the version handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    /// Wire protocol version announcement.
    Version { version: u32 },
}

// =============================================================================
// Tests
// =============================================================================

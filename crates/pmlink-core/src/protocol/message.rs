//! Top-level protocol message enum.
//!
//! One variant per PDU kind. Every PDU is self-describing on the wire: the
//! frame header carries its length and type tag, so the decoder needs no
//! external context beyond the negotiated protocol version.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

use super::types::{
    Attribute, ChildEntry, Credential, Descriptor, Instance, InstanceDomainId,
    InstanceFilter, Label, LabelTarget, MetricId, ProfileSpec, TextKind, TextTarget, Value,
    ValueSet,
};

// =============================================================================
// Payloads
// =============================================================================

/// Credential exchange, sent by the agent immediately after connect and
/// answered by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialExchange {
    /// Sender's process id.
    pub pid: u32,
    pub credentials: Vec<Credential>,
}

/// Request for a metric descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRequest {
    pub metric: MetricId,
}

/// Request to enumerate (or look up within) an instance domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub indom: InstanceDomainId,
    pub filter: InstanceFilter,
}

/// Instance enumeration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceList {
    pub indom: InstanceDomainId,
    pub instances: Vec<Instance>,
}

/// Full instance-filter state, pushed ahead of fetch/store when dirty.
/// The agent does not reply to this PDU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub spec: ProfileSpec,
}

/// Request for current values of a list of metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub metrics: Vec<MetricId>,
}

/// Fetch response: one value set per requested metric, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub values: Vec<ValueSet>,
}

/// Request to store new values into one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub metric: MetricId,
    pub values: Vec<Value>,
}

/// Store acknowledgment; status 0 means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAck {
    pub status: i32,
}

/// Request for help text about a metric or instance domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    pub target: TextTarget,
    pub kind: TextKind,
}

/// Help text response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
}

/// Request for label metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRequest {
    pub target: LabelTarget,
}

/// Label metadata response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pub target: LabelTarget,
    pub labels: Vec<Label>,
}

/// Namespace lookup: external names to metric identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePmidRequest {
    pub names: Vec<String>,
}

/// Per-name lookup results, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamePmidResult {
    pub ids: Vec<std::result::Result<MetricId, AgentError>>,
}

/// Namespace lookup: metric identifier to external name(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidNameRequest {
    pub metric: MetricId,
}

/// Names bound to a metric identifier (a metric may have several).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidNameResult {
    pub names: Vec<String>,
}

/// Request for the immediate children of a namespace node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenRequest {
    pub name: String,
}

/// Children listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenResult {
    pub children: Vec<ChildEntry>,
}

/// Request for every leaf name at or below a namespace node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraverseRequest {
    pub name: String,
}

/// Traversal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraverseResult {
    pub names: Vec<String>,
}

/// Connection attribute push (authentication exchange).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRequest {
    pub attribute: Attribute,
}

/// Attribute acknowledgment; status 0 means accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeAck {
    pub status: i32,
}

/// Connection-level error response, or the best-effort "not connected"
/// notification sent during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error: AgentError,
}

// =============================================================================
// Top-level PDU Enum
// =============================================================================

/// Top-level protocol message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pdu {
    CredentialExchange(CredentialExchange),
    DescriptorRequest(DescriptorRequest),
    Descriptor(Descriptor),
    InstanceRequest(InstanceRequest),
    InstanceList(InstanceList),
    ProfileUpdate(ProfileUpdate),
    FetchRequest(FetchRequest),
    FetchResult(FetchResult),
    StoreRequest(StoreRequest),
    StoreAck(StoreAck),
    TextRequest(TextRequest),
    Text(Text),
    LabelRequest(LabelRequest),
    LabelSet(LabelSet),
    NamePmidRequest(NamePmidRequest),
    NamePmidResult(NamePmidResult),
    PmidNameRequest(PmidNameRequest),
    PmidNameResult(PmidNameResult),
    ChildrenRequest(ChildrenRequest),
    ChildrenResult(ChildrenResult),
    TraverseRequest(TraverseRequest),
    TraverseResult(TraverseResult),
    AttributeRequest(AttributeRequest),
    AttributeAck(AttributeAck),
    ErrorResult(ErrorResult),
}

impl Pdu {
    /// Wire type tag carried in the frame header.
    pub fn tag(&self) -> u32 {
        match self {
            Pdu::CredentialExchange(_) => 1,
            Pdu::DescriptorRequest(_) => 2,
            Pdu::Descriptor(_) => 3,
            Pdu::InstanceRequest(_) => 4,
            Pdu::InstanceList(_) => 5,
            Pdu::ProfileUpdate(_) => 6,
            Pdu::FetchRequest(_) => 7,
            Pdu::FetchResult(_) => 8,
            Pdu::StoreRequest(_) => 9,
            Pdu::StoreAck(_) => 10,
            Pdu::TextRequest(_) => 11,
            Pdu::Text(_) => 12,
            Pdu::LabelRequest(_) => 13,
            Pdu::LabelSet(_) => 14,
            Pdu::NamePmidRequest(_) => 15,
            Pdu::NamePmidResult(_) => 16,
            Pdu::PmidNameRequest(_) => 17,
            Pdu::PmidNameResult(_) => 18,
            Pdu::ChildrenRequest(_) => 19,
            Pdu::ChildrenResult(_) => 20,
            Pdu::TraverseRequest(_) => 21,
            Pdu::TraverseResult(_) => 22,
            Pdu::AttributeRequest(_) => 23,
            Pdu::AttributeAck(_) => 24,
            Pdu::ErrorResult(_) => 25,
        }
    }

    /// Human-readable PDU kind for logs and protocol errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Pdu::CredentialExchange(_) => "CredentialExchange",
            Pdu::DescriptorRequest(_) => "DescriptorRequest",
            Pdu::Descriptor(_) => "Descriptor",
            Pdu::InstanceRequest(_) => "InstanceRequest",
            Pdu::InstanceList(_) => "InstanceList",
            Pdu::ProfileUpdate(_) => "ProfileUpdate",
            Pdu::FetchRequest(_) => "FetchRequest",
            Pdu::FetchResult(_) => "FetchResult",
            Pdu::StoreRequest(_) => "StoreRequest",
            Pdu::StoreAck(_) => "StoreAck",
            Pdu::TextRequest(_) => "TextRequest",
            Pdu::Text(_) => "Text",
            Pdu::LabelRequest(_) => "LabelRequest",
            Pdu::LabelSet(_) => "LabelSet",
            Pdu::NamePmidRequest(_) => "NamePmidRequest",
            Pdu::NamePmidResult(_) => "NamePmidResult",
            Pdu::PmidNameRequest(_) => "PmidNameRequest",
            Pdu::PmidNameResult(_) => "PmidNameResult",
            Pdu::ChildrenRequest(_) => "ChildrenRequest",
            Pdu::ChildrenResult(_) => "ChildrenResult",
            Pdu::TraverseRequest(_) => "TraverseRequest",
            Pdu::TraverseResult(_) => "TraverseResult",
            Pdu::AttributeRequest(_) => "AttributeRequest",
            Pdu::AttributeAck(_) => "AttributeAck",
            Pdu::ErrorResult(_) => "ErrorResult",
        }
    }

    /// Shorthand for the teardown notification.
    pub fn not_connected() -> Pdu {
        Pdu::ErrorResult(ErrorResult {
            error: AgentError::NOT_CONNECTED,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Protocol message definitions and wire format codec.

mod codec;
mod message;
mod proptest;
mod types;

pub use codec::{Codec, Frame, FRAME_HEADER_LEN};
pub use message::{
    AttributeAck, AttributeRequest, ChildrenRequest, ChildrenResult, CredentialExchange,
    DescriptorRequest, ErrorResult, FetchRequest, FetchResult, InstanceList, InstanceRequest,
    LabelRequest, LabelSet, NamePmidRequest, NamePmidResult, Pdu, PmidNameRequest, PmidNameResult,
    ProfileUpdate, StoreAck, StoreRequest, Text, TextRequest, TraverseRequest, TraverseResult,
};
pub use types::{
    AttrKind, Attribute, ChildEntry, Credential, Descriptor, FilterMode, IndomProfile, Instance,
    InstanceDomainId, InstanceFilter, Label, LabelTarget, MetricId, ProfileSpec, Semantics,
    TextKind, TextTarget, Units, Value, ValueAtom, ValueSet, ValueType,
};

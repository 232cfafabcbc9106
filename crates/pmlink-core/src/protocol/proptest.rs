//! Property-based tests for the protocol codec.
//!
//! These tests use proptest to verify:
//! - Codec roundtrip for arbitrary PDUs
//! - Codec never panics on arbitrary input
//! - Frame length prefix correctness

#![cfg(test)]

use bytes::BytesMut;
use proptest::prelude::*;

use crate::error::AgentError;
use crate::protocol::{
    ChildEntry, ChildrenResult, Codec, Credential, CredentialExchange, DescriptorRequest,
    FetchRequest, FetchResult, InstanceFilter, InstanceRequest, MetricId, InstanceDomainId, Pdu,
    StoreRequest, TraverseResult, Value, ValueAtom, ValueSet, FRAME_HEADER_LEN,
};

// =============================================================================
// Arbitrary Generators
// =============================================================================

prop_compose! {
    fn arb_metric_id()(
        domain in 0u32..512,
        cluster in 0u32..4096,
        item in 0u32..1024,
    ) -> MetricId {
        MetricId { domain, cluster, item }
    }
}

prop_compose! {
    fn arb_indom_id()(
        domain in 0u32..512,
        serial in any::<u32>(),
    ) -> InstanceDomainId {
        InstanceDomainId { domain, serial }
    }
}

fn arb_atom() -> impl Strategy<Value = ValueAtom> {
    prop_oneof![
        any::<i32>().prop_map(ValueAtom::I32),
        any::<u32>().prop_map(ValueAtom::U32),
        any::<i64>().prop_map(ValueAtom::I64),
        any::<u64>().prop_map(ValueAtom::U64),
        // Bounded range keeps NaN out so PartialEq roundtrips hold.
        (-1.0e9f64..1.0e9).prop_map(ValueAtom::F64),
        ".{0,32}".prop_map(ValueAtom::String),
    ]
}

prop_compose! {
    fn arb_value()(
        instance in proptest::option::of(any::<i32>()),
        atom in arb_atom(),
    ) -> Value {
        Value { instance, atom }
    }
}

fn arb_value_set() -> impl Strategy<Value = ValueSet> {
    (
        arb_metric_id(),
        prop_oneof![
            proptest::collection::vec(arb_value(), 0..4).prop_map(Ok),
            any::<i32>().prop_map(|c| Err(AgentError(c))),
        ],
    )
        .prop_map(|(metric, result)| ValueSet { metric, result })
}

fn arb_pdu() -> impl Strategy<Value = Pdu> {
    prop_oneof![
        (any::<u32>(), any::<u32>()).prop_map(|(pid, version)| {
            Pdu::CredentialExchange(CredentialExchange {
                pid,
                credentials: vec![Credential::Version { version }],
            })
        }),
        arb_metric_id().prop_map(|metric| Pdu::DescriptorRequest(DescriptorRequest { metric })),
        (arb_indom_id(), prop_oneof![
            Just(InstanceFilter::All),
            any::<i32>().prop_map(InstanceFilter::Id),
            ".{0,16}".prop_map(InstanceFilter::Name),
        ])
            .prop_map(|(indom, filter)| Pdu::InstanceRequest(InstanceRequest { indom, filter })),
        proptest::collection::vec(arb_metric_id(), 0..8)
            .prop_map(|metrics| Pdu::FetchRequest(FetchRequest { metrics })),
        proptest::collection::vec(arb_value_set(), 0..4)
            .prop_map(|values| Pdu::FetchResult(FetchResult { values })),
        (arb_metric_id(), proptest::collection::vec(arb_value(), 0..4))
            .prop_map(|(metric, values)| Pdu::StoreRequest(StoreRequest { metric, values })),
        proptest::collection::vec((".{0,16}", any::<bool>()), 0..4).prop_map(|entries| {
            Pdu::ChildrenResult(ChildrenResult {
                children: entries
                    .into_iter()
                    .map(|(name, leaf)| ChildEntry { name, leaf })
                    .collect(),
            })
        }),
        proptest::collection::vec(".{0,24}", 0..6)
            .prop_map(|names| Pdu::TraverseResult(TraverseResult { names })),
    ]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn roundtrip_arbitrary_pdu(pdu in arb_pdu(), from in any::<u32>()) {
        let encoded = Codec::encode(&pdu, from).unwrap();
        let frame = Codec::decode_slice(&encoded).unwrap().unwrap();
        prop_assert_eq!(frame.pdu, pdu);
        prop_assert_eq!(frame.from, from);
    }

    #[test]
    fn length_prefix_matches_frame(pdu in arb_pdu()) {
        let encoded = Codec::encode(&pdu, 0).unwrap();
        let total = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        prop_assert_eq!(total, encoded.len());
        prop_assert!(total >= FRAME_HEADER_LEN);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut buf = BytesMut::from(&data[..]);
        // Any outcome is fine; the decoder just must not panic.
        let _ = Codec::decode(&mut buf);
    }

    #[test]
    fn truncation_never_yields_a_frame(pdu in arb_pdu(), cut in 1usize..12) {
        let encoded = Codec::encode(&pdu, 1).unwrap();
        let keep = encoded.len().saturating_sub(cut);
        if keep >= 4 {
            let result = Codec::decode_slice(&encoded[..keep]);
            // Truncated input is either "need more" or a codec error,
            // never a successfully decoded frame.
            if let Ok(decoded) = result {
                prop_assert!(decoded.is_none());
            }
        }
    }
}

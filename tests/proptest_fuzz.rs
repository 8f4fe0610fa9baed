//! Property-based tests (fuzzing) for the archivist.
//!
//! Uses proptest to generate random keys, documents and event payloads and
//! verify the canonical forms hold up and the engine never panics, only
//! returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use archivist::codec::builtin::JSON;
use archivist::codec::tracked::{diff, merge_patch};
use archivist::{
    Archivist, ArchivistConfig, EchoEvent, Encoding, Index, InMemoryRemote, LiveValue, MediaTypeRegistry, Operation,
    Payload, RecordKey, Scalar, WriteOptions,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn scalar_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        any::<bool>().prop_map(Scalar::Bool),
        any::<i64>().prop_map(Scalar::Int),
        (-1.0e9f64..1.0e9).prop_map(Scalar::Float),
        ".{0,8}".prop_map(Scalar::Str),
    ]
}

fn index_strategy() -> impl Strategy<Value = Index> {
    prop::collection::btree_map("[a-z:,=\"]{1,6}", scalar_strategy(), 0..4)
}

fn key_strategy() -> impl Strategy<Value = RecordKey> {
    ("[a-z:\"]{1,8}", index_strategy()).prop_map(|(topic, index)| RecordKey::new(topic, index))
}

/// Arbitrary JSON values
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// JSON objects without nulls, which merge patches cannot express as values
fn document_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
    ];
    let value = leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    });
    prop::collection::btree_map("[a-f]", value, 0..6).prop_map(|m| Value::Object(m.into_iter().collect()))
}

#[derive(Debug, Clone)]
enum Mutation {
    Set(i64),
    Touch(Option<u64>),
    Del,
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        any::<i64>().prop_map(Mutation::Set),
        prop::option::of(4_000_000_000u64..5_000_000_000).prop_map(Mutation::Touch),
        Just(Mutation::Del),
    ]
}

fn archivist() -> Archivist {
    Archivist::new(ArchivistConfig::default(), Arc::new(InMemoryRemote::new()))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Index field order never changes the true name
    #[test]
    fn true_name_ignores_insertion_order(topic in "[a-z]{1,8}", fields in index_strategy()) {
        let forward: Index = fields.clone().into_iter().collect();
        let backward: Index = fields.clone().into_iter().rev().collect();
        prop_assert_eq!(
            RecordKey::new(topic.clone(), forward).true_name(),
            RecordKey::new(topic, backward).true_name()
        );
    }

    /// Distinct keys never share a true name
    #[test]
    fn true_name_is_collision_free(a in key_strategy(), b in key_strategy()) {
        prop_assert_eq!(a == b, a.true_name() == b.true_name());
    }

    /// live → utf8 → live is lossless for JSON
    #[test]
    fn json_round_trips_through_utf8(value in arbitrary_json_strategy()) {
        let registry = MediaTypeRegistry::new();
        let encoded = registry
            .encode(Payload::from(value.clone()), JSON, &[Encoding::Utf8])
            .unwrap();
        prop_assert!(matches!(encoded, Payload::Utf8(_)));
        let decoded = registry.decode(encoded, JSON).unwrap();
        prop_assert_eq!(decoded, LiveValue::Json(value));
    }

    /// Applying the diff between two documents turns one into the other
    #[test]
    fn merge_patch_diff_applies(from in document_strategy(), to in document_strategy()) {
        let patch = diff(&from, &to);
        let mut patched = from.clone();
        merge_patch(&mut patched, &patch);
        prop_assert_eq!(patched, to);
    }

    /// Any mutation sequence on one key leaves at most one pending change,
    /// and the last set or del decides its operation
    #[test]
    fn ledger_collapses_per_key(ops in prop::collection::vec(mutation_strategy(), 1..20)) {
        let archivist = archivist();
        let key = RecordKey::new("fuzz", BTreeMap::new());
        for op in &ops {
            match op {
                Mutation::Set(n) => {
                    archivist.set(&key, json!(n), WriteOptions::default()).unwrap();
                }
                Mutation::Touch(expiration) => {
                    archivist.touch(&key, *expiration);
                }
                Mutation::Del => {
                    archivist.del(&key);
                }
            }
        }

        let pending = archivist.pending_changes();
        prop_assert_eq!(pending.len(), 1);

        let last_decisive = ops.iter().rev().find(|op| !matches!(op, Mutation::Touch(_)));
        let expected = match last_decisive {
            Some(Mutation::Set(_)) => Operation::Set,
            Some(Mutation::Del) => Operation::Del,
            _ => Operation::Touch,
        };
        prop_assert_eq!(pending[0].operation, expected);
    }

    /// Arbitrary echo payloads never panic the engine
    #[test]
    fn echo_events_never_panic(event in arbitrary_json_strategy(), operation in "set|applyDiff|touch|del") {
        let archivist = archivist();
        let mut event = event;
        if let Value::Object(map) = &mut event {
            map.insert("operation".into(), Value::String(operation));
            map.insert("key".into(), json!({"topic": "fuzz", "index": {}}));
        }
        if let Ok(event) = serde_json::from_value::<EchoEvent>(event) {
            let _ = archivist.handle_echo(event);
            prop_assert!(archivist.pending_changes().is_empty());
        }
    }
}

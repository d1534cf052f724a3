//! Property tests for value conversion and path flattening.

use docbridge::dispatch::{pack, unpack};
use docbridge::{to_value, ExecutionContext, Value, ValueReader, ValueWriter};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::UInt),
        any::<f32>()
            .prop_filter("comparable", |f| !f.is_nan())
            .prop_map(Value::Float32),
        any::<f64>()
            .prop_filter("comparable", |f| !f.is_nan())
            .prop_map(Value::Float64),
        "\\PC{0,12}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Keys drawn from the characters the flattener has to escape.
fn key() -> impl Strategy<Value = String> {
    "[ab.\\[\\]\\\\]{0,4}"
}

fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key(), inner, 0..6).prop_map(Value::Dict),
        ]
    })
}

fn document() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(key(), value(), 0..8)
}

/// Number of paths a flattened read produces for `value`.
fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(leaf_count).sum(),
        Value::Dict(entries) if !entries.is_empty() => entries.values().map(leaf_count).sum(),
        _ => 1,
    }
}

proptest! {
    #[test]
    fn test_nested_round_trip_preserves_values(value in value()) {
        let native = ValueWriter::default().encode(&value).unwrap();
        let back = ValueReader::default().read(&native).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn test_flattened_paths_are_distinct(doc in document()) {
        let dict = ValueWriter::default().write_dict(&doc).unwrap().into_dict();
        let flat = ValueReader::default().read_flattened(&dict).unwrap();

        let expected: usize = doc.values().map(leaf_count).sum();
        prop_assert_eq!(flat.len(), expected);
        for value in flat.values() {
            let is_container = matches!(value, Value::Array(items) if !items.is_empty())
                || matches!(value, Value::Dict(entries) if !entries.is_empty());
            prop_assert!(!is_container);
        }
    }

    #[test]
    fn test_flattening_is_stable(doc in document()) {
        let dict = ValueWriter::default().write_dict(&doc).unwrap().into_dict();
        let reader = ValueReader::default();
        prop_assert_eq!(
            reader.read_flattened(&dict).unwrap(),
            reader.read_flattened(&dict).unwrap()
        );
    }

    #[test]
    fn test_scalar_context_survives_packing(
        entries in prop::collection::btree_map("[a-z.\\[\\]\\\\]{1,6}", scalar(), 0..6)
    ) {
        let mut context = ExecutionContext::new();
        for (key, value) in &entries {
            context.insert(key.clone(), value.clone());
        }
        let keys: Vec<&str> = entries.keys().map(String::as_str).collect();

        let dict = pack(&context, &keys, &ValueWriter::default()).unwrap();
        let back = unpack(&dict, &ValueReader::default()).unwrap();
        prop_assert_eq!(back.len(), entries.len());
        for (key, value) in &entries {
            prop_assert_eq!(back.get(key), Some(value));
        }
    }

    #[test]
    fn test_serialized_maps_keep_numeric_subtypes(
        map in prop::collection::btree_map("[a-z]{1,6}", (any::<i32>(), any::<u32>()), 0..6)
    ) {
        let value = to_value(&map
            .iter()
            .map(|(k, (signed, unsigned))| (k.clone(), vec![*signed as i64, *unsigned as i64]))
            .collect::<BTreeMap<_, _>>())
            .unwrap();
        let dict = value.as_dict().unwrap();
        prop_assert_eq!(dict.len(), map.len());
        for (key, (signed, unsigned)) in &map {
            let items = dict[key].as_array().unwrap();
            prop_assert_eq!(&items[0], &Value::Int(*signed as i64));
            prop_assert_eq!(&items[1], &Value::Int(*unsigned as i64));
        }

        let unsigned = to_value(&map.values().map(|(_, u)| *u).collect::<Vec<u32>>()).unwrap();
        for (item, (_, u)) in unsigned.as_array().unwrap().iter().zip(map.values()) {
            prop_assert_eq!(item, &Value::UInt(*u as u64));
        }
    }
}

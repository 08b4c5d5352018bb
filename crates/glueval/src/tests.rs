use crate::*;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde_json::json;
use serde_json::Value;

// ============================================================================
//  GENERATORS
// ============================================================================

fn random_key(rng: &mut StdRng) -> String {
    const KEYS: &[&str] = &["foo", "bar", "a b", "$id", "_x", "0", "ключ", ""];
    KEYS[rng.gen_range(0..KEYS.len())].to_string()
}

fn random_script(rng: &mut StdRng, depth: usize) -> ScriptValue {
    let leaf_only = depth >= 4;
    match rng.gen_range(0..if leaf_only { 5 } else { 7 }) {
        0 => ScriptValue::Null,
        1 => ScriptValue::Boolean(rng.gen_bool(0.5)),
        2 => ScriptValue::Number(rng.gen_range(-1e6..1e6)),
        3 => ScriptValue::String(random_key(rng)),
        4 => ScriptValue::External(HandleId(rng.gen_range(1..100))),
        5 => {
            let len = rng.gen_range(0..4);
            ScriptValue::Array((0..len).map(|_| random_script(rng, depth + 1)).collect())
        }
        _ => {
            let len = rng.gen_range(0..4);
            ScriptValue::object((0..len).map(|_| (random_key(rng), random_script(rng, depth + 1))))
        }
    }
}

fn random_json(rng: &mut StdRng, depth: usize) -> Value {
    let leaf_only = depth >= 4;
    match rng.gen_range(0..if leaf_only { 5 } else { 7 }) {
        0 => Value::Null,
        1 => Value::Bool(rng.gen_bool(0.5)),
        2 => json!(rng.gen_range(-9_007_199_254_740_991i64..=9_007_199_254_740_991i64)),
        3 => json!(rng.gen_range(-1000i64..1000) as f64 / 4.0),
        4 => Value::String(random_key(rng)),
        5 => {
            let len = rng.gen_range(0..4);
            Value::Array((0..len).map(|_| random_json(rng, depth + 1)).collect())
        }
        _ => {
            let len = rng.gen_range(0..4);
            Value::Object((0..len).map(|_| (random_key(rng), random_json(rng, depth + 1))).collect())
        }
    }
}

/// JSON with every integral float in the safe range written as an integer,
/// the one form a number has once it is canonical.
fn integral_as_integer(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => json!(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(integral_as_integer).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), integral_as_integer(v))).collect()),
        _ => value.clone(),
    }
}

// ============================================================================
//  ROUND TRIPS
// ============================================================================

#[test]
fn test_script_round_trip_random() {
    let marshaler = ScriptMarshaler::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let value = random_script(&mut rng, 0);
        let canonical = marshaler.to_canonical(&value).expect("representable value");
        let back = marshaler.from_canonical(&canonical).expect("canonical lifts");
        assert_eq!(back, value);
    }
}

#[test]
fn test_json_round_trip_random() {
    let marshaler = JsonMarshaler::new();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let value = random_json(&mut rng, 0);
        let canonical = marshaler.to_canonical(&value).expect("representable value");
        let back = marshaler.from_canonical(&canonical).expect("canonical lifts");
        assert_eq!(back, integral_as_integer(&value));
        assert_eq!(marshaler.to_canonical(&back).unwrap(), canonical);
    }
}

#[test]
fn test_json_integral_float_comes_back_as_integer() {
    let marshaler = JsonMarshaler::new();
    let value = json!({"scale": 2.0, "ratio": 2.5, "list": [-4.0, 0.0]});

    let canonical = marshaler.to_canonical(&value).unwrap();
    assert_eq!(canonical, marshaler.to_canonical(&json!({"scale": 2, "ratio": 2.5, "list": [-4, 0]})).unwrap());

    let back = marshaler.from_canonical(&canonical).unwrap();
    assert_eq!(back, json!({"scale": 2, "ratio": 2.5, "list": [-4, 0]}));
    assert_ne!(back, value);
    assert_eq!(back["scale"].as_f64(), value["scale"].as_f64());
}

#[test]
fn test_cross_runtime_transfer() {
    let script = ScriptMarshaler::new();
    let native = JsonMarshaler::new();

    let from_script = ScriptValue::object([
        ("foo", ScriptValue::Number(123.0)),
        ("tags", ScriptValue::Array(vec!["a".into(), "b".into()])),
        ("missing", ScriptValue::Undefined),
    ]);

    let canonical = script.to_canonical(&from_script).unwrap();
    let on_native = native.from_canonical(&canonical).unwrap();
    assert_eq!(on_native, json!({"foo": 123, "tags": ["a", "b"], "missing": null}));
}

#[test]
fn test_map_preserves_insertion_order() {
    let marshaler = JsonMarshaler::new();
    let canonical = CanonicalValue::map([("z", 1), ("a", 2), ("m", 3)]);
    let keys: Vec<&str> = canonical.as_map().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, ["z", "a", "m"]);

    // order-insensitive equality
    assert_eq!(canonical, CanonicalValue::map([("a", 2), ("m", 3), ("z", 1)]));
    assert!(marshaler.from_canonical(&canonical).is_ok());
}

// ============================================================================
//  REJECTIONS
// ============================================================================

#[test]
fn test_script_rejects_function_with_path() {
    let marshaler = ScriptMarshaler::new();
    let value = ScriptValue::object([(
        "handlers",
        ScriptValue::Array(vec![ScriptValue::Null, ScriptValue::Function { name: "onTap".into() }]),
    )]);

    let err = marshaler.to_canonical(&value).unwrap_err();
    assert_eq!(
        err,
        MarshalError::Unsupported { type_name: "function", path: "$.handlers[1]".into() }
    );
    assert!(err.to_string().contains("function"));
}

#[test]
fn test_script_rejects_symbol_and_bigint() {
    let marshaler = ScriptMarshaler::new();

    let err = marshaler.to_canonical(&ScriptValue::Symbol { description: Some("tag".into()) }).unwrap_err();
    assert_eq!(err.type_name(), Some("symbol"));
    assert_eq!(err.path(), "$");

    let err = marshaler.to_canonical(&ScriptValue::BigInt(1 << 70)).unwrap_err();
    assert_eq!(err.type_name(), Some("bigint"));
}

#[test]
fn test_undefined_crosses_as_null() {
    let marshaler = ScriptMarshaler::new();
    assert_eq!(marshaler.to_canonical(&ScriptValue::Undefined).unwrap(), CanonicalValue::Null);
}

#[test]
fn test_json_rejects_handles() {
    let marshaler = JsonMarshaler::new();
    let value = CanonicalValue::map([("file", CanonicalValue::Handle(HandleId(7)))]);
    let err = marshaler.from_canonical(&value).unwrap_err();
    assert_eq!(
        err,
        MarshalError::Unsupported { type_name: "opaque handle", path: "$.file".into() }
    );
}

#[test]
fn test_json_rejects_non_finite() {
    let marshaler = JsonMarshaler::new();
    let err = marshaler
        .from_canonical(&CanonicalValue::sequence([1.0, f64::INFINITY]))
        .unwrap_err();
    assert!(matches!(err, MarshalError::NonFinite { ref path, .. } if path == "$[1]"));

    assert!(marshaler.from_canonical(&CanonicalValue::Number(f64::NAN)).is_err());
}

#[test]
fn test_script_keeps_non_finite() {
    let marshaler = ScriptMarshaler::new();
    let canonical = marshaler.to_canonical(&ScriptValue::Number(f64::NEG_INFINITY)).unwrap();
    assert_eq!(marshaler.from_canonical(&canonical).unwrap(), ScriptValue::Number(f64::NEG_INFINITY));
}

#[test]
fn test_depth_limit() {
    let marshaler = JsonMarshaler::with_max_depth(3);
    assert!(marshaler.to_canonical(&json!([[[1]]])).is_ok());

    let err = marshaler.to_canonical(&json!([[[[1]]]])).unwrap_err();
    assert_eq!(err, MarshalError::DepthExceeded { limit: 3, path: "$[0][0][0][0]".into() });
}

// ============================================================================
//  NUMBERS
// ============================================================================

#[test]
fn test_safe_integers_come_back_as_integers() {
    let marshaler = JsonMarshaler::new();
    let canonical = marshaler.to_canonical(&json!(9_007_199_254_740_991i64)).unwrap();
    assert_eq!(canonical.as_i64(), Some(9_007_199_254_740_991));
    assert_eq!(marshaler.from_canonical(&canonical).unwrap(), json!(9_007_199_254_740_991i64));
}

#[test]
fn test_precision_boundary_is_lossy() {
    let marshaler = JsonMarshaler::new();
    // 2^53 + 1 is not representable as f64
    let canonical = marshaler.to_canonical(&json!(9_007_199_254_740_993u64)).unwrap();
    assert_eq!(canonical, CanonicalValue::Number(9_007_199_254_740_992.0));
    assert_eq!(canonical.as_i64(), None);
}

#[test]
fn test_display_is_json_like() {
    let value = CanonicalValue::map([
        ("foo", CanonicalValue::from(123)),
        ("bar", CanonicalValue::sequence(["x"])),
        ("h", CanonicalValue::Handle(HandleId(3))),
    ]);
    assert_eq!(value.to_string(), r#"{"foo":123,"bar":["x"],"h":<handle-3>}"#);
}

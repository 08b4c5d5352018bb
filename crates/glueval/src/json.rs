//! # JSON-shaped native values
//!
//! The native side exchanges plain objects shaped like `serde_json::Value`.
//! JSON has no room for opaque handles or non-finite numbers, so those fail
//! on the way out.
//!
//! Canonical numbers carry no integer/float distinction, so any integral
//! number in the safe range comes back as a JSON integer: `2.0` goes in and
//! `2` comes out. The two are the same number; the canonical value survives
//! a round trip unchanged.

use indexmap::IndexMap;
use serde_json::Number;
use serde_json::Value;

use crate::marshal::Result;
use crate::marshal::ValueMarshaler;
use crate::marshal::Walk;
use crate::marshal::DEFAULT_MAX_DEPTH;
use crate::value::is_safe_integer;
use crate::value::CanonicalValue;
use crate::value::MAX_SAFE_INTEGER;

/// Marshaler for `serde_json::Value`.
#[derive(Clone, Copy, Debug)]
pub struct JsonMarshaler {
    max_depth: usize,
}

impl JsonMarshaler {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn lower<'v>(&self, value: &'v Value, walk: &mut Walk<'v>) -> Result<CanonicalValue> {
        match value {
            Value::Null => Ok(CanonicalValue::Null),
            Value::Bool(b) => Ok(CanonicalValue::Bool(*b)),
            Value::Number(n) => Ok(CanonicalValue::Number(lower_number(n, walk))),
            Value::String(s) => Ok(CanonicalValue::String(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(walk.index(i, |w| self.lower(item, w))?);
                }
                Ok(CanonicalValue::Sequence(out))
            }
            Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, val) in map {
                    let lowered = walk.key(key, |w| self.lower(val, w))?;
                    out.insert(key.clone(), lowered);
                }
                Ok(CanonicalValue::Map(out))
            }
        }
    }

    fn lift<'v>(&self, value: &'v CanonicalValue, walk: &mut Walk<'v>) -> Result<Value> {
        match value {
            CanonicalValue::Null => Ok(Value::Null),
            CanonicalValue::Bool(b) => Ok(Value::Bool(*b)),
            CanonicalValue::Number(n) => lift_number(*n, walk),
            CanonicalValue::String(s) => Ok(Value::String(s.clone())),
            CanonicalValue::Handle(_) => Err(walk.unsupported(value.type_name())),
            CanonicalValue::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(walk.index(i, |w| self.lift(item, w))?);
                }
                Ok(Value::Array(out))
            }
            CanonicalValue::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, val) in map {
                    let lifted = walk.key(key, |w| self.lift(val, w))?;
                    out.insert(key.clone(), lifted);
                }
                Ok(Value::Object(out))
            }
        }
    }
}

impl Default for JsonMarshaler {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueMarshaler for JsonMarshaler {
    type Native = Value;

    fn runtime(&self) -> &'static str {
        "native"
    }

    fn to_canonical(&self, value: &Value) -> Result<CanonicalValue> {
        self.lower(value, &mut Walk::new(self.max_depth))
    }

    fn from_canonical(&self, value: &CanonicalValue) -> Result<Value> {
        self.lift(value, &mut Walk::new(self.max_depth))
    }
}

fn lower_number(n: &Number, walk: &Walk<'_>) -> f64 {
    if let Some(i) = n.as_i64() {
        if (i as f64).abs() > MAX_SAFE_INTEGER {
            tracing::trace!(path = %walk.path(), value = i, "integer beyond safe range loses precision");
        }
        return i as f64;
    }
    if let Some(u) = n.as_u64() {
        tracing::trace!(path = %walk.path(), value = u, "integer beyond safe range loses precision");
        return u as f64;
    }
    // as_f64 is always Some for a number that is neither i64 nor u64
    n.as_f64().unwrap_or(f64::NAN)
}

fn lift_number(n: f64, walk: &Walk<'_>) -> Result<Value> {
    if is_safe_integer(n) {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| walk.non_finite(n))
}

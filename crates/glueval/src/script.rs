//! # Script runtime values
//!
//! [`ScriptValue`] mirrors the public value surface of the scripting runtime,
//! including the kinds that must not cross: functions, symbols and bigints.
//! `undefined` crosses as null.

use indexmap::IndexMap;

use crate::marshal::Result;
use crate::marshal::ValueMarshaler;
use crate::marshal::Walk;
use crate::marshal::DEFAULT_MAX_DEPTH;
use crate::value::CanonicalValue;
use crate::value::HandleId;

/// A value as seen by script code.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Array(Vec<ScriptValue>),
    /// Plain object; property order is preserved.
    Object(IndexMap<String, ScriptValue>),
    Function { name: String },
    Symbol { description: Option<String> },
    /// A native object exposed to script by handle.
    External(HandleId),
}

impl ScriptValue {
    /// Builds an object from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, ScriptValue)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The `typeof` name, with arrays and externals called out.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function { .. } => "function",
            Self::Symbol { .. } => "symbol",
            Self::External(_) => "external",
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Marshaler for the script runtime.
#[derive(Clone, Copy, Debug)]
pub struct ScriptMarshaler {
    max_depth: usize,
}

impl ScriptMarshaler {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn lower<'v>(&self, value: &'v ScriptValue, walk: &mut Walk<'v>) -> Result<CanonicalValue> {
        match value {
            ScriptValue::Undefined | ScriptValue::Null => Ok(CanonicalValue::Null),
            ScriptValue::Boolean(b) => Ok(CanonicalValue::Bool(*b)),
            ScriptValue::Number(n) => Ok(CanonicalValue::Number(*n)),
            ScriptValue::String(s) => Ok(CanonicalValue::String(s.clone())),
            ScriptValue::External(id) => Ok(CanonicalValue::Handle(*id)),
            ScriptValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(walk.index(i, |w| self.lower(item, w))?);
                }
                Ok(CanonicalValue::Sequence(out))
            }
            ScriptValue::Object(props) => {
                let mut out = IndexMap::with_capacity(props.len());
                for (key, prop) in props {
                    let lowered = walk.key(key, |w| self.lower(prop, w))?;
                    out.insert(key.clone(), lowered);
                }
                Ok(CanonicalValue::Map(out))
            }
            other @ (ScriptValue::BigInt(_)
            | ScriptValue::Function { .. }
            | ScriptValue::Symbol { .. }) => Err(walk.unsupported(other.type_of())),
        }
    }

    fn lift<'v>(&self, value: &'v CanonicalValue, walk: &mut Walk<'v>) -> Result<ScriptValue> {
        match value {
            CanonicalValue::Null => Ok(ScriptValue::Null),
            CanonicalValue::Bool(b) => Ok(ScriptValue::Boolean(*b)),
            CanonicalValue::Number(n) => Ok(ScriptValue::Number(*n)),
            CanonicalValue::String(s) => Ok(ScriptValue::String(s.clone())),
            CanonicalValue::Handle(id) => Ok(ScriptValue::External(*id)),
            CanonicalValue::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(walk.index(i, |w| self.lift(item, w))?);
                }
                Ok(ScriptValue::Array(out))
            }
            CanonicalValue::Map(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, val) in map {
                    let lifted = walk.key(key, |w| self.lift(val, w))?;
                    out.insert(key.clone(), lifted);
                }
                Ok(ScriptValue::Object(out))
            }
        }
    }
}

impl Default for ScriptMarshaler {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueMarshaler for ScriptMarshaler {
    type Native = ScriptValue;

    fn runtime(&self) -> &'static str {
        "script"
    }

    fn to_canonical(&self, value: &ScriptValue) -> Result<CanonicalValue> {
        self.lower(value, &mut Walk::new(self.max_depth))
    }

    fn from_canonical(&self, value: &CanonicalValue) -> Result<ScriptValue> {
        self.lift(value, &mut Walk::new(self.max_depth))
    }
}

//! # Marshaling contract
//!
//! A [`ValueMarshaler`] converts one runtime's native values to and from
//! [`CanonicalValue`]. The built-in marshalers walk the value with a `Walk`,
//! which tracks the path to the current node (for diagnostics) and enforces
//! a nesting limit.

use crate::value::CanonicalValue;

/// Default nesting limit for a single conversion.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Marshaling errors.
///
/// Every variant carries the path to the offending node, rooted at `$`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    /// The value has a type that cannot cross the boundary.
    #[error("unsupported {type_name} value at {path}")]
    Unsupported { type_name: &'static str, path: String },
    /// NaN or an infinity where the target has no representation for it.
    #[error("non-finite number {value} at {path} has no representation in the target runtime")]
    NonFinite { value: f64, path: String },
    /// The value is nested deeper than the configured limit.
    #[error("value at {path} is nested deeper than the limit of {limit}")]
    DepthExceeded { limit: usize, path: String },
}

impl MarshalError {
    /// Path to the offending node.
    pub fn path(&self) -> &str {
        match self {
            Self::Unsupported { path, .. } => path.as_str(),
            Self::NonFinite { path, .. } => path.as_str(),
            Self::DepthExceeded { path, .. } => path.as_str(),
        }
    }

    /// The rejected type, when the failure was a type restriction.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Unsupported { type_name, .. } => Some(*type_name),
            Self::NonFinite { .. } => Some("number"),
            Self::DepthExceeded { .. } => None,
        }
    }

    /// Re-roots the path under a positional argument, turning `$.foo` into
    /// `$[index].foo`.
    pub fn within_argument(self, index: usize) -> Self {
        let reroot = |path: String| match path.strip_prefix('$') {
            Some(rest) => format!("$[{}]{}", index, rest),
            None => format!("$[{}]{}", index, path),
        };
        match self {
            Self::Unsupported { type_name, path } => Self::Unsupported {
                type_name,
                path: reroot(path),
            },
            Self::NonFinite { value, path } => Self::NonFinite {
                value,
                path: reroot(path),
            },
            Self::DepthExceeded { limit, path } => Self::DepthExceeded {
                limit,
                path: reroot(path),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, MarshalError>;

/// Converts between a runtime's native values and [`CanonicalValue`].
///
/// # Invariants
/// - Total over the runtime's public value surface: every input either
///   converts or fails with a `MarshalError` naming the offending type.
/// - Synchronous and side-effect free; no reference to the input is kept.
/// - `from_canonical(to_canonical(v)) == v` for every `v` whose shape is
///   representable canonically.
pub trait ValueMarshaler {
    /// The runtime's own value type.
    type Native;

    /// Name of the runtime this marshaler targets, for logs.
    fn runtime(&self) -> &'static str;

    fn to_canonical(&self, value: &Self::Native) -> Result<CanonicalValue>;

    fn from_canonical(&self, value: &CanonicalValue) -> Result<Self::Native>;
}

enum Segment<'a> {
    Index(usize),
    Key(&'a str),
}

/// Position and depth tracker for a single conversion.
pub(crate) struct Walk<'a> {
    max_depth: usize,
    segments: Vec<Segment<'a>>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            segments: Vec::new(),
        }
    }

    /// Renders the current path, e.g. `$[2].name` or `$["odd key"]`.
    pub(crate) fn path(&self) -> String {
        render(&self.segments)
    }

    /// Runs `f` one level down, at sequence position `index`.
    pub(crate) fn index<T>(&mut self, index: usize, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend(Segment::Index(index), f)
    }

    /// Runs `f` one level down, under map key `key`.
    pub(crate) fn key<T>(&mut self, key: &'a str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend(Segment::Key(key), f)
    }

    pub(crate) fn unsupported(&self, type_name: &'static str) -> MarshalError {
        MarshalError::Unsupported {
            type_name,
            path: self.path(),
        }
    }

    pub(crate) fn non_finite(&self, value: f64) -> MarshalError {
        MarshalError::NonFinite {
            value,
            path: self.path(),
        }
    }

    fn descend<T>(&mut self, segment: Segment<'a>, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.segments.push(segment);
        if self.segments.len() > self.max_depth {
            let err = MarshalError::DepthExceeded {
                limit: self.max_depth,
                path: self.path(),
            };
            self.segments.pop();
            return Err(err);
        }
        let result = f(self);
        self.segments.pop();
        result
    }
}

fn render(segments: &[Segment<'_>]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            Segment::Index(i) => out.push_str(&format!("[{}]", i)),
            Segment::Key(k) if is_identifier(k) => {
                out.push('.');
                out.push_str(k);
            }
            Segment::Key(k) => out.push_str(&format!("[{:?}]", k)),
        }
    }
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

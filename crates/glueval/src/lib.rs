//! # glueval
//!
//! The value model shared by both sides of the glue broker.
//!
//! Every value that crosses between the script runtime and the native runtime
//! passes through [`CanonicalValue`]. Each runtime's own representation is
//! converted at the boundary by a [`ValueMarshaler`]; nothing past the boundary
//! ever sees a runtime-native value.
//!
//! ## Philosophy
//!
//! - **Closed Variant**: Null, Bool, Number, String, Sequence, Map and opaque
//!   handles. Anything else is a `MarshalError`, never a silent coercion.
//! - **Float Numbers**: Numbers are `f64`, matching the least capable side.
//!   Integers beyond `MAX_SAFE_INTEGER` are not guaranteed exact.
//! - **No Retention**: Conversions are synchronous and borrow their input.

pub mod json;
pub mod marshal;
pub mod script;
pub mod value;

pub use json::JsonMarshaler;
pub use marshal::MarshalError;
pub use marshal::ValueMarshaler;
pub use marshal::DEFAULT_MAX_DEPTH;
pub use script::ScriptMarshaler;
pub use script::ScriptValue;
pub use value::CanonicalValue;
pub use value::HandleId;
pub use value::MAX_SAFE_INTEGER;

#[cfg(test)]
mod tests;

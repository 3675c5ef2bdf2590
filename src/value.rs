//! Values carried by changed properties.
//!
//! Bus variants are dynamically typed. The monitor only ever needs booleans,
//! so decoding is an explicit, fallible step rather than an implicit coercion.

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// A decoded property value.
///
/// # Examples
///
/// ```
/// use threshold_monitor::PropertyValue;
///
/// assert_eq!(PropertyValue::Bool(true).decode_bool(), Ok(true));
/// assert!(PropertyValue::Int(1).decode_bool().is_err());
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Any other wire type, kept only as its type signature.
    Other(String),
}

impl PropertyValue {
    /// Decode as a boolean. Integers and strings are not coerced.
    pub fn decode_bool(&self) -> Result<bool, EnvelopeError> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(EnvelopeError::type_mismatch("bool", other.type_name())),
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Other(signature) => signature,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Other(signature) => write!(f, "<{signature}>"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bool() {
        assert_eq!(PropertyValue::Bool(false).decode_bool(), Ok(false));
        assert_eq!(PropertyValue::from(true).decode_bool(), Ok(true));
    }

    #[test]
    fn test_decode_bool_rejects_coercion() {
        let err = PropertyValue::Int(1).decode_bool().unwrap_err();
        assert_eq!(err, EnvelopeError::type_mismatch("bool", "int"));

        let err = PropertyValue::from("true").decode_bool().unwrap_err();
        assert_eq!(err, EnvelopeError::type_mismatch("bool", "string"));
    }

    #[test]
    fn test_other_reports_signature() {
        let v = PropertyValue::Other("a{sv}".to_string());
        assert_eq!(v.type_name(), "a{sv}");
        assert_eq!(v.to_string(), "<a{sv}>");
        assert!(v.decode_bool().is_err());
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_value(PropertyValue::Bool(true)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "bool", "value": true}));
    }
}

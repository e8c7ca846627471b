// src/value.rs - Tag value and data type
use crate::error::{PlcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a tag.
///
/// Serializes as a bare JSON scalar so persisted tag records stay readable.
///
/// # Examples
///
/// ```rust
/// use plc_runtime::Value;
///
/// let int_val = Value::Int(42);
/// assert_eq!(int_val.as_float(), Some(42.0));
/// assert_eq!(Value::Bool(true).as_float(), Some(1.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
}

impl Value {
    /// Convert to boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(*f != 0.0),
        }
    }

    /// Convert to integer if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Boolean,
            Value::Int(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{:.3}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Declared data type of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Float,
    Integer,
    Boolean,
}

impl DataType {
    /// Initial value of a freshly created tag
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Float => Value::Float(0.0),
            DataType::Integer => Value::Int(0),
            DataType::Boolean => Value::Bool(false),
        }
    }

    /// Convert `value` into this data type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let converted = match self {
            DataType::Float => value.as_float().map(Value::Float),
            DataType::Integer => value.as_int().map(Value::Int),
            DataType::Boolean => value.as_bool().map(Value::Bool),
        };
        converted.ok_or(PlcError::TypeMismatch {
            expected: self.name(),
            actual: value.type_name(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Float(42.7).as_int(), Some(42));
        assert_eq!(Value::Float(f64::NAN).as_bool(), None);
        assert_eq!(Value::Float(f64::INFINITY).as_int(), None);
    }

    #[test]
    fn test_coerce_into_declared_type() {
        assert_eq!(DataType::Float.coerce(Value::Int(3)).unwrap(), Value::Float(3.0));
        assert_eq!(DataType::Boolean.coerce(Value::Float(2.0)).unwrap(), Value::Bool(true));
        assert!(matches!(
            DataType::Integer.coerce(Value::Float(f64::NAN)),
            Err(PlcError::TypeMismatch { expected: "integer", .. })
        ));
    }

    #[test]
    fn test_value_serializes_as_scalar() {
        assert_eq!(serde_json::to_string(&Value::Float(1.5)).unwrap(), "1.5");
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
    }
}

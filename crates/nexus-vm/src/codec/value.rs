//! Runtime values.
//!
//! A [`Value`] is one decoded column of a row. Accessors are type-checked:
//! reading a value through an accessor of another kind is an error instead
//! of a reinterpretation of its bits.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{VmError, VmResult};
use crate::schema::DataType;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Timestamp (milliseconds since epoch).
    Timestamp(i64),
    /// Date (days since epoch).
    Date(i32),
    /// String value.
    String(String),
}

impl Value {
    /// Creates a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Value::String(v.into())
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the data type of this value, or `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int16(_) => Some(DataType::Int16),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float(_) => Some(DataType::Float),
            Value::Double(_) => Some(DataType::Double),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Date(_) => Some(DataType::Date),
            Value::String(_) => Some(DataType::Varchar),
        }
    }

    fn kind_name(&self) -> String {
        self.data_type()
            .map_or_else(|| "NULL".to_string(), |t| t.to_string())
    }

    /// Reads a boolean.
    pub fn as_bool(&self) -> VmResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(VmError::type_mismatch(DataType::Bool, other.kind_name())),
        }
    }

    /// Reads an integral value, widening to i64.
    ///
    /// Timestamps and dates are integral and widen as well.
    pub fn as_i64(&self) -> VmResult<i64> {
        match self {
            Value::Int16(v) => Ok(i64::from(*v)),
            Value::Int32(v) | Value::Date(v) => Ok(i64::from(*v)),
            Value::Int64(v) | Value::Timestamp(v) => Ok(*v),
            other => Err(VmError::type_mismatch(DataType::Int64, other.kind_name())),
        }
    }

    /// Reads a numeric value, widening to f64.
    pub fn as_f64(&self) -> VmResult<f64> {
        match self {
            Value::Int16(v) => Ok(f64::from(*v)),
            Value::Int32(v) => Ok(f64::from(*v)),
            #[allow(clippy::cast_precision_loss)]
            Value::Int64(v) => Ok(*v as f64),
            Value::Float(v) => Ok(f64::from(*v)),
            Value::Double(v) => Ok(*v),
            other => Err(VmError::type_mismatch(DataType::Double, other.kind_name())),
        }
    }

    /// Reads a string.
    pub fn as_str(&self) -> VmResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(VmError::type_mismatch(DataType::Varchar, other.kind_name())),
        }
    }

    /// Renders this value as one component of a partition key.
    ///
    /// NULL renders as the empty string.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Converts this value to a column of type `target`.
    ///
    /// Only lossless or numeric conversions are accepted. NULL converts to
    /// NULL of any type.
    pub fn coerce_to(&self, target: DataType) -> VmResult<Value> {
        if self.is_null() || self.data_type() == Some(target) {
            return Ok(self.clone());
        }
        let mismatch = || VmError::type_mismatch(target, self.kind_name());
        match target {
            DataType::Int16 => i16::try_from(self.as_i64()?)
                .map(Value::Int16)
                .map_err(|_| mismatch()),
            DataType::Int32 => i32::try_from(self.as_i64()?)
                .map(Value::Int32)
                .map_err(|_| mismatch()),
            DataType::Int64 => self.as_i64().map(Value::Int64),
            DataType::Timestamp => self.as_i64().map(Value::Timestamp),
            #[allow(clippy::cast_possible_truncation)]
            DataType::Float => self.as_f64().map(|v| Value::Float(v as f32)),
            DataType::Double => self.as_f64().map(Value::Double),
            DataType::Bool | DataType::Date | DataType::Varchar => Err(mismatch()),
        }
    }

    /// Compares two values of compatible kinds.
    ///
    /// NULL sorts before every non-NULL value. Values of unrelated kinds do
    /// not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Float(_) | Value::Double(_), _) | (_, Value::Float(_) | Value::Double(_)) => {
                let a = self.as_f64().ok()?;
                let b = other.as_f64().ok()?;
                a.partial_cmp(&b)
            }
            (a, b) => Some(a.as_i64().ok()?.cmp(&b.as_i64().ok()?)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.data_type() == other.data_type() && self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "ts:{}", v),
            Value::Date(v) => write!(f, "date:{}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

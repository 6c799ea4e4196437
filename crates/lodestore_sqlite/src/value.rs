//! SQL parameter values and their JSON conversions.

use serde_json::Value;

/// A bound SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer. Also carries booleans (0/1) and epoch-millisecond
    /// datetimes.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text. Also carries JSON-encoded arrays and objects.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Converts a JSON scalar to its bound form.
    ///
    /// Booleans become integers 0/1; arrays and objects are stored as
    /// their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else {
                    SqlValue::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Converts back to a JSON scalar, without schema knowledge.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => Value::from(*f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(b) => Value::from(b.clone()),
        }
    }
}

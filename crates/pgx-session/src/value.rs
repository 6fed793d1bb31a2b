//! Scalar value representation.

use bytes::Bytes;

/// A single scalar returned by the server.
///
/// Sessions hand these back from [`Session::query_scalar`](crate::Session::query_scalar);
/// use [`FromValue`](crate::FromValue) to turn them into concrete types.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value (`bool`).
    Bool(bool),
    /// 16-bit signed integer (`int2`).
    Int2(i16),
    /// 32-bit signed integer (`int4`).
    Int4(i32),
    /// 64-bit signed integer (`int8`).
    Int8(i64),
    /// 64-bit floating point (`float8`).
    Float8(f64),
    /// Text value (`text`, `varchar`).
    Text(String),
    /// Binary value (`bytea`).
    Bytea(Bytes),
}

impl Value {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the server type name as a string.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int2(_) => "int2",
            Self::Int4(_) => "int4",
            Self::Int8(_) => "int8",
            Self::Float8(_) => "float8",
            Self::Text(_) => "text",
            Self::Bytea(_) => "bytea",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int8(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float8(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytea(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

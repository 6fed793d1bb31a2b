//! Trait for converting server values to Rust types.

use bytes::Bytes;

use crate::error::DecodeError;
use crate::value::Value;

/// Trait for types that can be decoded from a scalar [`Value`].
///
/// Widening integer conversions always succeed. Narrowing conversions are
/// range-checked and fail with [`DecodeError::OutOfRange`].
pub trait FromValue: Sized {
    /// Convert from a value to this type.
    fn from_value(value: &Value) -> Result<Self, DecodeError>;

    /// Convert from a nullable value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_value_nullable(value: &Value) -> Result<Option<Self>, DecodeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_value(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &Value) -> DecodeError {
    match value {
        Value::Null => DecodeError::UnexpectedNull,
        _ => DecodeError::TypeMismatch {
            expected,
            actual: value.type_name(),
        },
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bool(v) => Ok(*v),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let out_of_range = || DecodeError::OutOfRange { target_type: "i16" };
        match value {
            Value::Int2(v) => Ok(*v),
            Value::Int4(v) => i16::try_from(*v).map_err(|_| out_of_range()),
            Value::Int8(v) => i16::try_from(*v).map_err(|_| out_of_range()),
            _ => Err(mismatch("i16", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int4(v) => Ok(*v),
            Value::Int2(v) => Ok(i32::from(*v)),
            Value::Int8(v) => {
                i32::try_from(*v).map_err(|_| DecodeError::OutOfRange { target_type: "i32" })
            }
            _ => Err(mismatch("i32", value)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int8(v) => Ok(*v),
            Value::Int4(v) => Ok(i64::from(*v)),
            Value::Int2(v) => Ok(i64::from(*v)),
            _ => Err(mismatch("i64", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Float8(v) => Ok(*v),
            Value::Int2(v) => Ok(f64::from(*v)),
            Value::Int4(v) => Ok(f64::from(*v)),
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bytea(v) => Ok(v.clone()),
            _ => Err(mismatch("Bytes", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bytea(v) => Ok(v.to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        T::from_value_nullable(value)
    }
}

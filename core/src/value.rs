//! Scalar values exchanged between callers, the registry and drivers.

use std::fmt::Display;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeBinaryArray, LargeStringArray, NullArray,
    StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::DataType;

use crate::error::{Error, Result, Status};

/// A fetched row, one value per result column.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Natural Arrow type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Boolean,
            Value::Int(_) => DataType::Int64,
            Value::Double(_) => DataType::Float64,
            Value::Text(_) => DataType::Utf8,
            Value::Bytes(_) => DataType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts to a value acceptable for `data_type`, or `None` if the two
    /// are incompatible. `NULL` fits every type; integers widen to floats.
    pub fn coerce(&self, data_type: &DataType) -> Option<Value> {
        match (self, data_type) {
            (Value::Null, _) => Some(Value::Null),
            (_, DataType::Null) => None,
            (Value::Bool(_), DataType::Boolean) => Some(self.clone()),
            (Value::Int(value), t) if t.is_integer() => fits_integer(*value, t).then(|| self.clone()),
            (Value::Int(value), DataType::Float32 | DataType::Float64) => {
                Some(Value::Double(*value as f64))
            }
            (Value::Double(_), DataType::Float32 | DataType::Float64) => Some(self.clone()),
            (Value::Text(_), DataType::Utf8 | DataType::LargeUtf8) => Some(self.clone()),
            (Value::Bytes(_), DataType::Binary | DataType::LargeBinary) => Some(self.clone()),
            _ => None,
        }
    }

    /// Reads the value at `row` of an Arrow column.
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Value> {
        if array.is_null(row) {
            return Ok(Value::Null);
        }
        macro_rules! int {
            ($ty:ty) => {
                Value::Int(downcast::<$ty>(array)?.value(row) as i64)
            };
        }
        let value = match array.data_type() {
            DataType::Null => Value::Null,
            DataType::Boolean => Value::Bool(downcast::<BooleanArray>(array)?.value(row)),
            DataType::Int8 => int!(Int8Array),
            DataType::Int16 => int!(Int16Array),
            DataType::Int32 => int!(Int32Array),
            DataType::Int64 => int!(Int64Array),
            DataType::UInt8 => int!(UInt8Array),
            DataType::UInt16 => int!(UInt16Array),
            DataType::UInt32 => int!(UInt32Array),
            DataType::UInt64 => {
                let value = downcast::<UInt64Array>(array)?.value(row);
                Value::Int(i64::try_from(value).map_err(|_| {
                    Error::with_message_and_status(
                        &format!("Value {} does not fit in a signed 64-bit integer", value),
                        Status::Execution,
                    )
                })?)
            }
            DataType::Float32 => Value::Double(downcast::<Float32Array>(array)?.value(row).into()),
            DataType::Float64 => Value::Double(downcast::<Float64Array>(array)?.value(row)),
            DataType::Utf8 => Value::Text(downcast::<StringArray>(array)?.value(row).into()),
            DataType::LargeUtf8 => {
                Value::Text(downcast::<LargeStringArray>(array)?.value(row).into())
            }
            DataType::Binary => Value::Bytes(downcast::<BinaryArray>(array)?.value(row).into()),
            DataType::LargeBinary => {
                Value::Bytes(downcast::<LargeBinaryArray>(array)?.value(row).into())
            }
            other => {
                return Err(Error::with_message_and_status(
                    &format!("Unsupported column type: {}", other),
                    Status::Execution,
                ))
            }
        };
        Ok(value)
    }
}

fn fits_integer(value: i64, data_type: &DataType) -> bool {
    match data_type {
        DataType::Int8 => i8::try_from(value).is_ok(),
        DataType::Int16 => i16::try_from(value).is_ok(),
        DataType::Int32 => i32::try_from(value).is_ok(),
        DataType::UInt8 => u8::try_from(value).is_ok(),
        DataType::UInt16 => u16::try_from(value).is_ok(),
        DataType::UInt32 => u32::try_from(value).is_ok(),
        DataType::UInt64 => value >= 0,
        _ => true,
    }
}

fn downcast<T: 'static>(array: &dyn Array) -> Result<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::with_message_and_status(
            &format!("Column does not match its type {}", array.data_type()),
            Status::Execution,
        )
    })
}

/// Builds an Arrow column of `data_type` out of values already coerced to it.
pub fn values_to_array(data_type: &DataType, values: &[Value]) -> Result<ArrayRef> {
    let mismatch = |value: &Value| {
        Error::with_message_and_status(
            &format!("Value {} does not fit column type {}", value, data_type),
            Status::Execution,
        )
    };
    let array: ArrayRef = match data_type {
        DataType::Null => Arc::new(NullArray::new(values.len())),
        DataType::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bool(b) => Ok(Some(*b)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Int64 => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Int(i) => Ok(Some(*i)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Double(d) => Ok(Some(*d)),
                    Value::Int(i) => Ok(Some(*i as f64)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Utf8 => Arc::new(StringArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Text(s) => Ok(Some(s.as_str())),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Binary => Arc::new(BinaryArray::from_opt_vec(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bytes(b) => Ok(Some(b.as_slice())),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        other => {
            return Err(Error::with_message_and_status(
                &format!("Unsupported column type: {}", other),
                Status::Execution,
            ))
        }
    };
    Ok(array)
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

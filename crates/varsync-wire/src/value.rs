//! Tagged scalar value codec
//!
//! Each scalar type has exactly one tag/shape pair:
//! - `1` Int64: 8 bytes, two's complement LE
//! - `2` Float64: 8 bytes, IEEE 754 LE
//! - `3` String: raw UTF-8, length framed by the container
//! - `4` Boolean: 1 byte, 0 or 1
//!
//! Tag `0` means no value. Any other tag decodes to [`DecodedValue::Unknown`].

use bytes::Bytes;

use varsync_core::{DataType, Value, VarsyncError, VarsyncResult};

/// Tag for "no value"
pub const TAG_ABSENT: u8 = 0;

/// Result of decoding a tagged value
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedValue {
    Known(Value),
    /// Tag 0; the sender had no value
    Absent,
    /// Unrecognized tag; the value is unavailable
    Unknown(u8),
}

impl DecodedValue {
    pub fn into_value(self) -> Option<Value> {
        match self {
            DecodedValue::Known(v) => Some(v),
            _ => None,
        }
    }
}

/// Encode `value` for a variable declared as `data_type`.
/// The codec never coerces; a value of another type is a `TypeMismatch`.
pub fn encode(data_type: DataType, value: &Value) -> VarsyncResult<Bytes> {
    if value.data_type() != data_type {
        return Err(VarsyncError::TypeMismatch {
            expected: data_type,
            actual: value.data_type(),
        });
    }
    Ok(match value {
        Value::Int64(v) => Bytes::copy_from_slice(&v.to_le_bytes()),
        Value::Float64(v) => Bytes::copy_from_slice(&v.to_le_bytes()),
        Value::String(v) => Bytes::copy_from_slice(v.as_bytes()),
        Value::Boolean(v) => Bytes::copy_from_slice(&[*v as u8]),
    })
}

/// Decode a tagged value. Unknown tags never fail; a known tag with a
/// malformed shape does.
pub fn decode(tag: u8, data: &[u8]) -> VarsyncResult<DecodedValue> {
    if tag == TAG_ABSENT {
        return Ok(DecodedValue::Absent);
    }
    let Some(data_type) = DataType::from_byte(tag) else {
        return Ok(DecodedValue::Unknown(tag));
    };

    let value = match data_type {
        DataType::Int64 => Value::Int64(i64::from_le_bytes(fixed(data_type, data)?)),
        DataType::Float64 => Value::Float64(f64::from_le_bytes(fixed(data_type, data)?)),
        DataType::String => Value::String(String::from_utf8(data.to_vec()).map_err(|_| {
            VarsyncError::InvalidWireFormat("String value is not valid UTF-8".into())
        })?),
        DataType::Boolean => match data {
            [0] => Value::Boolean(false),
            [1] => Value::Boolean(true),
            _ => {
                return Err(VarsyncError::InvalidWireFormat(format!(
                    "Malformed boolean value ({} bytes)",
                    data.len()
                )))
            }
        },
    };
    Ok(DecodedValue::Known(value))
}

fn fixed<const N: usize>(data_type: DataType, data: &[u8]) -> VarsyncResult<[u8; N]> {
    data.try_into().map_err(|_| {
        VarsyncError::InvalidWireFormat(format!(
            "Malformed {} value: expected {} bytes, got {}",
            data_type,
            N,
            data.len()
        ))
    })
}

/// A value as carried inside a batch item: tag plus raw shape
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EncodedValue {
    pub tag: u8,
    pub data: Bytes,
}

impl EncodedValue {
    pub fn absent() -> Self {
        EncodedValue::default()
    }

    /// Encode against a declared type
    pub fn encode(data_type: DataType, value: &Value) -> VarsyncResult<Self> {
        Ok(EncodedValue {
            tag: data_type.to_byte(),
            data: encode(data_type, value)?,
        })
    }

    /// Encode with the value's own type
    pub fn from_value(value: &Value) -> Self {
        let data_type = value.data_type();
        EncodedValue {
            tag: data_type.to_byte(),
            data: encode(data_type, value).unwrap_or_default(),
        }
    }

    pub fn decode(&self) -> VarsyncResult<DecodedValue> {
        decode(self.tag, &self.data)
    }

    #[inline]
    pub fn is_absent(&self) -> bool {
        self.tag == TAG_ABSENT
    }
}

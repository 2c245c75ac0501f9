//! Variable model
//!
//! A provider declares a fixed set of [`VariableDefinition`]s at startup and
//! owns one mutable [`VariableState`] per definition. Consumers hold a
//! read-only replica of those states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, VariableId, VarsyncError, VarsyncResult};

/// Scalar type of a variable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    Int64 = 1,
    Float64 = 2,
    String = 3,
    Boolean = 4,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Int64,
        DataType::Float64,
        DataType::String,
        DataType::Boolean,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(DataType::Int64),
            2 => Some(DataType::Float64),
            3 => Some(DataType::String),
            4 => Some(DataType::Boolean),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Canonical label, also the fingerprint input
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may write a variable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum AccessType {
    ReadOnly = 0,
    ReadWrite = 1,
}

impl AccessType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AccessType::ReadOnly),
            1 => Some(AccessType::ReadWrite),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::ReadOnly => "read-only",
            AccessType::ReadWrite => "read-write",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal quality of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Quality {
    #[default]
    Good = 0,
    Bad = 1,
    Uncertain = 2,
}

impl Quality {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Quality::Good),
            1 => Some(Quality::Bad),
            2 => Some(Quality::Uncertain),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Registry verdict on a provider's definition set.
/// Reported asynchronously; a provider must not assume `Ok` until told.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ValidationState {
    #[default]
    Unspecified = 0,
    Ok = 1,
    Invalid = 2,
}

impl ValidationState {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValidationState::Unspecified),
            1 => Some(ValidationState::Ok),
            2 => Some(ValidationState::Invalid),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A typed scalar value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int64(_) => DataType::Int64,
            Value::Float64(_) => DataType::Float64,
            Value::String(_) => DataType::String,
            Value::Boolean(_) => DataType::Boolean,
        }
    }

    /// Parse text into a value of the given type. No cross-type coercion
    /// beyond reading the text.
    pub fn parse(data_type: DataType, text: &str) -> VarsyncResult<Value> {
        let invalid = || VarsyncError::InvalidValue {
            data_type,
            input: text.to_string(),
        };
        match data_type {
            DataType::Int64 => text.trim().parse().map(Value::Int64).map_err(|_| invalid()),
            DataType::Float64 => text
                .trim()
                .parse()
                .map(Value::Float64)
                .map_err(|_| invalid()),
            DataType::String => Ok(Value::String(text.to_string())),
            DataType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Boolean(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }

    /// The zero value of a type
    pub fn default_for(data_type: DataType) -> Value {
        match data_type {
            DataType::Int64 => Value::Int64(0),
            DataType::Float64 => Value::Float64(0.0),
            DataType::String => Value::String(String::new()),
            DataType::Boolean => Value::Boolean(false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
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

/// Declaration of one variable. Immutable once announced.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub id: VariableId,
    /// Dotted path, unique within the provider
    pub key: String,
    pub data_type: DataType,
    pub access: AccessType,
    /// Informational only
    #[serde(default)]
    pub experimental: bool,
}

impl VariableDefinition {
    pub fn new(id: u32, key: impl Into<String>, data_type: DataType, access: AccessType) -> Self {
        VariableDefinition {
            id: VariableId(id),
            key: key.into(),
            data_type,
            access,
            experimental: false,
        }
    }

    pub fn experimental(mut self, experimental: bool) -> Self {
        self.experimental = experimental;
        self
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.access == AccessType::ReadWrite
    }
}

/// Live state of one variable
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableState {
    pub id: VariableId,
    /// `None` until a value is first set
    pub value: Option<Value>,
    pub quality: Quality,
    pub timestamp: Timestamp,
}

impl VariableState {
    pub fn new(id: VariableId) -> Self {
        VariableState {
            id,
            value: None,
            quality: Quality::Good,
            timestamp: Timestamp::ZERO,
        }
    }

    pub fn with_value(id: VariableId, value: impl Into<Value>) -> Self {
        VariableState {
            value: Some(value.into()),
            ..VariableState::new(id)
        }
    }
}

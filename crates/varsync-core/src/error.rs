//! Error types for varsync

use std::time::Duration;

use thiserror::Error;

use crate::{DataType, ProviderId, VariableId};

/// Core varsync errors
#[derive(Error, Debug)]
pub enum VarsyncError {
    // Transport errors
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("No responders on {0}")]
    NoResponders(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(ProviderId),

    #[error("Request on {subject} timed out after {after:?}")]
    Timeout { subject: String, after: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    // Credential errors
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unexpected message kind: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: u8, actual: u8 },

    // Per-entry errors
    #[error("Unknown value type tag: {0}")]
    DecodeUnknownType(u8),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },

    #[error("Unknown variable id: {0}")]
    UnknownVariableId(VariableId),

    #[error("Permission denied: variable {0} is read-only")]
    PermissionDenied(VariableId),

    #[error("Cannot parse {input:?} as {data_type}")]
    InvalidValue { data_type: DataType, input: String },

    // Lifecycle errors
    #[error("Agent not started")]
    NotStarted,

    #[error("Agent already started")]
    AlreadyStarted,

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VarsyncError {
    /// Whether the caller can carry on after this error.
    /// Transport and credential failures are fatal to `start()`.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            VarsyncError::TransportUnavailable(_)
                | VarsyncError::AuthFailure(_)
                | VarsyncError::Config(_)
        )
    }

    /// Per-entry faults never abort the rest of a batch
    pub fn is_entry_fault(&self) -> bool {
        matches!(
            self,
            VarsyncError::DecodeUnknownType(_)
                | VarsyncError::TypeMismatch { .. }
                | VarsyncError::UnknownVariableId(_)
                | VarsyncError::PermissionDenied(_)
        )
    }
}

/// Result type for varsync operations
pub type VarsyncResult<T> = Result<T, VarsyncError>;

//! Identity types for varsync
//!
//! Providers are addressed by a textual id that becomes one token of every
//! bus subject; variables are addressed by a provider-assigned 32-bit id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider identity - one subject token, unique on a bus
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A provider id must fit in exactly one subject token.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && !self
                .0
                .chars()
                .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provider({})", self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        ProviderId::new(id)
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        ProviderId(id)
    }
}

/// Variable identity - unique and stable within one provider
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VariableId(pub u32);

impl VariableId {
    #[inline]
    pub fn new(id: u32) -> Self {
        VariableId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        VariableId(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({})", self.0)
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VariableId {
    fn from(id: u32) -> Self {
        VariableId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_id_roundtrip() {
        let id = VariableId::new(0xDEAD_BEEF);
        assert_eq!(VariableId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_provider_id_validity() {
        assert!(ProviderId::new("sampleprovider").is_valid());
        assert!(ProviderId::new("plc-01_a").is_valid());
        assert!(!ProviderId::new("").is_valid());
        assert!(!ProviderId::new("a.b").is_valid());
        assert!(!ProviderId::new("a*").is_valid());
        assert!(!ProviderId::new("a>").is_valid());
        assert!(!ProviderId::new("a b").is_valid());
    }

    #[test]
    fn test_provider_id_serde_is_transparent() {
        let id = ProviderId::new("sampleprovider");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sampleprovider\"");
        let back: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

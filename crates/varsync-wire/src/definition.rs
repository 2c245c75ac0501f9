//! Provider definition sets and their fingerprint

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use varsync_core::{
    AccessType, DataType, ValidationState, VariableDefinition, VariableId, VarsyncResult,
};

use crate::{put_count, put_short_string, WireReader};

/// Smallest encoded definition: id, type, access, flag, empty key
const MIN_DEFINITION_SIZE: usize = 4 + 1 + 1 + 1 + 2;

/// Schema identity of a definition set.
///
/// SHA-256 over `id:key:data_type:access:experimental` of every definition,
/// sorted by id; the first 8 digest bytes read big-endian. The boolean is
/// rendered `True`/`False` so fingerprints agree with existing hub tooling.
pub fn fingerprint(definitions: &[VariableDefinition]) -> u64 {
    let mut sorted: Vec<&VariableDefinition> = definitions.iter().collect();
    sorted.sort_by_key(|d| d.id);

    let mut hasher = Sha256::new();
    for def in sorted {
        hasher.update(
            format!(
                "{}:{}:{}:{}:{}",
                def.id,
                def.key,
                def.data_type.as_str(),
                def.access.as_str(),
                if def.experimental { "True" } else { "False" }
            )
            .as_bytes(),
        );
    }
    let digest = hasher.finalize();
    let mut high = [0u8; 8];
    high.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(high)
}

/// The definitions of one provider plus derived fingerprint and the
/// registry's verdict
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DefinitionSet {
    pub fingerprint: u64,
    pub validation_state: ValidationState,
    pub definitions: Vec<VariableDefinition>,
}

impl DefinitionSet {
    pub fn new(definitions: Vec<VariableDefinition>) -> Self {
        DefinitionSet {
            fingerprint: fingerprint(&definitions),
            validation_state: ValidationState::Unspecified,
            definitions,
        }
    }

    pub fn with_state(mut self, state: ValidationState) -> Self {
        self.validation_state = state;
        self
    }

    pub fn get(&self, id: VariableId) -> Option<&VariableDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn by_key(&self, key: &str) -> Option<&VariableDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        buf.put_u64_le(self.fingerprint);
        buf.put_u8(self.validation_state.to_byte());
        put_count(buf, self.definitions.len())?;
        for def in &self.definitions {
            buf.put_u32_le(def.id.0);
            buf.put_u8(def.data_type.to_byte());
            buf.put_u8(def.access.to_byte());
            buf.put_u8(def.experimental as u8);
            put_short_string(buf, &def.key)?;
        }
        Ok(())
    }

    /// Definitions with an unknown type or access code are skipped;
    /// the fingerprint is kept as sent.
    pub fn decode_from(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        let fingerprint = r.u64()?;
        let validation_state =
            ValidationState::from_byte(r.u8()?).unwrap_or(ValidationState::Unspecified);
        let count = r.count(MIN_DEFINITION_SIZE)?;

        let mut definitions = Vec::with_capacity(count);
        for _ in 0..count {
            let id = VariableId(r.u32()?);
            let data_type = DataType::from_byte(r.u8()?);
            let access = AccessType::from_byte(r.u8()?);
            let experimental = r.u8()? != 0;
            let key = r.short_string()?;

            if let (Some(data_type), Some(access)) = (data_type, access) {
                definitions.push(VariableDefinition {
                    id,
                    key,
                    data_type,
                    access,
                    experimental,
                });
            }
        }

        Ok(DefinitionSet {
            fingerprint,
            validation_state,
            definitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn defs() -> Vec<VariableDefinition> {
        vec![
            VariableDefinition::new(1, "digital_nameplate.manufacturer_name", DataType::String, AccessType::ReadOnly),
            VariableDefinition::new(2, "diagnostics.error_count", DataType::Int64, AccessType::ReadWrite),
            VariableDefinition::new(3, "diagnostics.temperature", DataType::Float64, AccessType::ReadOnly),
            VariableDefinition::new(4, "diagnostics.is_running", DataType::Boolean, AccessType::ReadWrite)
                .experimental(true),
        ]
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&defs()), fingerprint(&defs()));
        assert_ne!(fingerprint(&defs()), fingerprint(&[]));
    }

    #[test]
    fn test_fingerprint_reacts_to_every_field() {
        let base = fingerprint(&defs());
        let mutations: Vec<Box<dyn Fn(&mut VariableDefinition)>> = vec![
            Box::new(|d| d.id = VariableId(99)),
            Box::new(|d| d.key.push('x')),
            Box::new(|d| d.data_type = DataType::Float64),
            Box::new(|d| d.access = AccessType::ReadOnly),
            Box::new(|d| d.experimental = !d.experimental),
        ];
        for mutate in mutations {
            let mut changed = defs();
            mutate(&mut changed[1]);
            assert_ne!(fingerprint(&changed), base);
        }
    }

    #[test]
    fn test_fingerprint_matches_known_digest_layout() {
        let single = vec![VariableDefinition::new(1, "a", DataType::Int64, AccessType::ReadOnly)];
        let digest = Sha256::digest(b"1:a:int64:read-only:False");
        let expected = u64::from_be_bytes(digest[..8].try_into().unwrap());
        assert_eq!(fingerprint(&single), expected);
    }

    #[test]
    fn test_definition_set_roundtrip() {
        let set = DefinitionSet::new(defs()).with_state(ValidationState::Ok);
        let mut buf = BytesMut::new();
        set.encode_into(&mut buf).unwrap();
        let parsed = DefinitionSet::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(parsed, set);
        assert_eq!(parsed.by_key("diagnostics.error_count").map(|d| d.id), Some(VariableId(2)));
    }

    #[test]
    fn test_unknown_definition_codes_are_skipped() {
        let set = DefinitionSet::new(defs());
        let mut buf = BytesMut::new();
        set.encode_into(&mut buf).unwrap();
        // Corrupt the data type of the first definition
        buf[8 + 1 + 4 + 4] = 0xEE;
        let parsed = DefinitionSet::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.fingerprint, set.fingerprint);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_order_independent(shuffled in Just(defs()).prop_shuffle()) {
            prop_assert_eq!(fingerprint(&shuffled), fingerprint(&defs()));
        }
    }
}

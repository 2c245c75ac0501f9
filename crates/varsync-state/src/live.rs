//! Provider live-state map

use std::collections::HashMap;

use varsync_core::{
    Quality, Timestamp, ValidationState, Value, VariableDefinition, VariableId, VariableState,
    VarsyncError, VarsyncResult,
};
use varsync_wire::{DecodedValue, DefinitionSet, EncodedValue, VariableBatch, VariableEntry, TAG_ABSENT};

/// Outcome of applying a write batch
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Entries written, in batch order
    pub applied: Vec<VariableId>,
    /// Entries left untouched and the reason
    pub faults: Vec<(VariableId, VarsyncError)>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// Faults from entries the provider refused (access, type, malformed
    /// value), as opposed to entries it could not match
    pub fn rejected(&self) -> impl Iterator<Item = &(VariableId, VarsyncError)> {
        self.faults.iter().filter(|(_, e)| {
            !matches!(
                e,
                VarsyncError::UnknownVariableId(_) | VarsyncError::DecodeUnknownType(_)
            )
        })
    }
}

/// The provider's authoritative state, one entry per definition.
/// Entries are created with the map and never removed.
#[derive(Debug, Clone)]
pub struct LiveStateMap {
    definitions: DefinitionSet,
    states: HashMap<VariableId, VariableState>,
}

impl LiveStateMap {
    pub fn new(definitions: DefinitionSet) -> Self {
        let states = definitions
            .definitions
            .iter()
            .map(|d| (d.id, VariableState::new(d.id)))
            .collect();
        LiveStateMap {
            definitions,
            states,
        }
    }

    pub fn definitions(&self) -> &DefinitionSet {
        &self.definitions
    }

    pub fn fingerprint(&self) -> u64 {
        self.definitions.fingerprint
    }

    pub fn validation_state(&self) -> ValidationState {
        self.definitions.validation_state
    }

    pub fn set_validation_state(&mut self, state: ValidationState) {
        self.definitions.validation_state = state;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: VariableId) -> Option<&VariableState> {
        self.states.get(&id)
    }

    /// All states in definition order
    pub fn states(&self) -> Vec<VariableState> {
        self.definitions
            .definitions
            .iter()
            .filter_map(|d| self.states.get(&d.id).cloned())
            .collect()
    }

    /// Set one value locally, checked against its definition
    pub fn set_value(
        &mut self,
        id: VariableId,
        value: Value,
        quality: Quality,
        timestamp: Timestamp,
    ) -> VarsyncResult<()> {
        let def = self
            .definitions
            .get(id)
            .ok_or(VarsyncError::UnknownVariableId(id))?;
        check_type(def, &value)?;
        let state = self
            .states
            .get_mut(&id)
            .ok_or(VarsyncError::UnknownVariableId(id))?;
        state.value = Some(value);
        state.quality = quality;
        state.timestamp = timestamp;
        Ok(())
    }

    /// Take over states produced by a value source. States for unknown ids
    /// or with a value of the wrong type are dropped. Returns the number taken.
    pub fn replace_states(&mut self, states: Vec<VariableState>) -> usize {
        let mut taken = 0;
        for next in states {
            let Some(def) = self.definitions.get(next.id) else {
                tracing::warn!(id = %next.id, "Value source produced unknown variable");
                continue;
            };
            if let Some(value) = &next.value {
                if let Err(e) = check_type(def, value) {
                    tracing::warn!(id = %next.id, error = %e, "Value source produced wrong type");
                    continue;
                }
            }
            self.states.insert(next.id, next);
            taken += 1;
        }
        taken
    }

    /// Build a batch of current states.
    ///
    /// `None` selects every variable, in definition order. A filter keeps
    /// definition order and silently drops ids it does not know. The batch
    /// is stamped with the timestamp of its first state.
    pub fn to_batch(&self, filter: Option<&[VariableId]>) -> VariableBatch {
        let selected: Vec<(&VariableDefinition, &VariableState)> = self
            .definitions
            .definitions
            .iter()
            .filter(|d| filter.map_or(true, |ids| ids.contains(&d.id)))
            .filter_map(|d| self.states.get(&d.id).map(|s| (d, s)))
            .collect();

        let base_timestamp = selected
            .first()
            .map(|(_, s)| s.timestamp)
            .unwrap_or(Timestamp::ZERO);

        let mut batch = VariableBatch::new(self.fingerprint(), base_timestamp);
        for (def, state) in selected {
            let value = match &state.value {
                Some(v) => EncodedValue::encode(def.data_type, v).unwrap_or_else(|e| {
                    tracing::warn!(id = %def.id, error = %e, "Cannot encode state, sending no value");
                    EncodedValue::absent()
                }),
                None => EncodedValue::absent(),
            };
            batch.push(VariableEntry::new(def.id, value, state.quality));
        }
        batch
    }

    /// Apply a write command entry by entry.
    ///
    /// An entry is skipped when its id is unknown or its value cannot be
    /// decoded, and rejected when the variable is read-only (if
    /// `enforce_access`) or the value has the wrong type. A fault never
    /// stops the remaining entries. Written states take the entry's quality
    /// and `now` as timestamp.
    pub fn apply_write(
        &mut self,
        batch: &VariableBatch,
        enforce_access: bool,
        now: Timestamp,
    ) -> WriteReport {
        let mut report = WriteReport::default();

        for entry in &batch.entries {
            match self.write_entry(entry, enforce_access, now) {
                Ok(()) => report.applied.push(entry.id),
                Err(e) => {
                    tracing::debug!(id = %entry.id, error = %e, "Write entry not applied");
                    report.faults.push((entry.id, e));
                }
            }
        }
        report
    }

    fn write_entry(
        &mut self,
        entry: &VariableEntry,
        enforce_access: bool,
        now: Timestamp,
    ) -> VarsyncResult<()> {
        let def = self
            .definitions
            .get(entry.id)
            .ok_or(VarsyncError::UnknownVariableId(entry.id))?;
        if enforce_access && !def.is_writable() {
            return Err(VarsyncError::PermissionDenied(entry.id));
        }

        let value = match entry.value.decode()? {
            DecodedValue::Known(v) => v,
            DecodedValue::Absent => return Err(VarsyncError::DecodeUnknownType(TAG_ABSENT)),
            DecodedValue::Unknown(tag) => return Err(VarsyncError::DecodeUnknownType(tag)),
        };
        check_type(def, &value)?;

        let state = self
            .states
            .get_mut(&entry.id)
            .ok_or(VarsyncError::UnknownVariableId(entry.id))?;
        state.value = Some(value);
        state.quality = entry.quality;
        state.timestamp = now;
        Ok(())
    }
}

fn check_type(def: &VariableDefinition, value: &Value) -> VarsyncResult<()> {
    if value.data_type() != def.data_type {
        return Err(VarsyncError::TypeMismatch {
            expected: def.data_type,
            actual: value.data_type(),
        });
    }
    Ok(())
}

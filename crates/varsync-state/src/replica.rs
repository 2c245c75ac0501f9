//! Consumer-side replica of a provider's states

use std::collections::BTreeMap;

use varsync_core::{VariableId, VariableState};
use varsync_wire::{DecodedValue, VariableBatch};

/// Read-only copy of a provider's variables, built from received batches.
/// Entries appear the first time their id is seen and are never removed.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    states: BTreeMap<VariableId, VariableState>,
    fingerprint: u64,
}

impl Replica {
    pub fn new() -> Self {
        Replica::default()
    }

    /// Merge a batch and return every touched state, in batch order.
    ///
    /// Each touched entry takes the batch's base timestamp and the entry's
    /// quality. Its value is replaced only when the entry decodes to a known
    /// value; an absent, unknown or malformed value leaves it as it was.
    pub fn merge(&mut self, batch: &VariableBatch) -> Vec<VariableState> {
        if batch.reference_fingerprint != 0 {
            self.fingerprint = batch.reference_fingerprint;
        }

        let mut changed = Vec::with_capacity(batch.len());
        for entry in &batch.entries {
            let state = self
                .states
                .entry(entry.id)
                .or_insert_with(|| VariableState::new(entry.id));
            state.timestamp = batch.base_timestamp;
            state.quality = entry.quality;

            match entry.value.decode() {
                Ok(DecodedValue::Known(value)) => state.value = Some(value),
                Ok(DecodedValue::Absent) => {}
                Ok(DecodedValue::Unknown(tag)) => {
                    tracing::debug!(id = %entry.id, tag, "Unknown value type, keeping previous value");
                }
                Err(e) => {
                    tracing::debug!(id = %entry.id, error = %e, "Malformed value, keeping previous value");
                }
            }
            changed.push(state.clone());
        }
        changed
    }

    pub fn get(&self, id: VariableId) -> Option<&VariableState> {
        self.states.get(&id)
    }

    /// All states ordered by id
    pub fn snapshot(&self) -> Vec<VariableState> {
        self.states.values().cloned().collect()
    }

    /// Last non-zero reference fingerprint seen
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.fingerprint = 0;
    }
}

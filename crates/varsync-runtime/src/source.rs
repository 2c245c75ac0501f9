//! Value sources - where a provider's values come from
//!
//! The provider calls [`ValueSource::advance`] once per broadcast tick and
//! takes over whatever states it returns.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use varsync_core::{DataType, Timestamp, Value, VariableDefinition, VariableId, VariableState};

/// Texts a simulated status variable cycles through
pub const STATUS_TEXTS: [&str; 3] = ["ready", "running", "idle"];

/// Value of variables whose key ends in `static_message`
pub const STATIC_MESSAGE: &str = "Hello from varsync";

/// Step function producing a provider's next states
pub trait ValueSource: Send {
    /// States before the first tick
    fn initial_states(&mut self, definitions: &[VariableDefinition]) -> Vec<VariableState>;

    /// States after one tick, given the current ones
    fn advance(
        &mut self,
        definitions: &[VariableDefinition],
        previous: &[VariableState],
    ) -> Vec<VariableState>;
}

fn is_static(def: &VariableDefinition) -> bool {
    def.key.ends_with("static_message")
}

fn previous_of(previous: &[VariableState], id: VariableId) -> Option<&VariableState> {
    previous.iter().find(|s| s.id == id)
}

/// Demo data generator
///
/// Per tick: integers count up, floats follow `20 + 5·sin(tick/5)` rounded
/// to three decimals, strings pick a random status text, booleans toggle.
pub struct Simulation {
    tick: u64,
    rng: StdRng,
}

impl Simulation {
    pub fn new() -> Self {
        Simulation {
            tick: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible string choices
    pub fn with_seed(seed: u64) -> Self {
        Simulation {
            tick: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    fn next_value(&mut self, def: &VariableDefinition, previous: Option<&Value>) -> Value {
        match def.data_type {
            DataType::Int64 => match previous {
                Some(Value::Int64(v)) => Value::Int64(v.wrapping_add(1)),
                _ => Value::Int64(1),
            },
            DataType::Float64 => {
                let raw = 20.0 + (self.tick as f64 / 5.0).sin() * 5.0;
                Value::Float64((raw * 1000.0).round() / 1000.0)
            }
            DataType::String if is_static(def) => Value::from(STATIC_MESSAGE),
            DataType::String => {
                let text = STATUS_TEXTS.choose(&mut self.rng).copied().unwrap_or("ready");
                Value::from(text)
            }
            DataType::Boolean => match previous {
                Some(Value::Boolean(v)) => Value::Boolean(!v),
                _ => Value::Boolean(true),
            },
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation::new()
    }
}

impl ValueSource for Simulation {
    fn initial_states(&mut self, definitions: &[VariableDefinition]) -> Vec<VariableState> {
        let now = Timestamp::now();
        definitions
            .iter()
            .map(|def| {
                let value = match def.data_type {
                    DataType::String if is_static(def) => Value::from(STATIC_MESSAGE),
                    DataType::String => Value::from(STATUS_TEXTS[0]),
                    other => Value::default_for(other),
                };
                VariableState {
                    timestamp: now,
                    ..VariableState::with_value(def.id, value)
                }
            })
            .collect()
    }

    fn advance(
        &mut self,
        definitions: &[VariableDefinition],
        previous: &[VariableState],
    ) -> Vec<VariableState> {
        self.tick += 1;
        let now = Timestamp::now();
        definitions
            .iter()
            .map(|def| {
                let prev = previous_of(previous, def.id);
                let value = self.next_value(def, prev.and_then(|s| s.value.as_ref()));
                VariableState {
                    id: def.id,
                    value: Some(value),
                    quality: prev.map(|s| s.quality).unwrap_or_default(),
                    timestamp: now,
                }
            })
            .collect()
    }
}

/// Keeps values as they are and only refreshes timestamps.
/// Writes applied to the provider therefore stick.
#[derive(Debug, Clone, Default)]
pub struct FixedValues {
    initial: HashMap<VariableId, Value>,
}

impl FixedValues {
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (u32, V)>,
        V: Into<Value>,
    {
        FixedValues {
            initial: values
                .into_iter()
                .map(|(id, v)| (VariableId(id), v.into()))
                .collect(),
        }
    }
}

impl ValueSource for FixedValues {
    fn initial_states(&mut self, definitions: &[VariableDefinition]) -> Vec<VariableState> {
        let now = Timestamp::now();
        definitions
            .iter()
            .map(|def| VariableState {
                id: def.id,
                value: self.initial.get(&def.id).cloned(),
                quality: Default::default(),
                timestamp: now,
            })
            .collect()
    }

    fn advance(
        &mut self,
        _definitions: &[VariableDefinition],
        previous: &[VariableState],
    ) -> Vec<VariableState> {
        let now = Timestamp::now();
        previous
            .iter()
            .map(|s| VariableState {
                timestamp: now,
                ..s.clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_variables;
    use varsync_core::AccessType;

    #[test]
    fn test_simulation_initial_values() {
        let mut defs = default_variables();
        defs.push(VariableDefinition::new(
            9,
            "diagnostics.static_message",
            DataType::String,
            AccessType::ReadOnly,
        ));
        let states = Simulation::with_seed(1).initial_states(&defs);
        assert_eq!(states.len(), 9);
        assert_eq!(states[2].value, Some(Value::Int64(0)));
        assert_eq!(states[4].value, Some(Value::from("ready")));
        assert_eq!(states[6].value, Some(Value::Float64(0.0)));
        assert_eq!(states[7].value, Some(Value::Boolean(false)));
        assert_eq!(states[8].value, Some(Value::from(STATIC_MESSAGE)));
        assert!(states.iter().all(|s| !s.timestamp.is_zero()));
    }

    #[test]
    fn test_simulation_advance() {
        let defs = default_variables();
        let mut sim = Simulation::with_seed(7);
        let initial = sim.initial_states(&defs);
        let first = sim.advance(&defs, &initial);
        let second = sim.advance(&defs, &first);

        assert_eq!(sim.tick(), 2);
        // error_count counts up, is_running toggles
        assert_eq!(first[5].value, Some(Value::Int64(1)));
        assert_eq!(second[5].value, Some(Value::Int64(2)));
        assert_eq!(first[7].value, Some(Value::Boolean(true)));
        assert_eq!(second[7].value, Some(Value::Boolean(false)));

        let expected = ((20.0 + (2.0f64 / 5.0).sin() * 5.0) * 1000.0).round() / 1000.0;
        assert_eq!(second[6].value, Some(Value::Float64(expected)));

        for state in &second {
            if let Some(Value::String(text)) = &state.value {
                assert!(STATUS_TEXTS.contains(&text.as_str()));
            }
        }
    }

    #[test]
    fn test_simulation_continues_from_written_value() {
        let defs = default_variables();
        let mut sim = Simulation::with_seed(3);
        let mut states = sim.initial_states(&defs);
        states[5].value = Some(Value::Int64(42));
        let next = sim.advance(&defs, &states);
        assert_eq!(next[5].value, Some(Value::Int64(43)));
    }

    #[test]
    fn test_fixed_values_keep_values() {
        let defs = default_variables();
        let mut source = FixedValues::new([(5, Value::from("ready")), (6, Value::Int64(5))]);
        let initial = source.initial_states(&defs);
        assert_eq!(initial[4].value, Some(Value::from("ready")));
        assert_eq!(initial[0].value, None);

        let next = source.advance(&defs, &initial);
        assert_eq!(
            next.iter().map(|s| s.value.clone()).collect::<Vec<_>>(),
            initial.iter().map(|s| s.value.clone()).collect::<Vec<_>>()
        );
        assert!(next[0].timestamp >= initial[0].timestamp);
    }
}

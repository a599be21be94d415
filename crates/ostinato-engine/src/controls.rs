//! Named control values published from the control plane
//!
//! FETCH_CONTROL_VALUE resolves names against this table. The control
//! thread edits through a [`StateWriter`]; the audio thread reads the
//! current copy at block time through the paired reader.

use std::collections::HashMap;

use crate::double_buffered::ManagedState;

/// Snapshot of all named control values
#[derive(Debug, Clone, Default)]
pub struct ControlValueState {
    values: HashMap<String, f32>,
}

impl ControlValueState {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}

/// One edit to the control value table
#[derive(Debug, Clone)]
pub enum ControlValueMutation {
    Set { name: String, value: f32 },
    Remove { name: String },
}

impl ManagedState for ControlValueState {
    type Mutation = ControlValueMutation;

    fn apply(&mut self, mutation: &ControlValueMutation) {
        match mutation {
            ControlValueMutation::Set { name, value } => {
                self.values.insert(name.clone(), *value);
            }
            ControlValueMutation::Remove { name } => {
                self.values.remove(name);
            }
        }
    }
}

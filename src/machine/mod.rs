//! Review-gated state machine: string-identified states and an explicit
//! `(current_state, trigger) -> transition` lookup table.
//!
//! The graph is immutable once built; the live position (current state,
//! context) lives on the workflow tool that drives it. Every trigger is
//! checked against the table before anything is invoked, so an invalid
//! trigger is a typed result with zero side effects.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod builder;

pub use builder::{BuildError, StateMachineBuilder};

pub const TRIGGER_AI_APPROVE: &str = "ai_approve";
pub const TRIGGER_HUMAN_APPROVE: &str = "human_approve";
pub const TRIGGER_REQUEST_REVISION: &str = "request_revision";
pub const TRIGGER_DISPATCH: &str = "dispatch";

/// Trigger that submits work produced in `work_state` for AI review.
pub fn submit_trigger(work_state: &str) -> String {
    format!("submit_{work_state}")
}

/// Name of the AI-review sub-state guarding `work_state`.
pub fn ai_review_state(work_state: &str) -> String {
    format!("{work_state}_awaiting_ai_review")
}

/// Name of the human-review sub-state guarding `work_state`.
pub fn human_review_state(work_state: &str) -> String {
    format!("{work_state}_awaiting_human_review")
}

/// A single edge of the graph. `condition`, when present, names a boolean
/// key in the tool's context store that must be true for the trigger to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub trigger: String,
    pub source: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum MachineError {
    #[error("state '{state}' is not part of this machine")]
    UnknownState { state: String },

    #[error("trigger '{trigger}' is not valid in state '{state}'")]
    InvalidTrigger { state: String, trigger: String },

    #[error("trigger '{trigger}' in state '{state}' requires context flag '{condition}'")]
    ConditionNotMet {
        state: String,
        trigger: String,
        condition: String,
    },
}

/// Immutable transition graph produced by [`StateMachineBuilder`].
#[derive(Debug, Clone)]
pub struct StateMachine {
    states: Vec<String>,
    initial_state: String,
    terminal_state: String,
    transitions: Vec<Transition>,
    // (source, trigger) -> index into `transitions`
    table: HashMap<(String, String), usize>,
}

impl StateMachine {
    pub(crate) fn from_parts(
        states: Vec<String>,
        initial_state: String,
        terminal_state: String,
        transitions: Vec<Transition>,
    ) -> Self {
        let table = transitions
            .iter()
            .enumerate()
            .map(|(idx, t)| ((t.source.clone(), t.trigger.clone()), idx))
            .collect();
        Self {
            states,
            initial_state,
            terminal_state,
            transitions,
            table,
        }
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn terminal_state(&self) -> &str {
        &self.terminal_state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn contains_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        state == self.terminal_state
    }

    /// Look up the transition for `(state, trigger)` without firing it.
    pub fn lookup(&self, state: &str, trigger: &str) -> Result<&Transition, MachineError> {
        if !self.contains_state(state) {
            return Err(MachineError::UnknownState {
                state: state.to_string(),
            });
        }
        self.table
            .get(&(state.to_string(), trigger.to_string()))
            .map(|&idx| &self.transitions[idx])
            .ok_or_else(|| MachineError::InvalidTrigger {
                state: state.to_string(),
                trigger: trigger.to_string(),
            })
    }

    /// Resolve a trigger against the table, checking any transition condition
    /// against the supplied context. Returns the matched transition; the
    /// caller applies the destination. Nothing is mutated on error.
    pub fn fire(
        &self,
        current_state: &str,
        trigger: &str,
        context: &HashMap<String, Value>,
    ) -> Result<&Transition, MachineError> {
        let transition = self.lookup(current_state, trigger)?;
        if let Some(condition) = &transition.condition {
            let satisfied = context
                .get(condition)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !satisfied {
                return Err(MachineError::ConditionNotMet {
                    state: current_state.to_string(),
                    trigger: trigger.to_string(),
                    condition: condition.clone(),
                });
            }
        }
        Ok(transition)
    }

    /// Triggers that can fire from `state`, in declaration order.
    pub fn triggers_from(&self, state: &str) -> Vec<&str> {
        self.transitions
            .iter()
            .filter(|t| t.source == state)
            .map(|t| t.trigger.as_str())
            .collect()
    }
}

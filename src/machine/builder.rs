//! Builder that synthesizes the full review-gated transition graph from a
//! declarative list of work states.
//!
//! For each work state `S` the builder generates `S`, `S_awaiting_ai_review`
//! and `S_awaiting_human_review`, wired with the uniform gate:
//!
//! ```text
//! submit_S:         S -> S_awaiting_ai_review
//! ai_approve:       S_awaiting_ai_review -> S_awaiting_human_review
//! request_revision: S_awaiting_ai_review -> S
//! human_approve:    S_awaiting_human_review -> next work state (or terminal)
//! request_revision: S_awaiting_human_review -> S
//! request_revision: S -> S            (abandon-and-retry mid-work)
//! ```
//!
//! Predicates deciding which optional states to include belong to the caller
//! and are evaluated once, before `build()`; the finished graph never
//! re-evaluates them.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use super::{
    ai_review_state, human_review_state, submit_trigger, StateMachine, Transition,
    TRIGGER_AI_APPROVE, TRIGGER_DISPATCH, TRIGGER_HUMAN_APPROVE, TRIGGER_REQUEST_REVISION,
};

#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("no work states supplied")]
    EmptyWorkStates,

    #[error("duplicate state name '{name}'")]
    DuplicateState { name: String },

    #[error("resume state '{state}' is not in the graph")]
    UnknownResumeState { state: String },

    #[error("revision override names unknown work state '{work_state}'")]
    UnknownWorkState { work_state: String },

    #[error("revision target '{target}' for work state '{work_state}' is not in the graph")]
    UnknownRevisionTarget { work_state: String, target: String },

    #[error("guard for trigger '{trigger}' names unknown source state '{state}'")]
    UnknownGuardedTransition { state: String, trigger: String },

    #[error("transition '{trigger}' references undeclared state '{state}'")]
    DanglingTransition { trigger: String, state: String },
}

/// Builder for the review-gated graph. Two modes:
/// [`multi_step`](StateMachineBuilder::multi_step) chains N gated work states,
/// [`simple`](StateMachineBuilder::simple) prepends a dispatch state to a
/// single gated work state.
#[derive(Debug, Clone)]
pub struct StateMachineBuilder {
    work_states: Vec<String>,
    terminal_state: String,
    dispatch_state: Option<String>,
    resume_state: Option<String>,
    // (work_state, override destination for request_revision from its gates)
    revision_targets: Vec<(String, String)>,
    // (source state, trigger, required context flag)
    guards: Vec<(String, String, String)>,
}

impl StateMachineBuilder {
    /// Multi-step mode: chains the given work states, each behind the uniform
    /// review gate, ending in `terminal`.
    pub fn multi_step<I, S>(work_states: I, terminal: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            work_states: work_states.into_iter().map(Into::into).collect(),
            terminal_state: terminal.into(),
            dispatch_state: None,
            resume_state: None,
            revision_targets: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Simple dispatch-work-done mode: `dispatch` leads into one gated work
    /// state which leads to `terminal`.
    pub fn simple(
        dispatch: impl Into<String>,
        work_state: impl Into<String>,
        terminal: impl Into<String>,
    ) -> Self {
        Self {
            work_states: vec![work_state.into()],
            terminal_state: terminal.into(),
            dispatch_state: Some(dispatch.into()),
            resume_state: None,
            revision_targets: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Start the machine somewhere other than the first work state, e.g. when
    /// re-entering an interrupted workflow at a later phase.
    pub fn resume_from(mut self, state: impl Into<String>) -> Self {
        self.resume_state = Some(state.into());
        self
    }

    /// Override where `request_revision` lands for the review gates of
    /// `work_state`. The default sends a rejected review back into
    /// `work_state` itself; an explicit target always wins (used for
    /// conditional re-planning). The mid-work self-loop is unaffected.
    pub fn revision_target(
        mut self,
        work_state: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.revision_targets
            .push((work_state.into(), target.into()));
        self
    }

    /// Require a boolean context flag before `trigger` may fire from `state`.
    pub fn guard_trigger(
        mut self,
        state: impl Into<String>,
        trigger: impl Into<String>,
        context_flag: impl Into<String>,
    ) -> Self {
        self.guards
            .push((state.into(), trigger.into(), context_flag.into()));
        self
    }

    pub fn build(self) -> Result<StateMachine, BuildError> {
        if self.work_states.is_empty() {
            return Err(BuildError::EmptyWorkStates);
        }

        // Declare every state up front so transitions can be checked against
        // the complete set.
        let mut states: Vec<String> = Vec::new();
        if let Some(dispatch) = &self.dispatch_state {
            states.push(dispatch.clone());
        }
        for work_state in &self.work_states {
            states.push(work_state.clone());
            states.push(ai_review_state(work_state));
            states.push(human_review_state(work_state));
        }
        states.push(self.terminal_state.clone());

        let mut seen = HashSet::new();
        for name in &states {
            if !seen.insert(name.clone()) {
                return Err(BuildError::DuplicateState { name: name.clone() });
            }
        }

        for (work_state, target) in &self.revision_targets {
            if !self.work_states.contains(work_state) {
                return Err(BuildError::UnknownWorkState {
                    work_state: work_state.clone(),
                });
            }
            if !seen.contains(target) {
                return Err(BuildError::UnknownRevisionTarget {
                    work_state: work_state.clone(),
                    target: target.clone(),
                });
            }
        }

        let revision_dest = |work_state: &str| -> String {
            self.revision_targets
                .iter()
                .rev()
                .find(|(ws, _)| ws == work_state)
                .map(|(_, target)| target.clone())
                .unwrap_or_else(|| work_state.to_string())
        };

        let mut transitions: Vec<Transition> = Vec::new();
        let mut push = |trigger: String, source: String, dest: String| {
            transitions.push(Transition {
                trigger,
                source,
                dest,
                condition: None,
            });
        };

        if let Some(dispatch) = &self.dispatch_state {
            push(
                TRIGGER_DISPATCH.to_string(),
                dispatch.clone(),
                self.work_states[0].clone(),
            );
        }

        for (idx, work_state) in self.work_states.iter().enumerate() {
            let ai_review = ai_review_state(work_state);
            let human_review = human_review_state(work_state);
            let approved_dest = self
                .work_states
                .get(idx + 1)
                .cloned()
                .unwrap_or_else(|| self.terminal_state.clone());
            let revise_dest = revision_dest(work_state);

            push(
                submit_trigger(work_state),
                work_state.clone(),
                ai_review.clone(),
            );
            push(
                TRIGGER_AI_APPROVE.to_string(),
                ai_review.clone(),
                human_review.clone(),
            );
            push(
                TRIGGER_REQUEST_REVISION.to_string(),
                ai_review,
                revise_dest.clone(),
            );
            push(
                TRIGGER_HUMAN_APPROVE.to_string(),
                human_review.clone(),
                approved_dest,
            );
            push(TRIGGER_REQUEST_REVISION.to_string(), human_review, revise_dest);
            // Abandon-and-retry stays within the work state.
            push(
                TRIGGER_REQUEST_REVISION.to_string(),
                work_state.clone(),
                work_state.clone(),
            );
        }

        for (state, trigger, flag) in &self.guards {
            let guarded = transitions
                .iter_mut()
                .find(|t| &t.source == state && &t.trigger == trigger)
                .ok_or_else(|| BuildError::UnknownGuardedTransition {
                    state: state.clone(),
                    trigger: trigger.clone(),
                })?;
            guarded.condition = Some(flag.clone());
        }

        // No dangling transitions: every named endpoint must be a declared
        // state. The generators above only emit declared names, but overrides
        // flow through here too, so check the finished edge list.
        for transition in &transitions {
            for endpoint in [&transition.source, &transition.dest] {
                if !seen.contains(endpoint) {
                    return Err(BuildError::DanglingTransition {
                        trigger: transition.trigger.clone(),
                        state: endpoint.clone(),
                    });
                }
            }
        }

        let initial_state = match &self.resume_state {
            Some(resume) => {
                if !seen.contains(resume) {
                    return Err(BuildError::UnknownResumeState {
                        state: resume.clone(),
                    });
                }
                resume.clone()
            }
            None => match &self.dispatch_state {
                Some(dispatch) => dispatch.clone(),
                None => self.work_states[0].clone(),
            },
        };

        debug!(
            states = states.len(),
            transitions = transitions.len(),
            initial = %initial_state,
            terminal = %self.terminal_state,
            "Built review-gated state machine"
        );

        Ok(StateMachine::from_parts(
            states,
            initial_state,
            self.terminal_state,
            transitions,
        ))
    }
}

//! Workflow tool abstraction and the concrete review-gated tool.
//!
//! A tool owns the live position of one workflow: its current state and its
//! context store. Snapshots go to the task state store; `restore` overwrites
//! the live position verbatim from a persisted snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::machine::{MachineError, StateMachine};
use crate::store::ToolState;

/// A workflow instance driving one task through a built state machine.
pub trait WorkflowTool: Send + std::fmt::Debug {
    fn task_id(&self) -> &str;
    fn tool_name(&self) -> &str;
    fn persona_name(&self) -> &str;
    fn current_state(&self) -> &str;
    fn context(&self) -> &HashMap<String, Value>;
    fn context_mut(&mut self) -> &mut HashMap<String, Value>;
    fn machine(&self) -> &StateMachine;

    /// Fire a trigger against the machine's lookup table. On success the
    /// tool's current state moves to the transition destination; on error
    /// nothing changes.
    fn fire(&mut self, trigger: &str) -> Result<String, MachineError>;

    /// Snapshot the live position for persistence.
    fn snapshot(&self) -> ToolState;

    /// Overwrite the live position with persisted values verbatim. After
    /// this the tool must be indistinguishable from one that never stopped.
    fn restore(&mut self, persisted: &ToolState);

    fn is_complete(&self) -> bool {
        self.machine().is_terminal(self.current_state())
    }
}

/// Generic review-gated tool: a built [`StateMachine`] plus live position.
/// Concrete tools (plan, implement, ...) differ only in their machine shape,
/// persona, and context seeding.
#[derive(Debug, Clone)]
pub struct GatedWorkflowTool {
    task_id: String,
    tool_name: String,
    persona_name: String,
    machine: StateMachine,
    current_state: String,
    context: HashMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl GatedWorkflowTool {
    /// Fresh instance starting at the machine's initial state with default
    /// (empty) context.
    pub fn new(
        task_id: impl Into<String>,
        tool_name: impl Into<String>,
        persona_name: impl Into<String>,
        machine: StateMachine,
    ) -> Self {
        let current_state = machine.initial_state().to_string();
        Self {
            task_id: task_id.into(),
            tool_name: tool_name.into(),
            persona_name: persona_name.into(),
            machine,
            current_state,
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

impl WorkflowTool for GatedWorkflowTool {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn tool_name(&self) -> &str {
        &self.tool_name
    }

    fn persona_name(&self) -> &str {
        &self.persona_name
    }

    fn current_state(&self) -> &str {
        &self.current_state
    }

    fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    fn context_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.context
    }

    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn fire(&mut self, trigger: &str) -> Result<String, MachineError> {
        let transition = self
            .machine
            .fire(&self.current_state, trigger, &self.context)?;
        let dest = transition.dest.clone();
        info!(
            task_id = %self.task_id,
            tool_name = %self.tool_name,
            trigger = %trigger,
            from = %self.current_state,
            to = %dest,
            "Workflow trigger fired"
        );
        self.current_state = dest.clone();
        Ok(dest)
    }

    fn snapshot(&self) -> ToolState {
        ToolState {
            task_id: self.task_id.clone(),
            tool_name: self.tool_name.clone(),
            current_state: self.current_state.clone(),
            context_store: self.context.clone(),
            persona_name: self.persona_name.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    fn restore(&mut self, persisted: &ToolState) {
        self.current_state = persisted.current_state.clone();
        self.context = persisted.context_store.clone();
        self.persona_name = persisted.persona_name.clone();
        self.created_at = persisted.created_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateMachineBuilder;

    fn plan_tool() -> GatedWorkflowTool {
        let machine = StateMachineBuilder::multi_step(["Plan", "Implement"], "Done")
            .build()
            .unwrap();
        GatedWorkflowTool::new("T-1", "plan", "architect", machine)
    }

    #[test]
    fn fresh_tool_starts_at_initial_state() {
        let tool = plan_tool();
        assert_eq!(tool.current_state(), "Plan");
        assert!(!tool.is_complete());
    }

    #[test]
    fn fire_moves_current_state() {
        let mut tool = plan_tool();
        let state = tool.fire("submit_Plan").unwrap();
        assert_eq!(state, "Plan_awaiting_ai_review");
        assert_eq!(tool.current_state(), "Plan_awaiting_ai_review");
    }

    #[test]
    fn invalid_trigger_leaves_tool_untouched() {
        let mut tool = plan_tool();
        let err = tool.fire("human_approve").unwrap_err();
        assert!(matches!(err, MachineError::InvalidTrigger { .. }));
        assert_eq!(tool.current_state(), "Plan");
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut tool = plan_tool();
        tool.fire("submit_Plan").unwrap();
        tool.context_mut()
            .insert("draft".to_string(), serde_json::json!("v1"));
        let snapshot = tool.snapshot();

        let mut fresh = plan_tool();
        fresh.restore(&snapshot);
        assert_eq!(fresh.current_state(), tool.current_state());
        assert_eq!(fresh.context(), tool.context());
    }

    #[test]
    fn completes_at_terminal_state() {
        let machine = StateMachineBuilder::multi_step(["Plan"], "Done")
            .build()
            .unwrap();
        let mut tool = GatedWorkflowTool::new("T-1", "plan", "architect", machine);
        tool.fire("submit_Plan").unwrap();
        tool.fire("ai_approve").unwrap();
        tool.fire("human_approve").unwrap();
        assert_eq!(tool.current_state(), "Done");
        assert!(tool.is_complete());
    }
}

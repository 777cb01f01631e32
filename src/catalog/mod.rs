//! Workflow phase catalog: the declarative table mapping each task status to
//! the tool that owns it, the status that follows, and whether it is terminal.
//!
//! Lookups against an unknown status are configuration errors and surface as
//! `CatalogError` immediately; nothing here defaults silently.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task lifecycle status. Transitions between statuses are only valid per the
/// explicit allow-list in [`TaskStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Planning,
    ReadyForDevelopment,
    InDevelopment,
    ReadyForReview,
    InReview,
    ReadyForTesting,
    InTesting,
    ReadyForFinalization,
    InFinalization,
    Done,
}

impl TaskStatus {
    /// Explicit transition allow-list. Validity is never inferred from enum
    /// ordering or naming.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (New, Planning)
                | (New, ReadyForDevelopment)
                | (Planning, ReadyForDevelopment)
                | (ReadyForDevelopment, InDevelopment)
                | (InDevelopment, ReadyForReview)
                | (ReadyForReview, InReview)
                | (InReview, ReadyForTesting)
                | (InReview, InDevelopment)
                | (ReadyForTesting, InTesting)
                | (InTesting, ReadyForFinalization)
                | (InTesting, InDevelopment)
                | (ReadyForFinalization, InFinalization)
                | (InFinalization, Done)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Planning => "planning",
            TaskStatus::ReadyForDevelopment => "ready_for_development",
            TaskStatus::InDevelopment => "in_development",
            TaskStatus::ReadyForReview => "ready_for_review",
            TaskStatus::InReview => "in_review",
            TaskStatus::ReadyForTesting => "ready_for_testing",
            TaskStatus::InTesting => "in_testing",
            TaskStatus::ReadyForFinalization => "ready_for_finalization",
            TaskStatus::InFinalization => "in_finalization",
            TaskStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("no workflow phase registered for status '{status}'")]
    UnknownStatus { status: TaskStatus },

    #[error("no workflow phase for status '{status}' owned by tool '{tool}'")]
    NoPhaseForTool { status: TaskStatus, tool: String },

    #[error("non-terminal phase for status '{status}' has no next_status")]
    MissingNextStatus { status: TaskStatus },
}

/// One row of the catalog: which tool owns a status and where it leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPhase {
    pub status: TaskStatus,
    pub owning_tool: String,
    pub next_status: Option<TaskStatus>,
    pub produces_artifact: bool,
    pub terminal: bool,
}

impl WorkflowPhase {
    fn new(
        status: TaskStatus,
        owning_tool: &str,
        next_status: Option<TaskStatus>,
        produces_artifact: bool,
        terminal: bool,
    ) -> Self {
        Self {
            status,
            owning_tool: owning_tool.to_string(),
            next_status,
            produces_artifact,
            terminal,
        }
    }
}

/// Static, declarative phase table. Built once at startup and read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct PhaseCatalog {
    phases: Vec<WorkflowPhase>,
}

impl PhaseCatalog {
    /// Build a catalog from an explicit phase list, enforcing that every
    /// non-terminal phase names a next status.
    pub fn new(phases: Vec<WorkflowPhase>) -> Result<Self, CatalogError> {
        for phase in &phases {
            if !phase.terminal && phase.next_status.is_none() {
                return Err(CatalogError::MissingNextStatus {
                    status: phase.status,
                });
            }
        }
        Ok(Self { phases })
    }

    /// The standard plan → implement → review → test → finalize catalog.
    pub fn standard() -> Self {
        use TaskStatus::*;
        let phases = vec![
            WorkflowPhase::new(New, "plan", Some(ReadyForDevelopment), true, false),
            WorkflowPhase::new(Planning, "plan", Some(ReadyForDevelopment), true, false),
            WorkflowPhase::new(ReadyForDevelopment, "implement", Some(ReadyForReview), true, false),
            WorkflowPhase::new(InDevelopment, "implement", Some(ReadyForReview), true, false),
            WorkflowPhase::new(ReadyForReview, "review", Some(ReadyForTesting), true, false),
            WorkflowPhase::new(InReview, "review", Some(ReadyForTesting), true, false),
            WorkflowPhase::new(ReadyForTesting, "test", Some(ReadyForFinalization), true, false),
            WorkflowPhase::new(InTesting, "test", Some(ReadyForFinalization), true, false),
            WorkflowPhase::new(ReadyForFinalization, "finalize", Some(Done), true, false),
            WorkflowPhase::new(InFinalization, "finalize", Some(Done), true, false),
            WorkflowPhase::new(Done, "finalize", None, false, true),
        ];
        // The standard table satisfies the constructor invariant.
        Self { phases }
    }

    pub fn phases(&self) -> &[WorkflowPhase] {
        &self.phases
    }

    /// Look up the phase for a status, optionally narrowed to a specific
    /// owning tool.
    pub fn get_phase(
        &self,
        status: TaskStatus,
        tool: Option<&str>,
    ) -> Result<&WorkflowPhase, CatalogError> {
        match tool {
            None => self
                .phases
                .iter()
                .find(|p| p.status == status)
                .ok_or(CatalogError::UnknownStatus { status }),
            Some(tool_name) => {
                // Distinguish "status not in catalog at all" from "status not
                // owned by this tool" so misconfiguration is diagnosable.
                if !self.phases.iter().any(|p| p.status == status) {
                    return Err(CatalogError::UnknownStatus { status });
                }
                self.phases
                    .iter()
                    .find(|p| p.status == status && p.owning_tool == tool_name)
                    .ok_or_else(|| CatalogError::NoPhaseForTool {
                        status,
                        tool: tool_name.to_string(),
                    })
            }
        }
    }

    /// The phase that follows a status, or `None` when the status is terminal.
    pub fn get_next_phase(
        &self,
        status: TaskStatus,
    ) -> Result<Option<&WorkflowPhase>, CatalogError> {
        let phase = self.get_phase(status, None)?;
        match phase.next_status {
            None => Ok(None),
            Some(next) => self.get_phase(next, None).map(Some),
        }
    }

    pub fn get_tool_for_status(&self, status: TaskStatus) -> Result<&str, CatalogError> {
        self.get_phase(status, None)
            .map(|p| p.owning_tool.as_str())
    }

    pub fn is_terminal(&self, status: TaskStatus) -> Result<bool, CatalogError> {
        self.get_phase(status, None).map(|p| p.terminal)
    }

    /// Transition validity per the status allow-list. A `false` here means the
    /// caller must not mutate; it is never auto-corrected.
    pub fn validate_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        from.can_transition_to(to)
    }
}

impl Default for PhaseCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

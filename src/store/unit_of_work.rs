//! Unit of work: stages mutations (possibly across tasks) and commits them
//! as one atomic lock-and-write per affected task.
//!
//! Commits across multiple tasks are each independently atomic but not
//! jointly atomic: a failure partway through leaves earlier tasks committed.
//! [`CommitError`] names exactly which tasks went through so callers can see
//! where a multi-task commit stopped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::TaskStatus;

use super::{StoreError, TaskState, TaskStore, ToolState};

#[derive(Debug, Error)]
#[error(
    "commit failed on task '{failed_task}' ({n} task(s) already committed): {source}",
    n = .committed.len()
)]
pub struct CommitError {
    /// Tasks whose single atomic write already succeeded, in commit order.
    pub committed: Vec<String>,
    /// The task whose write failed; it and all later staged tasks are
    /// untouched on disk.
    pub failed_task: String,
    #[source]
    pub source: StoreError,
}

/// One staged mutation, re-applied against freshly loaded state at commit
/// time so status validation holds at the moment of the write.
#[derive(Debug, Clone)]
enum StagedMutation {
    SetStatus(TaskStatus),
    SetToolState(ToolState),
    ClearToolState,
    AddOutput { tool_name: String, artifact: Value },
}

fn apply_mutation(state: &mut TaskState, mutation: &StagedMutation) -> Result<(), StoreError> {
    match mutation {
        StagedMutation::SetStatus(status) => {
            if !state.task_status.can_transition_to(*status) {
                return Err(StoreError::InvalidStatusTransition {
                    task_id: state.task_id.clone(),
                    from: state.task_status,
                    to: *status,
                });
            }
            state.task_status = *status;
        }
        StagedMutation::SetToolState(tool_state) => {
            state.active_tool_state = Some(tool_state.clone());
        }
        StagedMutation::ClearToolState => {
            state.active_tool_state = None;
        }
        StagedMutation::AddOutput { tool_name, artifact } => {
            state
                .completed_tool_outputs
                .insert(tool_name.clone(), artifact.clone());
        }
    }
    Ok(())
}

#[derive(Debug)]
struct TaskDelta {
    /// Staged view: the loaded state with staged mutations applied, used to
    /// validate further staging and serve reads.
    working: TaskState,
    mutations: Vec<StagedMutation>,
}

/// Batches staged mutations into one atomic commit per task, avoiding a
/// lock round-trip per mutation.
#[derive(Debug)]
pub struct UnitOfWork<'a> {
    store: &'a TaskStore,
    deltas: HashMap<String, TaskDelta>,
    touch_order: Vec<String>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a TaskStore) -> Self {
        Self {
            store,
            deltas: HashMap::new(),
            touch_order: Vec::new(),
        }
    }

    /// First touch per task lazily loads it from the store.
    fn delta_mut(&mut self, task_id: &str) -> Result<&mut TaskDelta, StoreError> {
        match self.deltas.entry(task_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let working = self.store.load_or_create(task_id)?;
                self.touch_order.push(task_id.to_string());
                Ok(entry.insert(TaskDelta {
                    working,
                    mutations: Vec::new(),
                }))
            }
        }
    }

    fn stage(&mut self, task_id: &str, mutation: StagedMutation) -> Result<(), StoreError> {
        let delta = self.delta_mut(task_id)?;
        // Validate against the staged view so chained staged transitions
        // (e.g. new -> planning -> ready_for_development) line up.
        apply_mutation(&mut delta.working, &mutation)?;
        delta.mutations.push(mutation);
        Ok(())
    }

    /// The staged view of a task: loaded state plus staged mutations.
    pub fn get(&mut self, task_id: &str) -> Result<&TaskState, StoreError> {
        Ok(&self.delta_mut(task_id)?.working)
    }

    pub fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        self.stage(task_id, StagedMutation::SetStatus(status))
    }

    pub fn update_tool_state(
        &mut self,
        task_id: &str,
        tool_state: ToolState,
    ) -> Result<(), StoreError> {
        self.stage(task_id, StagedMutation::SetToolState(tool_state))
    }

    pub fn clear_tool_state(&mut self, task_id: &str) -> Result<(), StoreError> {
        self.stage(task_id, StagedMutation::ClearToolState)
    }

    pub fn add_completed_output(
        &mut self,
        task_id: &str,
        tool_name: &str,
        artifact: Value,
    ) -> Result<(), StoreError> {
        self.stage(
            task_id,
            StagedMutation::AddOutput {
                tool_name: tool_name.to_string(),
                artifact,
            },
        )
    }

    /// Task ids touched so far, in first-touch order.
    pub fn staged_tasks(&self) -> Vec<&str> {
        self.touch_order.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(|d| d.mutations.is_empty())
    }

    /// Commit every staged delta: per task, acquire the lock, re-load, apply
    /// the accumulated mutations in staging order, and write once atomically.
    /// Returns the committed states in commit order.
    pub fn commit(mut self) -> Result<Vec<TaskState>, CommitError> {
        let mut committed_ids: Vec<String> = Vec::new();
        let mut committed_states: Vec<TaskState> = Vec::new();

        for task_id in std::mem::take(&mut self.touch_order) {
            let delta = match self.deltas.remove(&task_id) {
                Some(delta) => delta,
                None => continue,
            };
            if delta.mutations.is_empty() {
                continue;
            }

            let mutations = delta.mutations;
            let result = self.store.mutate(&task_id, |state| {
                for mutation in &mutations {
                    apply_mutation(state, mutation)?;
                }
                Ok(())
            });

            match result {
                Ok(state) => {
                    debug!(
                        task_id = %task_id,
                        mutations = mutations.len(),
                        "Unit of work committed task delta"
                    );
                    committed_ids.push(task_id);
                    committed_states.push(state);
                }
                Err(source) => {
                    return Err(CommitError {
                        committed: committed_ids,
                        failed_task: task_id,
                        source,
                    });
                }
            }
        }

        if !committed_states.is_empty() {
            info!(
                tasks = committed_states.len(),
                "Unit of work commit complete"
            );
        }
        Ok(committed_states)
    }

    /// Discard all staged changes. Zero disk effect.
    pub fn rollback(self) {
        debug!(
            tasks = self.touch_order.len(),
            "Unit of work rolled back, staged changes discarded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::with_dir(dir.path());
        (dir, store)
    }

    #[test]
    fn staged_mutations_are_invisible_until_commit() {
        let (_dir, store) = store();
        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        assert_eq!(uow.get("T-1").unwrap().task_status, TaskStatus::Planning);

        // Disk still holds the freshly created default.
        let on_disk = store.load("T-1").unwrap().unwrap();
        assert_eq!(on_disk.task_status, TaskStatus::New);

        let committed = uow.commit().unwrap();
        assert_eq!(committed.len(), 1);
        let on_disk = store.load("T-1").unwrap().unwrap();
        assert_eq!(on_disk.task_status, TaskStatus::Planning);
    }

    #[test]
    fn chained_status_transitions_validate_against_staged_view() {
        let (_dir, store) = store();
        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        uow.update_task_status("T-1", TaskStatus::ReadyForDevelopment)
            .unwrap();
        uow.update_task_status("T-1", TaskStatus::InDevelopment)
            .unwrap();
        let committed = uow.commit().unwrap();
        assert_eq!(committed[0].task_status, TaskStatus::InDevelopment);
    }

    #[test]
    fn invalid_staged_transition_is_rejected_at_staging_time() {
        let (_dir, store) = store();
        let mut uow = store.begin_unit_of_work();
        let err = uow.update_task_status("T-1", TaskStatus::Done).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStatusTransition { .. }));
        // Nothing was staged, so commit is a no-op.
        assert!(uow.is_empty());
        assert!(uow.commit().unwrap().is_empty());
    }

    #[test]
    fn rollback_has_zero_disk_effect() {
        let (_dir, store) = store();
        store.load_or_create("T-1").unwrap();
        let before = store.load("T-1").unwrap().unwrap();

        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        uow.add_completed_output("T-1", "plan", serde_json::json!("plan.md"))
            .unwrap();
        uow.rollback();

        let after = store.load("T-1").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn multi_task_commit_is_per_task_atomic() {
        let (_dir, store) = store();
        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        uow.update_task_status("T-2", TaskStatus::Planning).unwrap();
        let committed = uow.commit().unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(
            store.load("T-1").unwrap().unwrap().task_status,
            TaskStatus::Planning
        );
        assert_eq!(
            store.load("T-2").unwrap().unwrap().task_status,
            TaskStatus::Planning
        );
    }

    #[test]
    fn commit_failure_names_already_committed_tasks() {
        let (_dir, store) = store();

        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        uow.update_task_status("T-2", TaskStatus::Planning).unwrap();

        // Concurrent writer moves T-2 past the staged transition's source
        // status, so the delta no longer applies at commit time.
        store.update_task_status("T-2", TaskStatus::Planning).unwrap();
        store
            .update_task_status("T-2", TaskStatus::ReadyForDevelopment)
            .unwrap();

        let err = uow.commit().unwrap_err();
        assert_eq!(err.committed, vec!["T-1".to_string()]);
        assert_eq!(err.failed_task, "T-2");
        assert!(matches!(
            err.source,
            StoreError::InvalidStatusTransition { .. }
        ));

        // T-1 committed, T-2 untouched by the failed commit.
        assert_eq!(
            store.load("T-1").unwrap().unwrap().task_status,
            TaskStatus::Planning
        );
        assert_eq!(
            store.load("T-2").unwrap().unwrap().task_status,
            TaskStatus::ReadyForDevelopment
        );
    }

    #[test]
    fn staged_tool_state_and_outputs_commit_together() {
        let (_dir, store) = store();
        let mut uow = store.begin_unit_of_work();
        uow.update_task_status("T-1", TaskStatus::Planning).unwrap();
        uow.clear_tool_state("T-1").unwrap();
        uow.add_completed_output("T-1", "plan", serde_json::json!({"steps": 2}))
            .unwrap();

        let committed = uow.commit().unwrap();
        let state = &committed[0];
        assert_eq!(state.task_status, TaskStatus::Planning);
        assert!(state.active_tool_state.is_none());
        assert_eq!(
            state.completed_tool_outputs["plan"],
            serde_json::json!({"steps": 2})
        );
    }
}

//! Durable, per-task JSON state store.
//!
//! Every mutation flows through one funnel: acquire the task-scoped file
//! lock with a bounded wait, load the current state (or synthesize a fresh
//! default), apply the change in memory, write to a temp file in the same
//! directory, then atomically rename over the canonical file. Readers never
//! observe a partially written document; a crash before the rename leaves the
//! old version intact, after it the new one.
//!
//! The canonical file `<task_id>.state.json` is the only shared mutable
//! resource. Its sibling `<task_id>.lock` exists purely for OS-level mutual
//! exclusion; its contents are irrelevant.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::TaskStatus;

mod unit_of_work;

pub use unit_of_work::{CommitError, UnitOfWork};

/// Errors from [`TaskStore::complex_update`]. Staging failures discard the
/// whole batch before anything reaches disk; commit failures carry the
/// per-task detail of [`CommitError`].
#[derive(Debug, Error)]
pub enum ComplexUpdateError {
    #[error("staging failed, nothing committed: {0}")]
    Staging(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Errors from store operations. Lock timeouts are retryable; everything
/// else either indicates a caller bug (invalid transition) or an IO/serde
/// failure that left the previous canonical file intact.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out after {waited_ms}ms waiting for lock on task '{task_id}'")]
    LockTimeout { task_id: String, waited_ms: u64 },

    #[error("invalid status transition for task '{task_id}': {from} -> {to}")]
    InvalidStatusTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl StoreError {
    /// Whether the caller can simply retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

/// Live workflow position for one tool working a task. `context_store`
/// values must already be plain serializable data by the time they get here;
/// the store performs no artifact-specific serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    pub task_id: String,
    pub tool_name: String,
    pub current_state: String,
    #[serde(default)]
    pub context_store: HashMap<String, Value>,
    pub persona_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolState {
    pub fn new(
        task_id: impl Into<String>,
        tool_name: impl Into<String>,
        current_state: impl Into<String>,
        persona_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            tool_name: tool_name.into(),
            current_state: current_state.into(),
            context_store: HashMap::new(),
            persona_name: persona_name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable aggregate holding everything persisted about one task.
/// `active_tool_state` is present exactly while a workflow is mid-flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tool_state: Option<ToolState>,
    #[serde(default)]
    pub completed_tool_outputs: HashMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// Fresh default for a task never seen before.
    pub fn fresh(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_status: TaskStatus::New,
            active_tool_state: None,
            completed_tool_outputs: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Store configuration. No config-file loading here; callers construct this
/// directly.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub state_dir: PathBuf,
    pub lock_timeout: Duration,
    pub lock_retry_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".phasegate/tasks"),
            lock_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(25),
        }
    }
}

/// The durable task state store. Cheap to clone; all state lives on disk.
#[derive(Debug, Clone)]
pub struct TaskStore {
    config: StoreConfig,
}

impl TaskStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn with_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig {
            state_dir: state_dir.into(),
            ..StoreConfig::default()
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn state_path(&self, task_id: &str) -> PathBuf {
        self.config.state_dir.join(format!("{task_id}.state.json"))
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.config.state_dir.join(format!("{task_id}.lock"))
    }

    /// Run `body` while holding the exclusive per-task lock. Acquisition is a
    /// bounded wait: on timeout the caller gets a retryable error and no
    /// mutation has occurred.
    fn with_task_lock<T>(
        &self,
        task_id: &str,
        body: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        fs::create_dir_all(&self.config.state_dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(task_id))?;
        let mut lock = RwLock::new(lock_file);

        let started = Instant::now();
        let guard = loop {
            match lock.try_write() {
                Ok(guard) => break guard,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let waited = started.elapsed();
                    if waited >= self.config.lock_timeout {
                        warn!(
                            task_id = %task_id,
                            waited_ms = %waited.as_millis(),
                            "Lock acquisition timed out"
                        );
                        return Err(StoreError::LockTimeout {
                            task_id: task_id.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(self.config.lock_retry_interval);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        };

        let result = body();
        drop(guard);
        result
    }

    /// Read the persisted state, degrading corruption to "absent" with a
    /// logged warning so the task stays live. Call only while holding the
    /// task lock.
    fn read_state(&self, task_id: &str) -> Option<TaskState> {
        let path = self.state_path(task_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    file = ?path,
                    error = %e,
                    "Unreadable task state file, treating as absent"
                );
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    file = ?path,
                    error = %e,
                    "Corrupt task state file, treating as absent"
                );
                None
            }
        }
    }

    /// Serialize to a temp file in the same directory, then atomically
    /// replace the canonical file. Call only while holding the task lock.
    fn write_state(&self, state: &TaskState) -> Result<(), StoreError> {
        let path = self.state_path(&state.task_id);
        let temp_path = PathBuf::from(format!("{}.tmp", path.display()));
        let serialized = serde_json::to_string_pretty(state)?;
        fs::write(&temp_path, serialized)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// The single mutation funnel: lock, load-or-default, apply, stamp,
    /// write atomically. A mutation closure returning `Err` aborts before
    /// any write, leaving persisted state untouched.
    pub(crate) fn mutate(
        &self,
        task_id: &str,
        apply: impl FnOnce(&mut TaskState) -> Result<(), StoreError>,
    ) -> Result<TaskState, StoreError> {
        self.with_task_lock(task_id, || {
            let mut state = self
                .read_state(task_id)
                .unwrap_or_else(|| TaskState::fresh(task_id));
            apply(&mut state)?;
            state.updated_at = Utc::now();
            self.write_state(&state)?;
            debug!(
                task_id = %task_id,
                task_status = %state.task_status,
                mid_flight = state.active_tool_state.is_some(),
                "Task state persisted"
            );
            Ok(state)
        })
    }

    /// Load the task's state, persisting a fresh default on first access so
    /// repeated calls return equal values.
    pub fn load_or_create(&self, task_id: &str) -> Result<TaskState, StoreError> {
        self.with_task_lock(task_id, || {
            if let Some(state) = self.read_state(task_id) {
                return Ok(state);
            }
            let state = TaskState::fresh(task_id);
            self.write_state(&state)?;
            info!(task_id = %task_id, "Created fresh task state");
            Ok(state)
        })
    }

    /// Read-only probe: the persisted state if a valid one exists. Never
    /// creates the file.
    pub fn load(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        self.with_task_lock(task_id, || Ok(self.read_state(task_id)))
    }

    /// Move the task to `status`, enforcing the transition allow-list before
    /// any write.
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<TaskState, StoreError> {
        self.mutate(task_id, |state| {
            if !state.task_status.can_transition_to(status) {
                return Err(StoreError::InvalidStatusTransition {
                    task_id: state.task_id.clone(),
                    from: state.task_status,
                    to: status,
                });
            }
            info!(
                task_id = %state.task_id,
                from = %state.task_status,
                to = %status,
                "Task status updated"
            );
            state.task_status = status;
            Ok(())
        })
    }

    /// Record the live position of the active workflow tool.
    pub fn update_tool_state(
        &self,
        task_id: &str,
        mut tool_state: ToolState,
    ) -> Result<TaskState, StoreError> {
        self.mutate(task_id, |state| {
            tool_state.updated_at = Utc::now();
            state.active_tool_state = Some(tool_state);
            Ok(())
        })
    }

    /// Clear the active tool state, marking no workflow mid-flight.
    pub fn clear_tool_state(&self, task_id: &str) -> Result<TaskState, StoreError> {
        self.mutate(task_id, |state| {
            if let Some(cleared) = state.active_tool_state.take() {
                info!(
                    task_id = %state.task_id,
                    tool_name = %cleared.tool_name,
                    final_state = %cleared.current_state,
                    "Cleared active tool state"
                );
            }
            Ok(())
        })
    }

    /// Record a finished tool's artifact under its name.
    pub fn add_completed_output(
        &self,
        task_id: &str,
        tool_name: &str,
        artifact: Value,
    ) -> Result<TaskState, StoreError> {
        self.mutate(task_id, |state| {
            state
                .completed_tool_outputs
                .insert(tool_name.to_string(), artifact);
            Ok(())
        })
    }

    /// Open a unit of work for staging multiple mutations into one atomic
    /// commit per task.
    pub fn begin_unit_of_work(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    /// Strict multi-field update: stage mutations through the closure, then
    /// commit them as one atomic write per affected task. If staging fails
    /// the batch is rolled back and nothing reaches disk.
    pub fn complex_update(
        &self,
        stage: impl FnOnce(&mut UnitOfWork<'_>) -> Result<(), StoreError>,
    ) -> Result<Vec<TaskState>, ComplexUpdateError> {
        let mut uow = self.begin_unit_of_work();
        match stage(&mut uow) {
            Ok(()) => Ok(uow.commit()?),
            Err(e) => {
                uow.rollback();
                Err(ComplexUpdateError::Staging(e))
            }
        }
    }
}

//! Crash recovery: rehydrating a live workflow tool purely from persisted
//! state.
//!
//! Recovery instantiates the tool fresh through its registered constructor
//! (normal defaults), then overwrites its live `current_state` and
//! `context_store` with the persisted values verbatim. The result accepts
//! the next trigger exactly as an instance that never crashed would. An
//! unknown tool name fails recovery explicitly; a tool is never fabricated.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::store::{StoreError, TaskStore};

mod cache;
mod tool;

pub use cache::ActiveToolCache;
pub use tool::{GatedWorkflowTool, WorkflowTool};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no registered constructor for tool '{tool_name}'")]
    UnknownTool { tool_name: String },
}

type ToolConstructor = Box<dyn Fn(&str) -> Box<dyn WorkflowTool> + Send + Sync>;

/// Open name-to-constructor registry. New tool types register at startup;
/// the recovery algorithm itself never changes.
#[derive(Default)]
pub struct ToolRegistry {
    constructors: HashMap<String, ToolConstructor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor producing a fresh tool instance for a task id.
    pub fn register<F>(&mut self, tool_name: impl Into<String>, constructor: F)
    where
        F: Fn(&str) -> Box<dyn WorkflowTool> + Send + Sync + 'static,
    {
        let tool_name = tool_name.into();
        debug!(tool_name = %tool_name, "Registered workflow tool constructor");
        self.constructors.insert(tool_name, Box::new(constructor));
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.constructors.contains_key(tool_name)
    }

    /// Construct a fresh instance of `tool_name` for `task_id`, if
    /// registered.
    pub fn construct(&self, tool_name: &str, task_id: &str) -> Option<Box<dyn WorkflowTool>> {
        self.constructors.get(tool_name).map(|ctor| ctor(task_id))
    }

    pub fn registered_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.registered_tools())
            .finish()
    }
}

/// Rehydrates workflow tools from the durable store after a restart.
pub struct RecoveryService {
    store: TaskStore,
    registry: ToolRegistry,
}

impl RecoveryService {
    pub fn new(store: TaskStore, registry: ToolRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether a workflow is mid-flight for this task, i.e. whether
    /// [`recover_tool`](Self::recover_tool) would return a tool.
    pub fn can_recover(&self, task_id: &str) -> Result<bool, RecoveryError> {
        let state = self.store.load(task_id)?;
        Ok(state.and_then(|s| s.active_tool_state).is_some())
    }

    /// Reconstruct the live tool for `task_id` from persisted state alone.
    ///
    /// `Ok(None)` means nothing to recover (no state on disk, or no workflow
    /// mid-flight) and is not an error. An active tool state naming an
    /// unregistered tool is a configuration error.
    pub fn recover_tool(&self, task_id: &str) -> Result<Option<Box<dyn WorkflowTool>>, RecoveryError> {
        let Some(task_state) = self.store.load(task_id)? else {
            debug!(task_id = %task_id, "No persisted state, nothing to recover");
            return Ok(None);
        };
        let Some(persisted) = task_state.active_tool_state else {
            debug!(task_id = %task_id, "No workflow mid-flight, nothing to recover");
            return Ok(None);
        };

        let mut tool = self
            .registry
            .construct(&persisted.tool_name, task_id)
            .ok_or_else(|| RecoveryError::UnknownTool {
                tool_name: persisted.tool_name.clone(),
            })?;
        tool.restore(&persisted);

        info!(
            task_id = %task_id,
            tool_name = %persisted.tool_name,
            current_state = %persisted.current_state,
            "Rehydrated workflow tool from persisted state"
        );
        Ok(Some(tool))
    }
}

impl std::fmt::Debug for RecoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryService")
            .field("registry", &self.registry)
            .finish()
    }
}

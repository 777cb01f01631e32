//! In-process cache of live workflow tools.
//!
//! Performance optimization only: the durable store remains the sole source
//! of truth, and a cold start with an empty cache must behave identically to
//! a warm one (the recovery service rebuilds any tool from disk).

use std::collections::HashMap;

use tracing::debug;

use super::tool::WorkflowTool;

/// Explicit cache with a defined populate/evict lifecycle, keyed by task id.
#[derive(Default)]
pub struct ActiveToolCache {
    tools: HashMap<String, Box<dyn WorkflowTool>>,
}

impl ActiveToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<&dyn WorkflowTool> {
        self.tools.get(task_id).map(Box::as_ref)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut Box<dyn WorkflowTool>> {
        self.tools.get_mut(task_id)
    }

    pub fn insert(&mut self, task_id: impl Into<String>, tool: Box<dyn WorkflowTool>) {
        let task_id = task_id.into();
        debug!(task_id = %task_id, tool_name = %tool.tool_name(), "Cached active tool");
        self.tools.insert(task_id, tool);
    }

    /// Remove and return the cached tool, e.g. when it reaches its terminal
    /// state or its task is unloaded.
    pub fn evict(&mut self, task_id: &str) -> Option<Box<dyn WorkflowTool>> {
        let evicted = self.tools.remove(task_id);
        if evicted.is_some() {
            debug!(task_id = %task_id, "Evicted active tool from cache");
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tools.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ActiveToolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveToolCache")
            .field("tasks", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateMachineBuilder;
    use crate::recovery::tool::GatedWorkflowTool;

    fn tool(task_id: &str) -> Box<dyn WorkflowTool> {
        let machine = StateMachineBuilder::multi_step(["Plan"], "Done")
            .build()
            .unwrap();
        Box::new(GatedWorkflowTool::new(task_id, "plan", "architect", machine))
    }

    #[test]
    fn populate_and_evict_lifecycle() {
        let mut cache = ActiveToolCache::new();
        assert!(cache.is_empty());

        cache.insert("T-1", tool("T-1"));
        assert!(cache.contains("T-1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("T-1").unwrap().tool_name(), "plan");

        let evicted = cache.evict("T-1").unwrap();
        assert_eq!(evicted.task_id(), "T-1");
        assert!(cache.is_empty());
        assert!(cache.evict("T-1").is_none());
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache = ActiveToolCache::new();
        cache.insert("T-1", tool("T-1"));
        cache.insert("T-2", tool("T-2"));
        cache.clear();
        assert!(cache.is_empty());
    }
}

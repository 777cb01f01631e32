//! Recovery fidelity tests
//!
//! A rehydrated tool must be behaviorally indistinguishable from one that
//! never crashed: same current state, same context, and it accepts the next
//! trigger exactly as the live instance would have.

use phasegate::{
    GatedWorkflowTool, RecoveryError, RecoveryService, StateMachineBuilder, TaskStore,
    ToolRegistry, ToolState, WorkflowTool,
};
use tempfile::TempDir;

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register("multi_step", |task_id| {
        let machine = StateMachineBuilder::multi_step(["A", "B", "C"], "T")
            .build()
            .unwrap();
        Box::new(GatedWorkflowTool::new(
            task_id,
            "multi_step",
            "worker",
            machine,
        ))
    });
    registry
}

#[test]
fn recovered_tool_resumes_mid_review_and_accepts_next_trigger() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::with_dir(dir.path());

    let mut persisted = ToolState::new("T-1", "multi_step", "B_awaiting_human_review", "worker");
    persisted
        .context_store
        .insert("x".to_string(), serde_json::json!(1));
    store.update_tool_state("T-1", persisted).unwrap();

    let service = RecoveryService::new(store, registry());
    let mut tool = service.recover_tool("T-1").unwrap().unwrap();

    assert_eq!(tool.current_state(), "B_awaiting_human_review");
    assert_eq!(tool.context()["x"], serde_json::json!(1));

    // The very next trigger behaves as if the process never died.
    let state = tool.fire("human_approve").unwrap();
    assert_eq!(state, "C");
}

#[test]
fn recovery_survives_a_simulated_restart() {
    let dir = TempDir::new().unwrap();

    // First "process": drive a fresh tool partway and persist its snapshot.
    {
        let store = TaskStore::with_dir(dir.path());
        let service = RecoveryService::new(store.clone(), registry());
        let mut tool = service
            .registry()
            .construct("multi_step", "T-1")
            .unwrap();
        tool.fire("submit_A").unwrap();
        tool.fire("ai_approve").unwrap();
        tool.context_mut()
            .insert("artifact_draft".to_string(), serde_json::json!("plan v2"));
        store.update_tool_state("T-1", tool.snapshot()).unwrap();
    }

    // Second "process": nothing in memory, everything from disk.
    let store = TaskStore::with_dir(dir.path());
    let service = RecoveryService::new(store, registry());
    assert!(service.can_recover("T-1").unwrap());

    let mut tool = service.recover_tool("T-1").unwrap().unwrap();
    assert_eq!(tool.current_state(), "A_awaiting_human_review");
    assert_eq!(
        tool.context()["artifact_draft"],
        serde_json::json!("plan v2")
    );
    assert_eq!(tool.fire("human_approve").unwrap(), "B");
}

#[test]
fn unknown_tool_is_never_fabricated() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::with_dir(dir.path());
    store
        .update_tool_state("T-1", ToolState::new("T-1", "mystery", "A", "worker"))
        .unwrap();

    let service = RecoveryService::new(store, registry());
    // can_recover reports a mid-flight workflow exists...
    assert!(service.can_recover("T-1").unwrap());
    // ...but recovery refuses to invent a tool for it.
    let err = service.recover_tool("T-1").unwrap_err();
    assert!(matches!(err, RecoveryError::UnknownTool { .. }));
}

#[test]
fn cleared_tool_state_means_nothing_to_recover() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::with_dir(dir.path());

    store
        .update_tool_state("T-1", ToolState::new("T-1", "multi_step", "A", "worker"))
        .unwrap();
    store
        .add_completed_output("T-1", "multi_step", serde_json::json!("done"))
        .unwrap();
    store.clear_tool_state("T-1").unwrap();

    let service = RecoveryService::new(store, registry());
    assert!(!service.can_recover("T-1").unwrap());
    assert!(service.recover_tool("T-1").unwrap().is_none());
}

#[test]
fn cold_start_with_empty_cache_recovers_from_store_alone() {
    use phasegate::ActiveToolCache;

    let dir = TempDir::new().unwrap();
    let store = TaskStore::with_dir(dir.path());
    store
        .update_tool_state(
            "T-1",
            ToolState::new("T-1", "multi_step", "B_awaiting_ai_review", "worker"),
        )
        .unwrap();

    let service = RecoveryService::new(store, registry());
    let mut cache = ActiveToolCache::new();
    assert!(cache.is_empty());

    // Cache miss falls through to recovery, then populates the cache.
    let tool = service.recover_tool("T-1").unwrap().unwrap();
    cache.insert("T-1", tool);
    assert!(cache.contains("T-1"));
    assert_eq!(
        cache.get("T-1").unwrap().current_state(),
        "B_awaiting_ai_review"
    );

    // Eviction returns ownership; the store remains the source of truth.
    let evicted = cache.evict("T-1").unwrap();
    assert_eq!(evicted.current_state(), "B_awaiting_ai_review");
}

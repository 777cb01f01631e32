// Phasegate Library - Review-Gated Workflow Core
// This exposes the core components for testing and integration

pub mod catalog;
pub mod machine;
pub mod recovery;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use catalog::{CatalogError, PhaseCatalog, TaskStatus, WorkflowPhase};
pub use machine::{BuildError, MachineError, StateMachine, StateMachineBuilder, Transition};
pub use recovery::{
    ActiveToolCache, GatedWorkflowTool, RecoveryError, RecoveryService, ToolRegistry, WorkflowTool,
};
pub use store::{
    CommitError, ComplexUpdateError, StoreConfig, StoreError, TaskState, TaskStore, ToolState,
    UnitOfWork,
};
pub use telemetry::{create_workflow_span, init_telemetry};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging for embedding applications.
/// JSON output keyed by task and tool fields so workflow progress can be
/// correlated across restarts.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Phasegate telemetry initialized with structured logging");
    Ok(())
}

/// Create a span carrying the common workflow attributes.
pub fn create_workflow_span(
    operation: &str,
    task_id: Option<&str>,
    tool_name: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "workflow_operation",
        operation = operation,
        task.id = task_id,
        tool.name = tool_name,
    )
}

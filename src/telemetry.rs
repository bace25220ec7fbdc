use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize process-wide structured logging.
///
/// Emits JSON lines so the logs survive being shipped through CloudWatch or a
/// log aggregator unchanged. The filter honors `RUST_LOG` and defaults to INFO.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::debug!("dbsnap-verify telemetry initialized");
    Ok(())
}

/// Create a span carrying the fields every workflow operation should share.
pub fn create_workflow_span(operation: &str, database: &str) -> tracing::Span {
    tracing::info_span!(
        "snapshot_verification",
        operation = operation,
        database = database,
    )
}

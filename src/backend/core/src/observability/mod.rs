//! Observability: logging and metrics.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(log_level: &str, json_logging: bool) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::describe_counter;

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!("tempus_runs_total", "Total number of job runs started");
        describe_counter!(
            "tempus_runs_succeeded",
            "Total number of job runs that finished successfully"
        );
        describe_counter!(
            "tempus_runs_failed",
            "Total number of job runs that failed terminally"
        );
        describe_counter!(
            "tempus_retries_total",
            "Total number of retry dispatches across all runs"
        );
    }
}

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

/// Observability handles shared by a process.
pub struct ObservabilityState {
	pub metrics: Arc<MetricsRegistry>,
}

/// Install the logger and build the metrics registry.
pub fn init_observability(level: log::LevelFilter) -> anyhow::Result<ObservabilityState> {
	init_logging(level)?;
	let metrics = init_metrics()?;

	log::info!("Observability initialized: logging at {}, metrics registry ready", level);

	Ok(ObservabilityState { metrics })
}

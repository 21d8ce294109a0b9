use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for a collaboration session.
pub struct MetricsRegistry {
	registry: Registry,

	// Local edit path
	pub operations_buffered_total: IntCounter,
	pub flushes_total: IntCounter,
	pub operations_sent_total: IntCounter,
	pub flush_batch_size: Histogram,

	// Server feedback
	pub operations_acknowledged_total: IntCounter,
	pub operations_failed_total: IntCounter,
	pub pending_operations: IntGauge,

	// Inbound and reconciliation
	pub remote_operations_total: IntCounter,
	pub conflicts_total: IntCounter,
	pub resyncs_total: IntCounter,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
	IntCounter::with_opts(Opts::new(name, help).namespace("collab"))
}

impl MetricsRegistry {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let operations_buffered_total = counter(
			"operations_buffered_total",
			"Local operations accepted into the coalescing buffer",
		)?;
		let flushes_total = counter("flushes_total", "Buffer flushes that produced output")?;
		let operations_sent_total = counter(
			"operations_sent_total",
			"Coalesced operations handed to the transport, including retransmissions",
		)?;
		let flush_batch_size = Histogram::with_opts(
			HistogramOpts::new(
				"flush_batch_size",
				"Buffered operations drained per flush, before coalescing",
			)
			.namespace("collab")
			.buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
		)?;
		let operations_acknowledged_total = counter(
			"operations_acknowledged_total",
			"Operations acknowledged by the server",
		)?;
		let operations_failed_total = counter(
			"operations_failed_total",
			"Operations rejected or rolled back by the server",
		)?;
		let pending_operations = IntGauge::with_opts(
			Opts::new("pending_operations", "Operations sent but not yet acknowledged")
				.namespace("collab"),
		)?;
		let remote_operations_total = counter(
			"remote_operations_total",
			"Remote operations received from the transport",
		)?;
		let conflicts_total = counter(
			"conflicts_total",
			"Remote operations that collided with a pending local operation",
		)?;
		let resyncs_total = counter("resyncs_total", "Full resyncs requested")?;

		registry.register(Box::new(operations_buffered_total.clone()))?;
		registry.register(Box::new(flushes_total.clone()))?;
		registry.register(Box::new(operations_sent_total.clone()))?;
		registry.register(Box::new(flush_batch_size.clone()))?;
		registry.register(Box::new(operations_acknowledged_total.clone()))?;
		registry.register(Box::new(operations_failed_total.clone()))?;
		registry.register(Box::new(pending_operations.clone()))?;
		registry.register(Box::new(remote_operations_total.clone()))?;
		registry.register(Box::new(conflicts_total.clone()))?;
		registry.register(Box::new(resyncs_total.clone()))?;

		Ok(Self {
			registry,
			operations_buffered_total,
			flushes_total,
			operations_sent_total,
			flush_batch_size,
			operations_acknowledged_total,
			operations_failed_total,
			pending_operations,
			remote_operations_total,
			conflicts_total,
			resyncs_total,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}

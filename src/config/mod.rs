use log::Level;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::ResolutionStrategy;

/// Runtime configuration for a collaboration client.
///
/// Values are loaded from (in order): `/etc/vanopticon/collab.json`, the user
/// and local config folders (optional), and environment variables prefixed
/// with `CLB_` (e.g. `CLB_STRATEGY`).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	/// Author stamped on every local operation
	pub user_id: String,
	/// Debounce delay before buffered edits are flushed
	pub flush_delay_ms: u64,
	pub strategy: ResolutionStrategy,
	pub log_level: Level,
	// Broadcast mirror buffer; lagging receivers drop older events
	pub event_capacity: usize,
}

impl Default for Settings {
	fn default() -> Self {
		let user_id = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "anonymous".to_string());

		Self {
			user_id,
			flush_delay_ms: 50,
			strategy: ResolutionStrategy::Merge,
			log_level: Level::Info,
			event_capacity: 256,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/vanopticon/collab.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("vanopticon").join("collab.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("vanopticon").join("collab.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(config::Environment::with_prefix("CLB").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct reads win over whatever the `config` crate mapped, so explicit
	// overrides always take effect.
	if let Ok(u) = std::env::var("CLB_USER_ID") {
		if !u.is_empty() {
			s.user_id = u;
		}
	}
	if let Ok(d) = std::env::var("CLB_FLUSH_DELAY_MS") {
		if let Ok(parsed) = d.parse::<u64>() {
			s.flush_delay_ms = parsed;
		}
	}
	if let Ok(st) = std::env::var("CLB_STRATEGY") {
		if !st.is_empty() {
			match st.parse::<ResolutionStrategy>() {
				Ok(parsed) => s.strategy = parsed,
				Err(e) => log::warn!("Ignoring CLB_STRATEGY: {}", e),
			}
		}
	}
	if let Ok(l) = std::env::var("CLB_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}
	if let Ok(c) = std::env::var("CLB_EVENT_CAPACITY") {
		if let Ok(parsed) = c.parse::<usize>() {
			if parsed > 0 {
				s.event_capacity = parsed;
			}
		}
	}

	Ok(s)
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the cohorts SDK.
//!
//! Precedence, lowest to highest: built-in defaults, TOML file, environment,
//! explicit overrides.

mod error;
mod layer;
mod sources;

pub use error::ConfigError;
pub use layer::{
	CohortsConfigLayer, ConnectivityLayer, EngineLayer, QueueLayer, RetryLayer, RulesLayer,
};
pub use sources::{ConfigSource, EnvSource, FileSource, ENV_PREFIX};

use std::path::{Path, PathBuf};
use std::time::Duration;

use loom_common_http::{Backoff, RetryConfig};
use tracing::debug;

use crate::connectivity::ConnectivityConfig;
use crate::engine::EngineConfig;
use crate::queue::QueueConfig;
use crate::rule_cache::RuleCacheConfig;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// `cohorts.toml` under the platform config directory, e.g.
/// `~/.config/loom/cohorts.toml`.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("loom").join("cohorts.toml"))
}

/// Platform data directory for persisted SDK state.
pub fn default_storage_dir() -> PathBuf {
	dirs::data_local_dir()
		.map(|dir| dir.join("loom").join("cohorts"))
		.unwrap_or_else(|| PathBuf::from(".loom").join("cohorts"))
}

/// Fully resolved runtime configuration.
#[derive(Clone)]
pub struct CohortsConfig {
	pub base_url: String,
	pub app_key: String,
	pub storage_dir: PathBuf,
	pub request_timeout: Duration,
	pub retry: RetryConfig,
	pub rules: RuleCacheConfig,
	pub queue: QueueConfig,
	pub connectivity: ConnectivityConfig,
	/// `host:port` probed for reachability. `None` derives it from
	/// `base_url`.
	pub probe_target: Option<String>,
	pub engine: EngineConfig,
}

impl std::fmt::Debug for CohortsConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CohortsConfig")
			.field("base_url", &self.base_url)
			.field("app_key", &"[REDACTED]")
			.field("storage_dir", &self.storage_dir)
			.field("request_timeout", &self.request_timeout)
			.field("retry", &self.retry)
			.field("rules", &self.rules)
			.field("queue", &self.queue)
			.field("connectivity", &self.connectivity)
			.field("probe_target", &self.probe_target)
			.field("engine", &self.engine)
			.finish()
	}
}

impl CohortsConfig {
	/// Loads defaults, then `path` (or the default config path), then the
	/// process environment, then `overrides`.
	pub fn load(path: Option<&Path>, overrides: CohortsConfigLayer) -> Result<Self, ConfigError> {
		let mut sources: Vec<Box<dyn ConfigSource>> = Vec::new();
		match path {
			Some(path) => sources.push(Box::new(FileSource::new(path))),
			None => {
				if let Some(file) = FileSource::user() {
					sources.push(Box::new(file));
				}
			}
		}
		sources.push(Box::new(EnvSource::new()));

		let mut layer = CohortsConfigLayer::default();
		for source in &sources {
			debug!(source = source.name(), "applying config source");
			layer.merge(source.load()?);
		}
		layer.merge(overrides);

		Self::from_layer(layer)
	}

	/// Resolves a merged layer, applying defaults and validating.
	pub fn from_layer(layer: CohortsConfigLayer) -> Result<Self, ConfigError> {
		let base_url = layer
			.base_url
			.map(|url| url.trim().trim_end_matches('/').to_string())
			.filter(|url| !url.is_empty())
			.ok_or_else(|| ConfigError::missing_field("base_url"))?;
		let app_key = layer
			.app_key
			.map(|key| key.trim().to_string())
			.filter(|key| !key.is_empty())
			.ok_or_else(|| ConfigError::missing_field("app_key"))?;

		let connectivity_layer = layer.connectivity.unwrap_or_default();

		let config = Self {
			base_url,
			app_key,
			storage_dir: layer.storage_dir.unwrap_or_else(default_storage_dir),
			request_timeout: Duration::from_secs(
				layer.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
			),
			retry: build_retry_config(layer.retry),
			rules: build_rules_config(layer.rules),
			queue: build_queue_config(layer.queue),
			connectivity: build_connectivity_config(&connectivity_layer),
			probe_target: connectivity_layer.probe_target,
			engine: build_engine_config(layer.engine),
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let url = reqwest::Url::parse(&self.base_url)
			.map_err(|e| ConfigError::invalid_value("base_url", e.to_string()))?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(ConfigError::invalid_value("base_url", "scheme must be http or https"));
		}
		if url.host_str().is_none() {
			return Err(ConfigError::invalid_value("base_url", "missing host"));
		}
		if self.app_key.trim().is_empty() {
			return Err(ConfigError::missing_field("app_key"));
		}
		if self.request_timeout.is_zero() {
			return Err(ConfigError::invalid_value("request_timeout_secs", "must be positive"));
		}

		if self.retry.max_attempts == 0 {
			return Err(ConfigError::invalid_value("retry.max_attempts", "must be at least 1"));
		}
		if self.retry.base_delay > self.retry.max_delay {
			return Err(ConfigError::validation("retry.base_delay_ms exceeds retry.max_delay_ms"));
		}

		let queue = &self.queue;
		if queue.batch_size == 0 {
			return Err(ConfigError::invalid_value("queue.batch_size", "must be positive"));
		}
		if queue.batch_size > queue.max_queue_size {
			return Err(ConfigError::validation(format!(
				"queue.batch_size ({}) exceeds queue.max_queue_size ({})",
				queue.batch_size, queue.max_queue_size
			)));
		}
		if queue.max_retries == 0 {
			return Err(ConfigError::invalid_value("queue.max_retries", "must be at least 1"));
		}
		if queue.flush_interval.is_zero() {
			return Err(ConfigError::invalid_value("queue.flush_interval_secs", "must be positive"));
		}
		if queue.max_event_age.is_zero() {
			return Err(ConfigError::invalid_value("queue.max_event_age_secs", "must be positive"));
		}
		if queue.backoff.base_delay > queue.backoff.max_delay {
			return Err(ConfigError::validation("queue.backoff_base_ms exceeds queue.backoff_max_ms"));
		}

		if self.connectivity.poll_interval.is_zero() {
			return Err(ConfigError::invalid_value(
				"connectivity.poll_interval_secs",
				"must be positive",
			));
		}
		if self.engine.max_cohorts == 0 {
			return Err(ConfigError::invalid_value("engine.max_cohorts", "must be positive"));
		}
		Ok(())
	}

	/// Address for the reachability probe: the configured target, or the
	/// base URL's host and port.
	pub fn probe_address(&self) -> Result<String, ConfigError> {
		if let Some(target) = &self.probe_target {
			return Ok(target.clone());
		}
		let url = reqwest::Url::parse(&self.base_url)
			.map_err(|e| ConfigError::invalid_value("base_url", e.to_string()))?;
		let host = url
			.host_str()
			.ok_or_else(|| ConfigError::invalid_value("base_url", "missing host"))?;
		let port = url
			.port_or_known_default()
			.ok_or_else(|| ConfigError::invalid_value("base_url", "missing port"))?;
		Ok(format!("{host}:{port}"))
	}
}

fn build_retry_config(layer: Option<RetryLayer>) -> RetryConfig {
	let layer = layer.unwrap_or_default();
	let defaults = RetryConfig::default();
	RetryConfig {
		max_attempts: layer.max_attempts.unwrap_or(defaults.max_attempts),
		base_delay: layer.base_delay_ms.map(Duration::from_millis).unwrap_or(defaults.base_delay),
		max_delay: layer.max_delay_ms.map(Duration::from_millis).unwrap_or(defaults.max_delay),
		jitter: layer.jitter.unwrap_or(defaults.jitter),
	}
}

fn build_rules_config(layer: Option<RulesLayer>) -> RuleCacheConfig {
	let layer = layer.unwrap_or_default();
	let defaults = RuleCacheConfig::default();
	RuleCacheConfig {
		max_age: layer.max_age_secs.map(Duration::from_secs).unwrap_or(defaults.max_age),
	}
}

fn build_queue_config(layer: Option<QueueLayer>) -> QueueConfig {
	let layer = layer.unwrap_or_default();
	let defaults = QueueConfig::default();
	QueueConfig {
		batch_size: layer.batch_size.unwrap_or(defaults.batch_size),
		max_queue_size: layer.max_queue_size.unwrap_or(defaults.max_queue_size),
		max_retries: layer.max_retries.unwrap_or(defaults.max_retries),
		max_event_age: layer
			.max_event_age_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.max_event_age),
		flush_interval: layer
			.flush_interval_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.flush_interval),
		backoff: Backoff::new(
			layer
				.backoff_base_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.backoff.base_delay),
			layer
				.backoff_max_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.backoff.max_delay),
		),
	}
}

fn build_connectivity_config(layer: &ConnectivityLayer) -> ConnectivityConfig {
	let defaults = ConnectivityConfig::default();
	ConnectivityConfig {
		poll_interval: layer
			.poll_interval_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.poll_interval),
		probe_timeout: layer
			.probe_timeout_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.probe_timeout),
	}
}

fn build_engine_config(layer: Option<EngineLayer>) -> EngineConfig {
	let layer = layer.unwrap_or_default();
	let defaults = EngineConfig::default();
	EngineConfig {
		cohort_ttl: layer
			.cohort_ttl_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.cohort_ttl),
		max_cohorts: layer.max_cohorts.unwrap_or(defaults.max_cohorts),
	}
}

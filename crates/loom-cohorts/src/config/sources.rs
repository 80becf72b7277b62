// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files and environment.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use super::layer::*;
use super::ConfigError;

/// Prefix shared by every cohorts environment variable.
pub const ENV_PREFIX: &str = "LOOM_COHORTS_";

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	/// Name for logging
	fn name(&self) -> &'static str;

	fn load(&self) -> Result<CohortsConfigLayer, ConfigError>;
}

/// File-based configuration source (TOML). A missing file yields an empty
/// layer.
pub struct FileSource {
	path: PathBuf,
}

impl FileSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// `~/.config/loom/cohorts.toml` on Linux; the platform config dir
	/// elsewhere.
	pub fn user() -> Option<Self> {
		super::default_config_path().map(Self::new)
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		"file"
	}

	fn load(&self) -> Result<CohortsConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(CohortsConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");

		let content = std::fs::read_to_string(&self.path)?;
		let layer: CohortsConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!(source = self.name(), "parsed config layer");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `LOOM_COHORTS_<FIELD>` for top-level fields and
/// `LOOM_COHORTS_<SECTION>__<FIELD>` (double underscore for nesting).
/// Unknown variables are ignored; unparseable values are errors.
pub struct EnvSource {
	vars: Option<Vec<(String, String)>>,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self { vars: None }
	}

	/// Reads the given pairs instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn load(&self) -> Result<CohortsConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let vars: Vec<(String, String)> = match &self.vars {
			Some(vars) => vars.clone(),
			None => std::env::vars().collect(),
		};

		let mut layer = CohortsConfigLayer::default();
		for (key, value) in vars {
			let Some(name) = key.strip_prefix(ENV_PREFIX) else {
				continue;
			};

			let value = value.trim().to_string();
			if value.is_empty() {
				continue;
			}

			trace!(key = %key, "processing env var");

			match name {
				"BASE_URL" => layer.base_url = Some(value),
				"APP_KEY" => layer.app_key = Some(value),
				"STORAGE_DIR" => layer.storage_dir = Some(PathBuf::from(value)),
				"REQUEST_TIMEOUT_SECS" => layer.request_timeout_secs = Some(parse(&key, &value)?),

				"RETRY__MAX_ATTEMPTS" => retry(&mut layer).max_attempts = Some(parse(&key, &value)?),
				"RETRY__BASE_DELAY_MS" => retry(&mut layer).base_delay_ms = Some(parse(&key, &value)?),
				"RETRY__MAX_DELAY_MS" => retry(&mut layer).max_delay_ms = Some(parse(&key, &value)?),
				"RETRY__JITTER" => retry(&mut layer).jitter = Some(parse(&key, &value)?),

				"RULES__MAX_AGE_SECS" => {
					layer.rules.get_or_insert_with(RulesLayer::default).max_age_secs = Some(parse(&key, &value)?)
				}

				"QUEUE__BATCH_SIZE" => queue(&mut layer).batch_size = Some(parse(&key, &value)?),
				"QUEUE__MAX_QUEUE_SIZE" => queue(&mut layer).max_queue_size = Some(parse(&key, &value)?),
				"QUEUE__MAX_RETRIES" => queue(&mut layer).max_retries = Some(parse(&key, &value)?),
				"QUEUE__MAX_EVENT_AGE_SECS" => queue(&mut layer).max_event_age_secs = Some(parse(&key, &value)?),
				"QUEUE__FLUSH_INTERVAL_SECS" => queue(&mut layer).flush_interval_secs = Some(parse(&key, &value)?),
				"QUEUE__BACKOFF_BASE_MS" => queue(&mut layer).backoff_base_ms = Some(parse(&key, &value)?),
				"QUEUE__BACKOFF_MAX_MS" => queue(&mut layer).backoff_max_ms = Some(parse(&key, &value)?),

				"CONNECTIVITY__POLL_INTERVAL_SECS" => {
					connectivity(&mut layer).poll_interval_secs = Some(parse(&key, &value)?)
				}
				"CONNECTIVITY__PROBE_TIMEOUT_MS" => {
					connectivity(&mut layer).probe_timeout_ms = Some(parse(&key, &value)?)
				}
				"CONNECTIVITY__PROBE_TARGET" => connectivity(&mut layer).probe_target = Some(value),

				"ENGINE__COHORT_TTL_SECS" => engine(&mut layer).cohort_ttl_secs = Some(parse(&key, &value)?),
				"ENGINE__MAX_COHORTS" => engine(&mut layer).max_cohorts = Some(parse(&key, &value)?),

				_ => {
					// Unknown LOOM_COHORTS_ variable, ignore
				}
			}
		}

		Ok(layer)
	}
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	value
		.parse()
		.map_err(|e: T::Err| ConfigError::Env(format!("{key}={value}: {e}")))
}

fn retry(layer: &mut CohortsConfigLayer) -> &mut RetryLayer {
	layer.retry.get_or_insert_with(RetryLayer::default)
}

fn queue(layer: &mut CohortsConfigLayer) -> &mut QueueLayer {
	layer.queue.get_or_insert_with(QueueLayer::default)
}

fn connectivity(layer: &mut CohortsConfigLayer) -> &mut ConnectivityLayer {
	layer.connectivity.get_or_insert_with(ConnectivityLayer::default)
}

fn engine(layer: &mut CohortsConfigLayer) -> &mut EngineLayer {
	layer.engine.get_or_insert_with(EngineLayer::default)
}

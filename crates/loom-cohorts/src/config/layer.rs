// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use std::path::PathBuf;

use serde::Deserialize;

/// Partial configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortsConfigLayer {
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub app_key: Option<String>,
	#[serde(default)]
	pub storage_dir: Option<PathBuf>,
	#[serde(default)]
	pub request_timeout_secs: Option<u64>,
	#[serde(default)]
	pub retry: Option<RetryLayer>,
	#[serde(default)]
	pub rules: Option<RulesLayer>,
	#[serde(default)]
	pub queue: Option<QueueLayer>,
	#[serde(default)]
	pub connectivity: Option<ConnectivityLayer>,
	#[serde(default)]
	pub engine: Option<EngineLayer>,
}

/// Transport retries for the rule fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryLayer {
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub base_delay_ms: Option<u64>,
	#[serde(default)]
	pub max_delay_ms: Option<u64>,
	#[serde(default)]
	pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesLayer {
	#[serde(default)]
	pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueLayer {
	#[serde(default)]
	pub batch_size: Option<usize>,
	#[serde(default)]
	pub max_queue_size: Option<usize>,
	#[serde(default)]
	pub max_retries: Option<u32>,
	#[serde(default)]
	pub max_event_age_secs: Option<u64>,
	#[serde(default)]
	pub flush_interval_secs: Option<u64>,
	#[serde(default)]
	pub backoff_base_ms: Option<u64>,
	#[serde(default)]
	pub backoff_max_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectivityLayer {
	#[serde(default)]
	pub poll_interval_secs: Option<u64>,
	#[serde(default)]
	pub probe_timeout_ms: Option<u64>,
	/// `host:port` to probe. Defaults to the base URL's host.
	#[serde(default)]
	pub probe_target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineLayer {
	#[serde(default)]
	pub cohort_ttl_secs: Option<u64>,
	#[serde(default)]
	pub max_cohorts: Option<usize>,
}

impl CohortsConfigLayer {
	/// Merge another layer on top of this one (other takes precedence).
	pub fn merge(&mut self, other: CohortsConfigLayer) {
		if other.base_url.is_some() {
			self.base_url = other.base_url;
		}
		if other.app_key.is_some() {
			self.app_key = other.app_key;
		}
		if other.storage_dir.is_some() {
			self.storage_dir = other.storage_dir;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		merge_option(&mut self.retry, other.retry, RetryLayer::merge);
		merge_option(&mut self.rules, other.rules, RulesLayer::merge);
		merge_option(&mut self.queue, other.queue, QueueLayer::merge);
		merge_option(&mut self.connectivity, other.connectivity, ConnectivityLayer::merge);
		merge_option(&mut self.engine, other.engine, EngineLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

impl RetryLayer {
	fn merge(&mut self, other: RetryLayer) {
		if other.max_attempts.is_some() {
			self.max_attempts = other.max_attempts;
		}
		if other.base_delay_ms.is_some() {
			self.base_delay_ms = other.base_delay_ms;
		}
		if other.max_delay_ms.is_some() {
			self.max_delay_ms = other.max_delay_ms;
		}
		if other.jitter.is_some() {
			self.jitter = other.jitter;
		}
	}
}

impl RulesLayer {
	fn merge(&mut self, other: RulesLayer) {
		if other.max_age_secs.is_some() {
			self.max_age_secs = other.max_age_secs;
		}
	}
}

impl QueueLayer {
	fn merge(&mut self, other: QueueLayer) {
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.max_queue_size.is_some() {
			self.max_queue_size = other.max_queue_size;
		}
		if other.max_retries.is_some() {
			self.max_retries = other.max_retries;
		}
		if other.max_event_age_secs.is_some() {
			self.max_event_age_secs = other.max_event_age_secs;
		}
		if other.flush_interval_secs.is_some() {
			self.flush_interval_secs = other.flush_interval_secs;
		}
		if other.backoff_base_ms.is_some() {
			self.backoff_base_ms = other.backoff_base_ms;
		}
		if other.backoff_max_ms.is_some() {
			self.backoff_max_ms = other.backoff_max_ms;
		}
	}
}

impl ConnectivityLayer {
	fn merge(&mut self, other: ConnectivityLayer) {
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.probe_timeout_ms.is_some() {
			self.probe_timeout_ms = other.probe_timeout_ms;
		}
		if other.probe_target.is_some() {
			self.probe_target = other.probe_target;
		}
	}
}

impl EngineLayer {
	fn merge(&mut self, other: EngineLayer) {
		if other.cohort_ttl_secs.is_some() {
			self.cohort_ttl_secs = other.cohort_ttl_secs;
		}
		if other.max_cohorts.is_some() {
			self.max_cohorts = other.max_cohorts;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn merge_overrides_only_set_fields() {
		let mut base: CohortsConfigLayer = toml::from_str(
			r#"
			base_url = "https://ads.example.com"
			app_key = "file_key"

			[queue]
			batch_size = 10
			max_retries = 3
			"#,
		)
		.unwrap();

		let over: CohortsConfigLayer = toml::from_str(
			r#"
			app_key = "env_key"

			[queue]
			max_retries = 7
			"#,
		)
		.unwrap();

		base.merge(over);
		assert_eq!(base.base_url.as_deref(), Some("https://ads.example.com"));
		assert_eq!(base.app_key.as_deref(), Some("env_key"));
		let queue = base.queue.unwrap();
		assert_eq!(queue.batch_size, Some(10));
		assert_eq!(queue.max_retries, Some(7));
	}

	#[test]
	fn merge_fills_missing_sections() {
		let mut base = CohortsConfigLayer::default();
		base.merge(CohortsConfigLayer {
			engine: Some(EngineLayer {
				max_cohorts: Some(4),
				..Default::default()
			}),
			..Default::default()
		});
		assert_eq!(base.engine.unwrap().max_cohorts, Some(4));
	}
}

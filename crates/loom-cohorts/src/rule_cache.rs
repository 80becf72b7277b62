// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned rule-set cache with stale-while-revalidate fallback.
//!
//! Each app identity has its own entry, persisted under its own namespace.
//! A stale rule set is always preferred over none: if a refresh fails the
//! previously cached set is served regardless of its age.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loom_cohorts_core::RuleSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CohortsError, FetchError, Result};
use crate::fetch::{FetchOutcome, RuleFetcher};
use crate::storage::{load_json, store_json, KeyValueStore, Namespace};

const RULES_KEY: &str = "rules";
const RULES_FETCHED_AT_KEY: &str = "rules_fetched_at";

#[derive(Debug, Clone)]
pub struct RuleCacheConfig {
	/// Age after which `load` asks the fetcher for a newer rule set.
	pub max_age: Duration,
}

impl Default for RuleCacheConfig {
	fn default() -> Self {
		Self {
			max_age: Duration::from_secs(60 * 60),
		}
	}
}

#[derive(Debug, Default)]
struct CacheEntry {
	rules: Option<RuleSet>,
	fetched_at: Option<DateTime<Utc>>,
	restored: bool,
}

impl CacheEntry {
	fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
		match (&self.rules, self.fetched_at) {
			(Some(_), Some(fetched_at)) => match (now - fetched_at).to_std() {
				Ok(age) => age <= max_age,
				// Fetched "in the future" (clock moved back): treat as fresh.
				Err(_) => true,
			},
			_ => false,
		}
	}
}

/// Holds the current rule set per app and refreshes it through a
/// [`RuleFetcher`].
pub struct RuleCache {
	fetcher: Arc<dyn RuleFetcher>,
	store: Arc<dyn KeyValueStore>,
	config: RuleCacheConfig,
	entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RuleCache {
	pub fn new(fetcher: Arc<dyn RuleFetcher>, store: Arc<dyn KeyValueStore>, config: RuleCacheConfig) -> Self {
		Self {
			fetcher,
			store,
			config,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Returns the best available rule set for `app_key`.
	///
	/// 1. A cached set younger than `max_age` is returned without a fetch.
	/// 2. Otherwise the fetcher is asked with the cached version. "Unchanged"
	///    keeps the cached set and resets its freshness timestamp (only the
	///    timestamp is rewritten); a new set replaces the cached one and is
	///    persisted.
	/// 3. On fetch failure any cached set is returned regardless of age.
	///    Only when nothing was ever cached does this fail with
	///    [`CohortsError::NoRulesAvailable`].
	pub async fn load(&self, app_key: &str) -> Result<RuleSet> {
		self.load_at(app_key, Utc::now()).await
	}

	pub(crate) async fn load_at(&self, app_key: &str, now: DateTime<Utc>) -> Result<RuleSet> {
		let mut entries = self.entries.lock().await;
		let namespace = Namespace::for_app(app_key);
		let entry = entries.entry(app_key.to_string()).or_default();
		self.ensure_restored(entry, &namespace).await;

		if entry.is_fresh(now, self.config.max_age) {
			if let Some(rules) = &entry.rules {
				debug!(version = rules.version, "Serving fresh cached cohort rules");
				return Ok(rules.clone());
			}
		}

		let current_version = entry.rules.as_ref().map(|rules| rules.version);
		match self.fetcher.fetch(app_key, current_version).await {
			Ok(FetchOutcome::Unchanged) => {
				let Some(rules) = entry.rules.clone() else {
					return Err(CohortsError::NoRulesAvailable(FetchError::UnexpectedNotModified));
				};
				entry.fetched_at = Some(now);
				self.persist_fetched_at(&namespace, now).await;
				debug!(version = rules.version, "Cohort rules confirmed unchanged");
				Ok(rules)
			}
			Ok(FetchOutcome::Updated(rules)) => {
				info!(
					previous_version = ?current_version,
					version = rules.version,
					cohorts = rules.cohorts.len(),
					"Cohort rules updated"
				);
				entry.rules = Some(rules.clone());
				entry.fetched_at = Some(now);
				self.persist_rules(&namespace, &rules).await;
				self.persist_fetched_at(&namespace, now).await;
				Ok(rules)
			}
			Err(e) => match &entry.rules {
				Some(rules) => {
					warn!(
						error = %e,
						version = rules.version,
						fetched_at = ?entry.fetched_at,
						"Cohort rule refresh failed, serving cached rules"
					);
					Ok(rules.clone())
				}
				None => {
					warn!(error = %e, "Cohort rule fetch failed and no rules are cached");
					Err(CohortsError::NoRulesAvailable(e))
				}
			},
		}
	}

	/// Returns the cached rule set without refreshing.
	pub async fn current(&self, app_key: &str) -> Option<RuleSet> {
		let mut entries = self.entries.lock().await;
		let entry = entries.entry(app_key.to_string()).or_default();
		self.ensure_restored(entry, &Namespace::for_app(app_key)).await;
		entry.rules.clone()
	}

	pub async fn is_fresh(&self, app_key: &str) -> bool {
		let mut entries = self.entries.lock().await;
		let entry = entries.entry(app_key.to_string()).or_default();
		self.ensure_restored(entry, &Namespace::for_app(app_key)).await;
		entry.is_fresh(Utc::now(), self.config.max_age)
	}

	/// Marks the cached set as expired so the next `load` refetches. The
	/// rule set itself is kept as a fallback.
	pub async fn invalidate(&self, app_key: &str) {
		let mut entries = self.entries.lock().await;
		if let Some(entry) = entries.get_mut(app_key) {
			entry.fetched_at = None;
		}
		let key = Namespace::for_app(app_key).key(RULES_FETCHED_AT_KEY);
		if let Err(e) = self.store.delete(&key).await {
			warn!(key = %key, error = %e, "Failed to clear rules timestamp");
		}
	}

	/// Loads the persisted entry for `app_key` if it has not been loaded yet.
	pub async fn restore(&self, app_key: &str) {
		let mut entries = self.entries.lock().await;
		let entry = entries.entry(app_key.to_string()).or_default();
		self.ensure_restored(entry, &Namespace::for_app(app_key)).await;
	}

	async fn ensure_restored(&self, entry: &mut CacheEntry, namespace: &Namespace) {
		if entry.restored {
			return;
		}
		entry.restored = true;

		let rules_key = namespace.key(RULES_KEY);
		match load_json::<RuleSet>(self.store.as_ref(), &rules_key).await {
			Ok(Some(rules)) => {
				debug!(version = rules.version, "Restored cached cohort rules");
				entry.rules = Some(rules);
			}
			Ok(None) => return,
			Err(e) => {
				warn!(key = %rules_key, error = %e, "Discarding unreadable cached cohort rules");
				return;
			}
		}

		let fetched_at_key = namespace.key(RULES_FETCHED_AT_KEY);
		match load_json::<DateTime<Utc>>(self.store.as_ref(), &fetched_at_key).await {
			Ok(fetched_at) => entry.fetched_at = fetched_at,
			Err(e) => warn!(key = %fetched_at_key, error = %e, "Discarding unreadable rules timestamp"),
		}
	}

	async fn persist_rules(&self, namespace: &Namespace, rules: &RuleSet) {
		let key = namespace.key(RULES_KEY);
		if let Err(e) = store_json(self.store.as_ref(), &key, rules).await {
			warn!(key = %key, error = %e, "Failed to persist cohort rules");
		}
	}

	async fn persist_fetched_at(&self, namespace: &Namespace, at: DateTime<Utc>) {
		let key = namespace.key(RULES_FETCHED_AT_KEY);
		if let Err(e) = store_json(self.store.as_ref(), &key, &at).await {
			warn!(key = %key, error = %e, "Failed to persist rules timestamp");
		}
	}
}

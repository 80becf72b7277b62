// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Combined cohort list for the ad-request path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use loom_cohorts_core::{evaluate, CohortCriteria, EventHistory};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::CustomCohortRegistry;
use crate::rule_cache::RuleCache;
use crate::signals::SignalProvider;

#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// How long a computed cohort list is served before recomputing.
	pub cohort_ttl: Duration,
	/// Maximum number of cohort ids handed out.
	pub max_cohorts: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			cohort_ttl: Duration::from_secs(5 * 60),
			max_cohorts: 10,
		}
	}
}

#[derive(Debug)]
struct CachedCohorts {
	ids: Vec<String>,
	computed_at: Instant,
}

/// Merges server-defined and app-defined cohorts into one ranked list.
///
/// Server cohorts come first, then app cohorts; an id that appears in both
/// keeps its server position. The result is cached for `cohort_ttl`.
pub struct CohortEngine {
	app_key: String,
	config: EngineConfig,
	signals: Arc<dyn SignalProvider>,
	rules: Arc<RuleCache>,
	registry: Arc<CustomCohortRegistry>,
	cache: Mutex<Option<CachedCohorts>>,
}

impl CohortEngine {
	pub fn new(
		app_key: impl Into<String>,
		config: EngineConfig,
		signals: Arc<dyn SignalProvider>,
		rules: Arc<RuleCache>,
		registry: Arc<CustomCohortRegistry>,
	) -> Self {
		Self {
			app_key: app_key.into(),
			config,
			signals,
			rules,
			registry,
			cache: Mutex::new(None),
		}
	}

	pub fn app_key(&self) -> &str {
		&self.app_key
	}

	pub fn rules(&self) -> &Arc<RuleCache> {
		&self.rules
	}

	pub fn registry(&self) -> &Arc<CustomCohortRegistry> {
		&self.registry
	}

	/// Current cohort ids, highest ranked first.
	///
	/// A rule set that cannot be loaded contributes nothing; app-defined
	/// cohorts are still evaluated.
	pub async fn cohorts(&self, history: &dyn EventHistory) -> Vec<String> {
		let mut cache = self.cache.lock().await;
		if let Some(cached) = cache.as_ref() {
			if cached.computed_at.elapsed() < self.config.cohort_ttl {
				return cached.ids.clone();
			}
		}

		let snapshot = self.signals.snapshot().await;

		let server = match self.rules.load(&self.app_key).await {
			Ok(rules) => evaluate(&rules, &snapshot),
			Err(e) => {
				warn!(app_key = %self.app_key, error = %e, "Cohort rules unavailable, using custom cohorts only");
				Vec::new()
			}
		};
		let custom = self.registry.evaluate(&snapshot, history).await;

		let server_count = server.len();
		let custom_count = custom.len();
		let ids = merge_ranked(server, custom, self.config.max_cohorts);
		debug!(
			server = server_count,
			custom = custom_count,
			returned = ids.len(),
			"Computed cohorts"
		);

		*cache = Some(CachedCohorts {
			ids: ids.clone(),
			computed_at: Instant::now(),
		});
		ids
	}

	/// Forces the next `cohorts` call to recompute.
	pub async fn invalidate(&self) {
		*self.cache.lock().await = None;
	}

	pub async fn register_custom(&self, criteria: CohortCriteria) -> Result<()> {
		self.registry.register(criteria).await?;
		self.invalidate().await;
		Ok(())
	}

	pub async fn unregister_custom(&self, id: &str) -> bool {
		let removed = self.registry.unregister(id).await;
		if removed {
			self.invalidate().await;
		}
		removed
	}
}

fn merge_ranked(server: Vec<String>, custom: Vec<String>, limit: usize) -> Vec<String> {
	let mut seen = HashSet::new();
	server
		.into_iter()
		.chain(custom)
		.filter(|id| seen.insert(id.clone()))
		.take(limit)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::FetchError;
	use crate::fetch::{FetchOutcome, RuleFetcher};
	use crate::rule_cache::RuleCacheConfig;
	use crate::storage::{MemoryKeyValueStore, Namespace};
	use async_trait::async_trait;
	use loom_cohorts_core::{
		CohortCondition, CohortDefinition, CohortRule, ConditionOperator, ConditionValue, FieldRef,
		NoEventHistory, RuleSet, SignalField, SignalSnapshot,
	};
	use std::sync::atomic::{AtomicU32, Ordering};

	struct FixedFetcher {
		rules: Option<RuleSet>,
		calls: AtomicU32,
	}

	#[async_trait]
	impl RuleFetcher for FixedFetcher {
		async fn fetch(&self, _app_key: &str, _current: Option<i64>) -> std::result::Result<FetchOutcome, FetchError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			match &self.rules {
				Some(rules) => Ok(FetchOutcome::Updated(rules.clone())),
				None => Err(FetchError::Status {
					status: 503,
					message: "down".into(),
				}),
			}
		}
	}

	fn level_cohort(id: &str, priority: i32, min_level: i64) -> CohortDefinition {
		CohortDefinition::new(id, priority).with_condition(CohortCondition::new(
			FieldRef::Known(SignalField::LevelReached),
			ConditionOperator::Gte,
			ConditionValue::Int(min_level),
		))
	}

	fn custom_level(id: &str, priority: i32, min_level: f64) -> CohortCriteria {
		CohortCriteria::new(
			id,
			vec![CohortRule::SignalThreshold {
				signal: "level_reached".into(),
				min_value: min_level,
			}],
		)
		.with_priority(priority)
	}

	fn engine(rules: Option<RuleSet>, config: EngineConfig) -> (CohortEngine, Arc<FixedFetcher>) {
		let store = Arc::new(MemoryKeyValueStore::new());
		let fetcher = Arc::new(FixedFetcher {
			rules,
			calls: AtomicU32::new(0),
		});
		let cache = Arc::new(RuleCache::new(fetcher.clone(), store.clone(), RuleCacheConfig::default()));
		let registry = Arc::new(CustomCohortRegistry::new(store, &Namespace::for_app("app")));
		let signals = Arc::new(SignalSnapshot {
			level_reached: 12,
			..Default::default()
		});
		(CohortEngine::new("app", config, signals, cache, registry), fetcher)
	}

	#[tokio::test]
	async fn merges_server_then_custom_without_duplicates() {
		let rules = RuleSet::new(1, "owner")
			.with_cohort(level_cohort("mid_game", 5, 10))
			.with_cohort(level_cohort("shared", 1, 1));
		let (engine, _) = engine(Some(rules), EngineConfig::default());

		engine.register_custom(custom_level("shared", 100, 1.0)).await.unwrap();
		engine.register_custom(custom_level("grinder", 50, 5.0)).await.unwrap();

		assert_eq!(
			engine.cohorts(&NoEventHistory).await,
			vec!["mid_game", "shared", "grinder"]
		);
	}

	#[tokio::test]
	async fn truncates_to_max_cohorts() {
		let rules = RuleSet::new(1, "owner")
			.with_cohort(level_cohort("a", 3, 1))
			.with_cohort(level_cohort("b", 2, 1))
			.with_cohort(level_cohort("c", 1, 1));
		let config = EngineConfig {
			max_cohorts: 2,
			..EngineConfig::default()
		};
		let (engine, _) = engine(Some(rules), config);
		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["a", "b"]);
	}

	#[tokio::test]
	async fn unavailable_rules_still_yield_custom_cohorts() {
		let (engine, _) = engine(None, EngineConfig::default());
		engine.register_custom(custom_level("veteran", 1, 10.0)).await.unwrap();
		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["veteran"]);
	}

	#[tokio::test(start_paused = true)]
	async fn serves_cached_list_within_ttl() {
		let rules = RuleSet::new(1, "owner").with_cohort(level_cohort("a", 1, 1));
		let (engine, fetcher) = engine(Some(rules), EngineConfig::default());

		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["a"]);
		// Bypasses the engine so only a recompute would pick it up.
		engine.registry().register(custom_level("late", 1, 1.0)).await.unwrap();

		tokio::time::advance(Duration::from_secs(60)).await;
		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["a"]);

		tokio::time::advance(Duration::from_secs(5 * 60)).await;
		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["a", "late"]);
		assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn registry_changes_invalidate_cache() {
		let (engine, _) = engine(None, EngineConfig::default());
		engine.register_custom(custom_level("one", 1, 1.0)).await.unwrap();
		assert_eq!(engine.cohorts(&NoEventHistory).await, vec!["one"]);

		assert!(engine.unregister_custom("one").await);
		assert!(engine.cohorts(&NoEventHistory).await.is_empty());
		assert!(!engine.unregister_custom("one").await);
	}

	#[test]
	fn merge_keeps_first_occurrence() {
		let merged = merge_ranked(
			vec!["x".into(), "y".into()],
			vec!["y".into(), "z".into(), "x".into()],
			10,
		);
		assert_eq!(merged, vec!["x", "y", "z"]);
	}
}

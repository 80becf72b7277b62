// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! App-registered cohort criteria.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loom_cohorts_core::{evaluate_criteria, CohortCriteria, EventHistory, SignalSnapshot};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{load_json, store_json, KeyValueStore, Namespace};

const CRITERIA_KEY: &str = "criteria";

#[derive(Debug, Default)]
struct RegistryState {
	criteria: BTreeMap<String, CohortCriteria>,
	loaded: bool,
}

/// Stores and evaluates cohort criteria registered by the host app.
///
/// Criteria are persisted as one JSON map keyed by cohort id. Registration
/// validates first and stores nothing on failure. Persistence failures are
/// logged; the in-memory registry stays authoritative.
#[derive(Debug)]
pub struct CustomCohortRegistry {
	store: Arc<dyn KeyValueStore>,
	key: String,
	state: Mutex<RegistryState>,
}

impl CustomCohortRegistry {
	pub fn new(store: Arc<dyn KeyValueStore>, namespace: &Namespace) -> Self {
		Self {
			store,
			key: namespace.key(CRITERIA_KEY),
			state: Mutex::new(RegistryState::default()),
		}
	}

	/// Validates and stores `criteria`, replacing any entry with the same id.
	pub async fn register(&self, criteria: CohortCriteria) -> Result<()> {
		self.register_many(vec![criteria]).await
	}

	/// Validates every entry, then stores all of them. If any entry is
	/// invalid nothing is stored. Later entries win when ids repeat.
	pub async fn register_many(&self, list: Vec<CohortCriteria>) -> Result<()> {
		for criteria in &list {
			criteria.validate()?;
		}

		let mut state = self.state.lock().await;
		self.ensure_loaded(&mut state).await;

		let count = list.len();
		for criteria in list {
			debug!(cohort_id = %criteria.cohort_id, priority = criteria.priority, "Registering custom cohort");
			state.criteria.insert(criteria.cohort_id.clone(), criteria);
		}
		self.persist(&state).await;

		info!(count, total = state.criteria.len(), "Custom cohorts registered");
		Ok(())
	}

	/// Removes `id`. Returns true if it was registered.
	pub async fn unregister(&self, id: &str) -> bool {
		let mut state = self.state.lock().await;
		self.ensure_loaded(&mut state).await;

		let removed = state.criteria.remove(id).is_some();
		if removed {
			self.persist(&state).await;
			info!(cohort_id = %id, "Custom cohort unregistered");
		}
		removed
	}

	/// Registered ids in ascending order.
	pub async fn list(&self) -> Vec<String> {
		let mut state = self.state.lock().await;
		self.ensure_loaded(&mut state).await;
		state.criteria.keys().cloned().collect()
	}

	pub async fn get(&self, id: &str) -> Option<CohortCriteria> {
		let mut state = self.state.lock().await;
		self.ensure_loaded(&mut state).await;
		state.criteria.get(id).cloned()
	}

	/// Ranked ids of the criteria that match, highest priority first.
	pub async fn evaluate(&self, signals: &SignalSnapshot, history: &dyn EventHistory) -> Vec<String> {
		self.evaluate_at(signals, history, Utc::now()).await
	}

	pub async fn evaluate_at(
		&self,
		signals: &SignalSnapshot,
		history: &dyn EventHistory,
		now: DateTime<Utc>,
	) -> Vec<String> {
		let mut state = self.state.lock().await;
		self.ensure_loaded(&mut state).await;

		let matches = evaluate_criteria(state.criteria.values(), signals, history, now);
		debug!(
			registered = state.criteria.len(),
			matched = matches.len(),
			"Evaluated custom cohorts"
		);
		matches
	}

	async fn ensure_loaded(&self, state: &mut RegistryState) {
		if state.loaded {
			return;
		}
		state.loaded = true;

		match load_json::<BTreeMap<String, CohortCriteria>>(self.store.as_ref(), &self.key).await {
			Ok(Some(stored)) => {
				// Entries edited on disk are re-checked; invalid ones are skipped.
				for (id, criteria) in stored {
					match criteria.validate() {
						Ok(()) if criteria.cohort_id == id => {
							state.criteria.insert(id, criteria);
						}
						Ok(()) => warn!(cohort_id = %id, "Skipping stored criteria with mismatched id"),
						Err(e) => warn!(cohort_id = %id, error = %e, "Skipping invalid stored criteria"),
					}
				}
				debug!(count = state.criteria.len(), "Restored custom cohorts");
			}
			Ok(None) => {}
			Err(e) => warn!(key = %self.key, error = %e, "Failed to restore custom cohorts"),
		}
	}

	async fn persist(&self, state: &RegistryState) {
		if let Err(e) = store_json(self.store.as_ref(), &self.key, &state.criteria).await {
			warn!(key = %self.key, error = %e, "Failed to persist custom cohorts");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::CohortsError;
	use crate::storage::MemoryKeyValueStore;
	use loom_cohorts_core::{CohortRule, InMemoryEventHistory, NoEventHistory, ValidationError};

	fn registry() -> (Arc<MemoryKeyValueStore>, CustomCohortRegistry) {
		let store = Arc::new(MemoryKeyValueStore::new());
		let registry = CustomCohortRegistry::new(store.clone(), &Namespace::for_app("app"));
		(store, registry)
	}

	fn level_at_least(id: &str, level: f64, priority: i32) -> CohortCriteria {
		CohortCriteria::new(
			id,
			vec![CohortRule::SignalThreshold {
				signal: "level_reached".into(),
				min_value: level,
			}],
		)
		.with_priority(priority)
	}

	#[tokio::test]
	async fn register_list_and_unregister() {
		let (_, registry) = registry();
		registry.register(level_at_least("veterans", 20.0, 1)).await.unwrap();
		registry.register(level_at_least("beginners", 1.0, 1)).await.unwrap();

		assert_eq!(registry.list().await, vec!["beginners", "veterans"]);
		assert!(registry.get("veterans").await.is_some());

		assert!(registry.unregister("veterans").await);
		assert!(!registry.unregister("veterans").await);
		assert_eq!(registry.list().await, vec!["beginners"]);
	}

	#[tokio::test]
	async fn invalid_batch_stores_nothing() {
		let (store, registry) = registry();
		let batch = vec![
			level_at_least("good_one", 1.0, 0),
			CohortCriteria::new("Bad-Id", vec![]),
		];

		let err = registry.register_many(batch).await.unwrap_err();
		assert!(matches!(
			err,
			CohortsError::Validation(ValidationError::InvalidCohortId(_))
		));
		assert!(registry.list().await.is_empty());
		assert!(store.keys().await.is_empty());
	}

	#[tokio::test]
	async fn later_duplicates_win_within_a_batch() {
		let (_, registry) = registry();
		registry
			.register_many(vec![
				level_at_least("dup", 1.0, 1),
				level_at_least("dup", 5.0, 9),
			])
			.await
			.unwrap();

		assert_eq!(registry.get("dup").await.unwrap().priority, 9);
	}

	#[tokio::test]
	async fn reregistration_overwrites() {
		let (_, registry) = registry();
		registry.register(level_at_least("tier", 1.0, 1)).await.unwrap();
		registry.register(level_at_least("tier", 50.0, 1)).await.unwrap();

		let signals = SignalSnapshot {
			level_reached: 10,
			..Default::default()
		};
		assert!(registry.evaluate(&signals, &NoEventHistory).await.is_empty());
	}

	#[tokio::test]
	async fn evaluation_ranks_by_priority_then_id() {
		let (_, registry) = registry();
		registry
			.register_many(vec![
				level_at_least("zeta", 1.0, 1),
				level_at_least("alpha", 1.0, 1),
				level_at_least("top", 1.0, 10),
				level_at_least("out_of_reach", 99.0, 100),
			])
			.await
			.unwrap();

		let signals = SignalSnapshot {
			level_reached: 5,
			..Default::default()
		};
		assert_eq!(
			registry.evaluate(&signals, &InMemoryEventHistory::new()).await,
			vec!["top", "alpha", "zeta"]
		);
	}

	#[tokio::test]
	async fn criteria_survive_restart() {
		let (store, registry) = registry();
		registry.register(level_at_least("veterans", 20.0, 3)).await.unwrap();
		drop(registry);

		let restored = CustomCohortRegistry::new(store, &Namespace::for_app("app"));
		assert_eq!(restored.list().await, vec!["veterans"]);
		assert_eq!(restored.get("veterans").await.unwrap().priority, 3);
	}

	#[tokio::test]
	async fn invalid_stored_entries_are_skipped_on_restore() {
		let (store, _) = registry();
		let key = Namespace::for_app("app").key(CRITERIA_KEY);
		let mut stored = BTreeMap::new();
		stored.insert("ok".to_string(), level_at_least("ok", 1.0, 0));
		stored.insert(
			"bad".to_string(),
			level_at_least("bad", 1.0, 0).with_time_window_days(0),
		);
		store_json(store.as_ref(), &key, &stored).await.unwrap();

		let restored = CustomCohortRegistry::new(store, &Namespace::for_app("app"));
		assert_eq!(restored.list().await, vec!["ok"]);
	}
}

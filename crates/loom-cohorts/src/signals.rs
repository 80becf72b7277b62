// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable usage aggregates and snapshot production.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use loom_cohorts_core::{SignalSnapshot, SignalValue, ValidationError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{load_json, store_json, KeyValueStore, Namespace};

const SIGNALS_KEY: &str = "signals";
const SESSION_RETENTION_DAYS: i64 = 30;

/// Anything that can produce a [`SignalSnapshot`] on demand.
#[async_trait]
pub trait SignalProvider: Send + Sync {
	async fn snapshot(&self) -> SignalSnapshot;
}

#[async_trait]
impl SignalProvider for SignalSnapshot {
	async fn snapshot(&self) -> SignalSnapshot {
		self.clone()
	}
}

/// Persisted form of the aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SignalRecord {
	installed_at: Option<DateTime<Utc>>,
	last_session_at: Option<DateTime<Utc>>,
	/// Session start times within the retention window, oldest first.
	recent_sessions: Vec<DateTime<Utc>>,
	session_count: i64,
	completed_sessions: i64,
	total_session_minutes: f64,
	event_count: i64,
	iap_event_count: i64,
	level_reached: i64,
	rewarded_videos_started: i64,
	rewarded_videos_completed: i64,
	tutorial_completed: bool,
	custom: BTreeMap<String, SignalValue>,
}

impl SignalRecord {
	fn prune_sessions(&mut self, now: DateTime<Utc>) {
		let cutoff = now - Duration::days(SESSION_RETENTION_DAYS);
		self.recent_sessions.retain(|at| *at >= cutoff);
	}

	fn sessions_since(&self, since: DateTime<Utc>) -> i64 {
		self.recent_sessions.iter().filter(|at| **at >= since).count() as i64
	}

	fn snapshot(&self, now: DateTime<Utc>) -> SignalSnapshot {
		let days_since = |at: Option<DateTime<Utc>>| at.map(|t| (now - t).num_days().max(0)).unwrap_or(0);
		let days_since_install = days_since(self.installed_at);

		SignalSnapshot {
			session_count: self.session_count,
			session_count_7d: self.sessions_since(now - Duration::days(7)),
			session_count_30d: self.sessions_since(now - Duration::days(30)),
			event_count: self.event_count,
			iap_event_count: self.iap_event_count,
			level_reached: self.level_reached,
			days_since_install,
			days_since_last_session: match self.last_session_at {
				Some(at) => days_since(Some(at)),
				None => days_since_install,
			},
			avg_session_minutes: ratio(self.total_session_minutes, self.completed_sessions),
			rewarded_video_completion_rate: ratio(
				self.rewarded_videos_completed as f64,
				self.rewarded_videos_started,
			),
			total_time_in_app_minutes: self.total_session_minutes,
			tutorial_completed: self.tutorial_completed,
			custom: self.custom.clone(),
		}
	}
}

fn ratio(total: f64, count: i64) -> f64 {
	if count > 0 {
		total / count as f64
	} else {
		0.0
	}
}

/// Durable counters describing app usage on this device.
///
/// Mutated by the host's signal collector through the `record_*` operations;
/// every mutation is persisted before the call returns. Persistence failures
/// are logged and the in-memory record stays authoritative.
#[derive(Debug)]
pub struct SignalStore {
	store: Arc<dyn KeyValueStore>,
	key: String,
	record: Mutex<Option<SignalRecord>>,
}

impl SignalStore {
	pub fn new(store: Arc<dyn KeyValueStore>, namespace: &Namespace) -> Self {
		Self {
			store,
			key: namespace.key(SIGNALS_KEY),
			record: Mutex::new(None),
		}
	}

	async fn update<F>(&self, mutate: F)
	where
		F: FnOnce(&mut SignalRecord),
	{
		let mut guard = self.record.lock().await;
		if guard.is_none() {
			*guard = Some(self.restore().await);
		}
		let record = guard.get_or_insert_with(SignalRecord::default);
		mutate(record);

		if let Err(e) = store_json(self.store.as_ref(), &self.key, &*record).await {
			warn!(key = %self.key, error = %e, "Failed to persist signals");
		}
	}

	async fn restore(&self) -> SignalRecord {
		match load_json::<SignalRecord>(self.store.as_ref(), &self.key).await {
			Ok(Some(record)) => {
				debug!(key = %self.key, "restored signals");
				record
			}
			Ok(None) => SignalRecord::default(),
			Err(e) => {
				warn!(key = %self.key, error = %e, "Failed to restore signals, starting empty");
				SignalRecord::default()
			}
		}
	}

	/// Sets the install date if none is known yet.
	pub async fn record_install(&self, at: DateTime<Utc>) {
		self
			.update(|r| {
				r.installed_at.get_or_insert(at);
			})
			.await;
	}

	pub async fn record_session_start(&self, at: DateTime<Utc>) {
		self
			.update(|r| {
				r.installed_at.get_or_insert(at);
				r.session_count += 1;
				r.last_session_at = Some(r.last_session_at.map_or(at, |last| last.max(at)));
				r.recent_sessions.push(at);
				r.recent_sessions.sort();
				r.prune_sessions(Utc::now());
			})
			.await;
	}

	/// Adds a finished session's length to the totals.
	pub async fn record_session_end(&self, minutes: f64) {
		let minutes = if minutes.is_finite() { minutes.max(0.0) } else { 0.0 };
		self
			.update(|r| {
				r.completed_sessions += 1;
				r.total_session_minutes += minutes;
			})
			.await;
	}

	pub async fn record_event(&self) {
		self.update(|r| r.event_count += 1).await;
	}

	pub async fn record_iap_event(&self) {
		self.update(|r| r.iap_event_count += 1).await;
	}

	/// Levels only move forward; a lower level is ignored.
	pub async fn record_level(&self, level: i64) {
		self.update(|r| r.level_reached = r.level_reached.max(level)).await;
	}

	pub async fn record_rewarded_video(&self, completed: bool) {
		self
			.update(|r| {
				r.rewarded_videos_started += 1;
				if completed {
					r.rewarded_videos_completed += 1;
				}
			})
			.await;
	}

	pub async fn set_tutorial_completed(&self) {
		self.update(|r| r.tutorial_completed = true).await;
	}

	pub async fn set_custom(&self, name: &str, value: impl Into<SignalValue>) -> Result<()> {
		let name = name.trim();
		if name.is_empty() {
			return Err(ValidationError::EmptyName("signal").into());
		}
		let value = value.into();
		self
			.update(|r| {
				r.custom.insert(name.to_string(), value);
			})
			.await;
		Ok(())
	}

	/// Returns true if the signal existed.
	pub async fn remove_custom(&self, name: &str) -> bool {
		let mut removed = false;
		self.update(|r| removed = r.custom.remove(name).is_some()).await;
		removed
	}

	/// Derives an immutable snapshot as of `now`.
	pub async fn snapshot_at(&self, now: DateTime<Utc>) -> SignalSnapshot {
		let mut guard = self.record.lock().await;
		if guard.is_none() {
			*guard = Some(self.restore().await);
		}
		let record = guard.get_or_insert_with(SignalRecord::default);
		record.snapshot(now)
	}
}

#[async_trait]
impl SignalProvider for SignalStore {
	async fn snapshot(&self) -> SignalSnapshot {
		self.snapshot_at(Utc::now()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryKeyValueStore;

	fn store() -> (Arc<MemoryKeyValueStore>, SignalStore) {
		let kv = Arc::new(MemoryKeyValueStore::new());
		let signals = SignalStore::new(kv.clone(), &Namespace::for_app("app"));
		(kv, signals)
	}

	#[tokio::test]
	async fn session_windows_are_derived_from_start_times() {
		let (_, signals) = store();
		let now = Utc::now();

		signals.record_session_start(now - Duration::days(20)).await;
		signals.record_session_start(now - Duration::days(5)).await;
		signals.record_session_start(now - Duration::days(1)).await;
		signals.record_session_end(10.0).await;
		signals.record_session_end(20.0).await;

		let snapshot = signals.snapshot_at(now).await;
		assert_eq!(snapshot.session_count, 3);
		assert_eq!(snapshot.session_count_7d, 2);
		assert_eq!(snapshot.session_count_30d, 3);
		assert_eq!(snapshot.days_since_install, 20);
		assert_eq!(snapshot.days_since_last_session, 1);
		assert_eq!(snapshot.avg_session_minutes, 15.0);
		assert_eq!(snapshot.total_time_in_app_minutes, 30.0);
	}

	#[tokio::test]
	async fn old_sessions_drop_out_of_windows_but_not_lifetime_count() {
		let (_, signals) = store();
		let now = Utc::now();

		signals.record_session_start(now - Duration::days(45)).await;
		signals.record_session_start(now - Duration::days(2)).await;

		let snapshot = signals.snapshot_at(now).await;
		assert_eq!(snapshot.session_count, 2);
		assert_eq!(snapshot.session_count_30d, 1);
		assert_eq!(snapshot.days_since_install, 45);
	}

	#[tokio::test]
	async fn counters_levels_and_rates() {
		let (_, signals) = store();

		signals.record_event().await;
		signals.record_event().await;
		signals.record_iap_event().await;
		signals.record_level(7).await;
		signals.record_level(3).await;
		signals.record_rewarded_video(true).await;
		signals.record_rewarded_video(false).await;
		signals.record_rewarded_video(true).await;
		signals.record_rewarded_video(true).await;
		signals.set_tutorial_completed().await;

		let snapshot = signals.snapshot().await;
		assert_eq!(snapshot.event_count, 2);
		assert_eq!(snapshot.iap_event_count, 1);
		assert_eq!(snapshot.level_reached, 7);
		assert_eq!(snapshot.rewarded_video_completion_rate, 0.75);
		assert!(snapshot.tutorial_completed);
	}

	#[tokio::test]
	async fn custom_signals() {
		let (_, signals) = store();

		signals.set_custom("coins", 250).await.unwrap();
		signals.set_custom("favorite_mode", "arena").await.unwrap();
		assert!(signals.set_custom("  ", 1).await.is_err());

		let snapshot = signals.snapshot().await;
		assert_eq!(snapshot.named("coins"), Some(SignalValue::Int(250)));

		assert!(signals.remove_custom("coins").await);
		assert!(!signals.remove_custom("coins").await);
		assert_eq!(signals.snapshot().await.named("coins"), None);
	}

	#[tokio::test]
	async fn state_survives_restart() {
		let (kv, signals) = store();
		signals.record_level(12).await;
		signals.set_custom("vip", true).await.unwrap();
		drop(signals);

		let restored = SignalStore::new(kv, &Namespace::for_app("app"));
		let snapshot = restored.snapshot().await;
		assert_eq!(snapshot.level_reached, 12);
		assert_eq!(snapshot.named("vip"), Some(SignalValue::Bool(true)));
	}

	#[tokio::test]
	async fn empty_store_yields_zeroed_snapshot() {
		let (_, signals) = store();
		assert_eq!(signals.snapshot().await, SignalSnapshot::default());
	}

	#[tokio::test]
	async fn snapshot_is_a_signal_provider() {
		let fixed = SignalSnapshot {
			level_reached: 4,
			..Default::default()
		};
		assert_eq!(fixed.snapshot().await.level_reached, 4);
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read access to the locally recorded event history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Properties recorded with an event.
pub type EventProperties = BTreeMap<String, PropertyValue>;

/// Event-history collaborator consulted by event-based cohort rules.
///
/// Implementations are owned by the host app (typically backed by its local
/// analytics database). Both lookups only consider events at or after `since`.
pub trait EventHistory: Send + Sync {
	/// Number of `event` occurrences since `since`.
	fn count(&self, event: &str, since: DateTime<Utc>) -> u64;

	/// Number of `event` occurrences since `since` whose properties satisfy
	/// `predicate`.
	fn count_matching(
		&self,
		event: &str,
		since: DateTime<Utc>,
		predicate: &dyn Fn(&EventProperties) -> bool,
	) -> u64;
}

/// History that has never seen an event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEventHistory;

impl EventHistory for NoEventHistory {
	fn count(&self, _event: &str, _since: DateTime<Utc>) -> u64 {
		0
	}

	fn count_matching(
		&self,
		_event: &str,
		_since: DateTime<Utc>,
		_predicate: &dyn Fn(&EventProperties) -> bool,
	) -> u64 {
		0
	}
}

/// One recorded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
	pub name: String,
	#[serde(default)]
	pub properties: EventProperties,
	pub occurred_at: DateTime<Utc>,
}

/// A simple vector-backed history, useful for tests and tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryEventHistory {
	entries: Vec<HistoryEntry>,
}

impl InMemoryEventHistory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(
		&mut self,
		name: impl Into<String>,
		properties: EventProperties,
		occurred_at: DateTime<Utc>,
	) {
		self.entries.push(HistoryEntry {
			name: name.into(),
			properties,
			occurred_at,
		});
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn occurrences<'a>(
		&'a self,
		event: &'a str,
		since: DateTime<Utc>,
	) -> impl Iterator<Item = &'a HistoryEntry> + 'a {
		self
			.entries
			.iter()
			.filter(move |entry| entry.name == event && entry.occurred_at >= since)
	}
}

impl EventHistory for InMemoryEventHistory {
	fn count(&self, event: &str, since: DateTime<Utc>) -> u64 {
		self.occurrences(event, since).count() as u64
	}

	fn count_matching(
		&self,
		event: &str,
		since: DateTime<Utc>,
		predicate: &dyn Fn(&EventProperties) -> bool,
	) -> u64 {
		self
			.occurrences(event, since)
			.filter(|entry| predicate(&entry.properties))
			.count() as u64
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	#[test]
	fn counts_only_events_inside_window() {
		let now = Utc::now();
		let mut history = InMemoryEventHistory::new();
		history.record("purchase", EventProperties::new(), now - Duration::days(40));
		history.record("purchase", EventProperties::new(), now - Duration::days(3));
		history.record("purchase", EventProperties::new(), now);
		history.record("level_up", EventProperties::new(), now);

		assert_eq!(history.count("purchase", now - Duration::days(30)), 2);
		assert_eq!(history.count("purchase", now - Duration::days(60)), 3);
		assert_eq!(history.count("refund", now - Duration::days(60)), 0);
	}

	#[test]
	fn count_matching_applies_predicate() {
		let now = Utc::now();
		let mut history = InMemoryEventHistory::new();
		let gold: EventProperties = [("tier".to_string(), PropertyValue::from("gold"))].into();
		let silver: EventProperties = [("tier".to_string(), PropertyValue::from("silver"))].into();
		history.record("purchase", gold, now);
		history.record("purchase", silver, now);

		let is_gold = |props: &EventProperties| props.get("tier").and_then(|v| v.as_str()) == Some("gold");
		assert_eq!(
			history.count_matching("purchase", now - Duration::days(1), &is_gold),
			1
		);
	}

	#[test]
	fn empty_history_counts_nothing() {
		let since = Utc::now() - Duration::days(1);
		assert_eq!(NoEventHistory.count("purchase", since), 0);
		assert_eq!(NoEventHistory.count_matching("purchase", since, &|_| true), 0);
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation of app-registered [`CohortCriteria`].

use chrono::{DateTime, Duration, Utc};

use crate::criteria::{CohortCriteria, CohortRule};
use crate::history::{EventHistory, EventProperties};
use crate::signal::SignalSnapshot;

struct RuleContext<'a> {
	signals: &'a SignalSnapshot,
	history: &'a dyn EventHistory,
	since: DateTime<Utc>,
}

/// Returns true if every top-level rule of `criteria` matches.
///
/// Event-history lookups are bounded to `now - time_window_days`.
pub fn criteria_matches(
	criteria: &CohortCriteria,
	signals: &SignalSnapshot,
	history: &dyn EventHistory,
	now: DateTime<Utc>,
) -> bool {
	let ctx = RuleContext {
		signals,
		history,
		since: now - Duration::days(i64::from(criteria.time_window_days)),
	};
	criteria.rules.iter().all(|rule| rule_matches(rule, &ctx))
}

/// Evaluates every criteria and returns matching ids, highest priority first.
///
/// Ties keep the iteration order of `criteria`.
pub fn evaluate_criteria<'a, I>(
	criteria: I,
	signals: &SignalSnapshot,
	history: &dyn EventHistory,
	now: DateTime<Utc>,
) -> Vec<String>
where
	I: IntoIterator<Item = &'a CohortCriteria>,
{
	let mut matches: Vec<(&str, i32)> = criteria
		.into_iter()
		.filter(|c| criteria_matches(c, signals, history, now))
		.map(|c| (c.cohort_id.as_str(), c.priority))
		.collect();

	matches.sort_by(|a, b| b.1.cmp(&a.1));
	matches.into_iter().map(|(id, _)| id.to_string()).collect()
}

fn rule_matches(rule: &CohortRule, ctx: &RuleContext<'_>) -> bool {
	match rule {
		CohortRule::EventCount { event, min_count } => {
			ctx.history.count(event, ctx.since) >= u64::from(*min_count)
		}
		CohortRule::EventValue {
			event,
			property,
			equals,
		} => {
			let predicate = |props: &EventProperties| {
				props
					.get(property)
					.is_some_and(|value| value.loosely_equals(equals))
			};
			ctx.history.count_matching(event, ctx.since, &predicate) > 0
		}
		CohortRule::EventValueRange {
			event,
			property,
			min,
			max,
		} => {
			let predicate = |props: &EventProperties| {
				props
					.get(property)
					.and_then(|value| value.as_f64())
					.is_some_and(|v| *min <= v && v <= *max)
			};
			ctx.history.count_matching(event, ctx.since, &predicate) > 0
		}
		CohortRule::SignalThreshold { signal, min_value } => {
			numeric_signal(ctx.signals, signal).is_some_and(|v| v >= *min_value)
		}
		CohortRule::SignalRange { signal, min, max } => {
			numeric_signal(ctx.signals, signal).is_some_and(|v| *min <= v && v <= *max)
		}
		CohortRule::TimeInApp { min_minutes } => {
			ctx.signals.total_time_in_app_minutes >= *min_minutes
		}
		CohortRule::DaysSinceInstall { min_days, max_days } => {
			let days = ctx.signals.days_since_install;
			days >= *min_days && max_days.map_or(true, |max| days <= max)
		}
		CohortRule::DaysSinceLastSession { max_days } => {
			ctx.signals.days_since_last_session <= *max_days
		}
		CohortRule::Combined { rules, require_all } => {
			if *require_all {
				rules.iter().all(|r| rule_matches(r, ctx))
			} else {
				rules.iter().any(|r| rule_matches(r, ctx))
			}
		}
	}
}

fn numeric_signal(signals: &SignalSnapshot, name: &str) -> Option<f64> {
	signals.named(name).and_then(|value| value.as_f64())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::history::{InMemoryEventHistory, NoEventHistory};
	use crate::value::PropertyValue;

	fn purchase(tier: &str, amount: f64) -> EventProperties {
		[
			("tier".to_string(), PropertyValue::from(tier)),
			("amount".to_string(), PropertyValue::from(amount)),
		]
		.into()
	}

	fn buyer_history(now: DateTime<Utc>) -> InMemoryEventHistory {
		let mut history = InMemoryEventHistory::new();
		history.record("purchase", purchase("gold", 19.99), now - Duration::days(2));
		history.record("purchase", purchase("silver", 4.99), now - Duration::days(5));
		history.record("purchase", purchase("gold", 99.0), now - Duration::days(45));
		history
	}

	#[test]
	fn event_count_respects_time_window() {
		let now = Utc::now();
		let history = buyer_history(now);
		let rule = CohortRule::EventCount {
			event: "purchase".into(),
			min_count: 3,
		};

		let monthly = CohortCriteria::new("frequent_buyers", vec![rule.clone()]).with_time_window_days(30);
		assert!(!criteria_matches(&monthly, &SignalSnapshot::default(), &history, now));

		let quarterly = CohortCriteria::new("frequent_buyers", vec![rule]).with_time_window_days(90);
		assert!(criteria_matches(&quarterly, &SignalSnapshot::default(), &history, now));
	}

	#[test]
	fn event_value_and_range_rules() {
		let now = Utc::now();
		let history = buyer_history(now);
		let signals = SignalSnapshot::default();

		let gold = CohortCriteria::new(
			"gold_buyers",
			vec![CohortRule::EventValue {
				event: "purchase".into(),
				property: "tier".into(),
				equals: PropertyValue::from("gold"),
			}],
		);
		assert!(criteria_matches(&gold, &signals, &history, now));

		let big_spend = CohortCriteria::new(
			"big_spenders",
			vec![CohortRule::EventValueRange {
				event: "purchase".into(),
				property: "amount".into(),
				min: 50.0,
				max: 500.0,
			}],
		)
		.with_time_window_days(7);
		assert!(!criteria_matches(&big_spend, &signals, &history, now));
	}

	#[test]
	fn signal_rules_read_the_snapshot() {
		let now = Utc::now();
		let signals = SignalSnapshot {
			level_reached: 12,
			days_since_install: 10,
			days_since_last_session: 1,
			total_time_in_app_minutes: 95.0,
			..Default::default()
		}
		.with_custom("coins", 500);

		let criteria = CohortCriteria::new(
			"mid_game",
			vec![
				CohortRule::SignalThreshold {
					signal: "level_reached".into(),
					min_value: 10.0,
				},
				CohortRule::SignalRange {
					signal: "coins".into(),
					min: 100.0,
					max: 1000.0,
				},
				CohortRule::TimeInApp { min_minutes: 90.0 },
				CohortRule::DaysSinceInstall {
					min_days: 7,
					max_days: Some(14),
				},
				CohortRule::DaysSinceLastSession { max_days: 3 },
			],
		);
		assert!(criteria_matches(&criteria, &signals, &NoEventHistory, now));

		let lapsed = SignalSnapshot {
			days_since_last_session: 9,
			..signals
		};
		assert!(!criteria_matches(&criteria, &lapsed, &NoEventHistory, now));
	}

	#[test]
	fn combined_rules_apply_and_or() {
		let now = Utc::now();
		let signals = SignalSnapshot {
			level_reached: 3,
			..Default::default()
		};
		let children = vec![
			CohortRule::SignalThreshold {
				signal: "level_reached".into(),
				min_value: 50.0,
			},
			CohortRule::SignalThreshold {
				signal: "level_reached".into(),
				min_value: 1.0,
			},
		];

		let any = CohortCriteria::new(
			"any_level",
			vec![CohortRule::Combined {
				rules: children.clone(),
				require_all: false,
			}],
		);
		let all = CohortCriteria::new(
			"all_levels",
			vec![CohortRule::Combined {
				rules: children,
				require_all: true,
			}],
		);

		assert!(criteria_matches(&any, &signals, &NoEventHistory, now));
		assert!(!criteria_matches(&all, &signals, &NoEventHistory, now));
	}

	#[test]
	fn missing_or_non_numeric_signal_does_not_match() {
		let now = Utc::now();
		let signals = SignalSnapshot::default().with_custom("segment", "casual");
		let criteria = CohortCriteria::new(
			"segment_check",
			vec![CohortRule::SignalThreshold {
				signal: "segment".into(),
				min_value: 0.0,
			}],
		);
		assert!(!criteria_matches(&criteria, &signals, &NoEventHistory, now));
	}

	#[test]
	fn ranked_by_priority_with_stable_ties() {
		let now = Utc::now();
		let always = || {
			vec![CohortRule::DaysSinceLastSession { max_days: 365 }]
		};
		let criteria = vec![
			CohortCriteria::new("alpha", always()).with_priority(1),
			CohortCriteria::new("bravo", always()).with_priority(5),
			CohortCriteria::new("charlie", always()).with_priority(1),
		];

		assert_eq!(
			evaluate_criteria(&criteria, &SignalSnapshot::default(), &NoEventHistory, now),
			vec!["bravo", "alpha", "charlie"]
		);
	}
}

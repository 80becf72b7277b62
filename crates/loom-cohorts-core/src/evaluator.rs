// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pure evaluation of a [`RuleSet`] against a [`SignalSnapshot`].

use std::cmp::Ordering;

use crate::rule_set::{
	AdvertiserValue, CohortCondition, CohortDefinition, ConditionOperator, ConditionValue, FieldRef,
	RuleSet,
};
use crate::signal::SignalSnapshot;
use crate::value::{compare_numeric, ScalarValue, SignalValue};

/// A matched cohort with the metadata needed for ranking and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortMatch {
	pub id: String,
	pub priority: i32,
	pub advertiser_value: AdvertiserValue,
}

/// Returns the ids of every cohort in `rules` that `signals` satisfies,
/// highest priority first. Equal priorities keep rule-set order.
pub fn evaluate(rules: &RuleSet, signals: &SignalSnapshot) -> Vec<String> {
	evaluate_detailed(rules, signals)
		.into_iter()
		.map(|m| m.id)
		.collect()
}

/// Like [`evaluate`] but keeps priority and advertiser value.
pub fn evaluate_detailed(rules: &RuleSet, signals: &SignalSnapshot) -> Vec<CohortMatch> {
	let mut matches: Vec<CohortMatch> = rules
		.cohorts
		.iter()
		.filter(|cohort| definition_matches(cohort, signals))
		.map(|cohort| CohortMatch {
			id: cohort.id.clone(),
			priority: cohort.priority,
			advertiser_value: cohort.advertiser_value,
		})
		.collect();

	// `sort_by` is stable, which keeps rule-set order for equal priorities.
	matches.sort_by(|a, b| b.priority.cmp(&a.priority));
	matches
}

fn definition_matches(cohort: &CohortDefinition, signals: &SignalSnapshot) -> bool {
	cohort
		.conditions
		.iter()
		.all(|condition| condition_matches(condition, signals))
}

fn condition_matches(condition: &CohortCondition, signals: &SignalSnapshot) -> bool {
	let actual = match &condition.field {
		FieldRef::Known(field) => signals.field(*field),
		FieldRef::Custom(name) => match signals.custom.get(name) {
			Some(value) => value.clone(),
			None => return false,
		},
	};
	compare(&actual, condition.operator, &condition.value)
}

/// Applies `operator` to a signal value and a rule value.
///
/// Every operator/type combination outside the defined ones yields `false`.
pub(crate) fn compare(actual: &SignalValue, operator: ConditionOperator, expected: &ConditionValue) -> bool {
	match operator {
		ConditionOperator::Eq => scalar(expected).is_some_and(|e| actual.loosely_equals(&e)),
		ConditionOperator::Neq => scalar(expected).is_some_and(|e| same_kind(actual, &e) && !actual.loosely_equals(&e)),
		ConditionOperator::Gt => ordered(actual, expected, Ordering::is_gt),
		ConditionOperator::Gte => ordered(actual, expected, Ordering::is_ge),
		ConditionOperator::Lt => ordered(actual, expected, Ordering::is_lt),
		ConditionOperator::Lte => ordered(actual, expected, Ordering::is_le),
		ConditionOperator::In => match (actual, expected) {
			(ScalarValue::String(s), ConditionValue::StringArray(options)) => options.contains(s),
			_ => false,
		},
		ConditionOperator::Between => match (actual.as_f64(), expected) {
			(Some(value), ConditionValue::NumberArray(bounds)) if bounds.len() == 2 => {
				bounds[0] <= value && value <= bounds[1]
			}
			_ => false,
		},
	}
}

fn scalar(value: &ConditionValue) -> Option<ScalarValue> {
	match value {
		ConditionValue::Bool(b) => Some(ScalarValue::Bool(*b)),
		ConditionValue::Int(i) => Some(ScalarValue::Int(*i)),
		ConditionValue::Double(d) => Some(ScalarValue::Double(*d)),
		ConditionValue::String(s) => Some(ScalarValue::String(s.clone())),
		ConditionValue::StringArray(_) | ConditionValue::NumberArray(_) => None,
	}
}

fn same_kind(a: &ScalarValue, b: &ScalarValue) -> bool {
	(a.is_numeric() && b.is_numeric()) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn ordered(actual: &SignalValue, expected: &ConditionValue, accept: fn(Ordering) -> bool) -> bool {
	scalar(expected)
		.and_then(|e| compare_numeric(actual, &e))
		.is_some_and(accept)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::signal::SignalField;
	use proptest::prelude::*;

	fn condition(field: SignalField, operator: ConditionOperator, value: ConditionValue) -> CohortCondition {
		CohortCondition::new(FieldRef::Known(field), operator, value)
	}

	#[test]
	fn sessions_threshold_cohort_matches() {
		let rules = RuleSet::new(1, "app").with_cohort(
			CohortDefinition::new("weekly_regulars", 10).with_condition(condition(
				SignalField::SessionCount7d,
				ConditionOperator::Gte,
				ConditionValue::Int(5),
			)),
		);
		let signals = SignalSnapshot {
			session_count_7d: 7,
			..Default::default()
		};

		assert_eq!(evaluate(&rules, &signals), vec!["weekly_regulars"]);
	}

	#[test]
	fn higher_priority_is_listed_first() {
		let rules = RuleSet::new(1, "app")
			.with_cohort(CohortDefinition::new("casual", 5))
			.with_cohort(CohortDefinition::new("spender", 10));

		assert_eq!(
			evaluate(&rules, &SignalSnapshot::default()),
			vec!["spender", "casual"]
		);
	}

	#[test]
	fn equal_priorities_keep_rule_set_order() {
		let rules = RuleSet::new(1, "app")
			.with_cohort(CohortDefinition::new("b", 1))
			.with_cohort(CohortDefinition::new("a", 1))
			.with_cohort(CohortDefinition::new("top", 9))
			.with_cohort(CohortDefinition::new("c", 1));

		assert_eq!(
			evaluate(&rules, &SignalSnapshot::default()),
			vec!["top", "b", "a", "c"]
		);
	}

	#[test]
	fn all_conditions_must_hold() {
		let rules = RuleSet::new(1, "app").with_cohort(
			CohortDefinition::new("tutorial_grinders", 1)
				.with_condition(condition(
					SignalField::TutorialCompleted,
					ConditionOperator::Eq,
					ConditionValue::Bool(true),
				))
				.with_condition(condition(
					SignalField::LevelReached,
					ConditionOperator::Gt,
					ConditionValue::Int(10),
				)),
		);
		let mut signals = SignalSnapshot {
			tutorial_completed: true,
			level_reached: 4,
			..Default::default()
		};
		assert!(evaluate(&rules, &signals).is_empty());

		signals.level_reached = 11;
		assert_eq!(evaluate(&rules, &signals), vec!["tutorial_grinders"]);
	}

	#[test]
	fn numeric_comparisons_coerce_int_and_double() {
		let avg = SignalValue::Double(12.5);
		assert!(compare(&avg, ConditionOperator::Gt, &ConditionValue::Int(12)));
		assert!(compare(&avg, ConditionOperator::Lte, &ConditionValue::Double(12.5)));
		assert!(compare(&SignalValue::Int(3), ConditionOperator::Eq, &ConditionValue::Double(3.0)));
		assert!(compare(&SignalValue::Int(3), ConditionOperator::Neq, &ConditionValue::Int(4)));
	}

	#[test]
	fn mismatched_types_never_match() {
		let text = SignalValue::String("5".to_string());
		assert!(!compare(&text, ConditionOperator::Eq, &ConditionValue::Int(5)));
		assert!(!compare(&text, ConditionOperator::Neq, &ConditionValue::Int(5)));
		assert!(!compare(&text, ConditionOperator::Gt, &ConditionValue::Int(1)));
		assert!(!compare(&SignalValue::Bool(true), ConditionOperator::Eq, &ConditionValue::Int(1)));
		assert!(!compare(
			&SignalValue::Int(1),
			ConditionOperator::Eq,
			&ConditionValue::StringArray(vec!["1".into()])
		));
	}

	#[test]
	fn in_requires_string_and_string_array() {
		let options = ConditionValue::StringArray(vec!["arena".into(), "raid".into()]);
		assert!(compare(&SignalValue::String("raid".into()), ConditionOperator::In, &options));
		assert!(!compare(&SignalValue::String("solo".into()), ConditionOperator::In, &options));
		assert!(!compare(&SignalValue::Int(1), ConditionOperator::In, &options));
		assert!(!compare(
			&SignalValue::String("raid".into()),
			ConditionOperator::In,
			&ConditionValue::String("raid".into())
		));
	}

	#[test]
	fn between_is_inclusive_and_needs_two_bounds() {
		let bounds = ConditionValue::NumberArray(vec![1.0, 5.0]);
		assert!(compare(&SignalValue::Int(1), ConditionOperator::Between, &bounds));
		assert!(compare(&SignalValue::Double(5.0), ConditionOperator::Between, &bounds));
		assert!(!compare(&SignalValue::Double(5.01), ConditionOperator::Between, &bounds));
		assert!(!compare(
			&SignalValue::Int(2),
			ConditionOperator::Between,
			&ConditionValue::NumberArray(vec![1.0, 2.0, 3.0])
		));
		assert!(!compare(&SignalValue::String("2".into()), ConditionOperator::Between, &bounds));
	}

	#[test]
	fn missing_custom_signal_does_not_match() {
		let rules = RuleSet::new(1, "app").with_cohort(CohortDefinition::new("vip", 1).with_condition(
			CohortCondition::new(
				FieldRef::custom("vip_tier"),
				ConditionOperator::Gte,
				ConditionValue::Int(2),
			),
		));

		assert!(evaluate(&rules, &SignalSnapshot::default()).is_empty());
		let signals = SignalSnapshot::default().with_custom("vip_tier", 3);
		assert_eq!(evaluate(&rules, &signals), vec!["vip"]);
	}

	#[test]
	fn detailed_output_carries_advertiser_value() {
		let rules = RuleSet::new(1, "app")
			.with_cohort(CohortDefinition::new("whale", 3).with_advertiser_value(AdvertiserValue::Premium));
		let matches = evaluate_detailed(&rules, &SignalSnapshot::default());
		assert_eq!(matches[0].advertiser_value, AdvertiserValue::Premium);
	}

	fn arb_rule_set() -> impl Strategy<Value = RuleSet> {
		prop::collection::vec((-5i32..5, 0i64..20, prop::bool::ANY), 0..24).prop_map(|cohorts| {
			cohorts
				.into_iter()
				.enumerate()
				.fold(RuleSet::new(1, "app"), |rules, (i, (priority, threshold, gated))| {
					let mut cohort = CohortDefinition::new(format!("cohort_{i}"), priority);
					if gated {
						cohort = cohort.with_condition(condition(
							SignalField::SessionCount30d,
							ConditionOperator::Gte,
							ConditionValue::Int(threshold),
						));
					}
					rules.with_cohort(cohort)
				})
		})
	}

	proptest! {
		#[test]
		fn evaluation_is_deterministic(rules in arb_rule_set(), sessions in 0i64..20) {
			let signals = SignalSnapshot { session_count_30d: sessions, ..Default::default() };
			prop_assert_eq!(evaluate(&rules, &signals), evaluate(&rules, &signals));
		}

		#[test]
		fn output_is_ordered_by_priority_then_source_order(rules in arb_rule_set(), sessions in 0i64..20) {
			let signals = SignalSnapshot { session_count_30d: sessions, ..Default::default() };
			let matches = evaluate_detailed(&rules, &signals);
			let position = |id: &str| rules.cohorts.iter().position(|c| c.id == id).unwrap();

			for pair in matches.windows(2) {
				prop_assert!(pair[0].priority >= pair[1].priority);
				if pair[0].priority == pair[1].priority {
					prop_assert!(position(&pair[0].id) < position(&pair[1].id));
				}
			}
		}
	}
}

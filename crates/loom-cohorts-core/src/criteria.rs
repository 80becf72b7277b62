// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! App-registered cohort criteria and their validation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::PropertyValue;

pub const MAX_COHORT_ID_LENGTH: usize = 64;
pub const MAX_TIME_WINDOW_DAYS: u32 = 365;

/// A cohort definition registered by the host app.
///
/// Every top-level rule must match (AND). Event-history rules only look at
/// events from the last `time_window_days` days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortCriteria {
	#[serde(alias = "cohortId")]
	pub cohort_id: String,
	pub rules: Vec<CohortRule>,
	/// Validated but not consulted during evaluation.
	#[serde(default = "default_min_occurrences", alias = "minOccurrences")]
	pub min_occurrences: u32,
	#[serde(default = "default_time_window_days", alias = "timeWindowDays")]
	pub time_window_days: u32,
	#[serde(default)]
	pub priority: i32,
}

fn default_min_occurrences() -> u32 {
	1
}

fn default_time_window_days() -> u32 {
	30
}

impl CohortCriteria {
	pub fn new(cohort_id: impl Into<String>, rules: Vec<CohortRule>) -> Self {
		Self {
			cohort_id: cohort_id.into(),
			rules,
			min_occurrences: default_min_occurrences(),
			time_window_days: default_time_window_days(),
			priority: 0,
		}
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_time_window_days(mut self, days: u32) -> Self {
		self.time_window_days = days;
		self
	}

	pub fn with_min_occurrences(mut self, min: u32) -> Self {
		self.min_occurrences = min;
		self
	}

	/// Checks the whole definition. Nothing about a criteria that fails here
	/// may be stored.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if !validate_cohort_id(&self.cohort_id) {
			return Err(ValidationError::InvalidCohortId(self.cohort_id.clone()));
		}
		if self.rules.is_empty() {
			return Err(ValidationError::EmptyRules {
				cohort_id: self.cohort_id.clone(),
			});
		}
		if self.min_occurrences < 1 {
			return Err(ValidationError::MinOccurrencesOutOfRange(self.min_occurrences));
		}
		if !(1..=MAX_TIME_WINDOW_DAYS).contains(&self.time_window_days) {
			return Err(ValidationError::TimeWindowOutOfRange(self.time_window_days));
		}
		self.rules.iter().try_for_each(CohortRule::validate)
	}
}

/// Returns true if `id` matches `^[a-z][a-z0-9_]*$` and fits the length limit.
pub fn validate_cohort_id(id: &str) -> bool {
	if id.is_empty() || id.len() > MAX_COHORT_ID_LENGTH {
		return false;
	}

	let mut chars = id.chars();
	match chars.next() {
		Some(c) if c.is_ascii_lowercase() => {}
		_ => return false,
	}

	chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A rule in an app-registered criteria tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CohortRule {
	/// The event occurred at least `min_count` times in the window.
	EventCount { event: String, min_count: u32 },
	/// The event occurred with `property == equals` in the window.
	EventValue {
		event: String,
		property: String,
		equals: PropertyValue,
	},
	/// The event occurred with a numeric `property` in `[min, max]`.
	EventValueRange {
		event: String,
		property: String,
		min: f64,
		max: f64,
	},
	SignalThreshold { signal: String, min_value: f64 },
	SignalRange { signal: String, min: f64, max: f64 },
	TimeInApp { min_minutes: f64 },
	DaysSinceInstall {
		min_days: i64,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		max_days: Option<i64>,
	},
	DaysSinceLastSession { max_days: i64 },
	/// AND (`require_all`) or OR over the sub-rules.
	Combined { rules: Vec<CohortRule>, require_all: bool },
}

impl CohortRule {
	pub fn validate(&self) -> Result<(), ValidationError> {
		match self {
			CohortRule::EventCount { event, min_count } => {
				require_name("event", event)?;
				if *min_count == 0 {
					return Err(ValidationError::ZeroMinCount);
				}
				Ok(())
			}
			CohortRule::EventValue { event, property, .. } => {
				require_name("event", event)?;
				require_name("property", property)
			}
			CohortRule::EventValueRange {
				event,
				property,
				min,
				max,
			} => {
				require_name("event", event)?;
				require_name("property", property)?;
				require_range(*min, *max)
			}
			CohortRule::SignalThreshold { signal, .. } => require_name("signal", signal),
			CohortRule::SignalRange { signal, min, max } => {
				require_name("signal", signal)?;
				require_range(*min, *max)
			}
			CohortRule::TimeInApp { .. } | CohortRule::DaysSinceLastSession { .. } => Ok(()),
			CohortRule::DaysSinceInstall { min_days, max_days } => match max_days {
				Some(max) => require_range(*min_days as f64, *max as f64),
				None => Ok(()),
			},
			CohortRule::Combined { rules, .. } => {
				if rules.is_empty() {
					return Err(ValidationError::EmptyCombinedRule);
				}
				rules.iter().try_for_each(CohortRule::validate)
			}
		}
	}
}

fn require_name(kind: &'static str, name: &str) -> Result<(), ValidationError> {
	if name.trim().is_empty() {
		return Err(ValidationError::EmptyName(kind));
	}
	Ok(())
}

fn require_range(min: f64, max: f64) -> Result<(), ValidationError> {
	if min > max || min.is_nan() || max.is_nan() {
		return Err(ValidationError::InvalidRange { min, max });
	}
	Ok(())
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Reasons an app-supplied definition or event is rejected before storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
	#[error("invalid cohort id '{0}': must match ^[a-z][a-z0-9_]*$ and be at most 64 characters")]
	InvalidCohortId(String),

	#[error("cohort '{cohort_id}' has no rules")]
	EmptyRules { cohort_id: String },

	#[error("min_occurrences must be at least 1, got {0}")]
	MinOccurrencesOutOfRange(u32),

	#[error("time_window_days must be between 1 and 365, got {0}")]
	TimeWindowOutOfRange(u32),

	#[error("combined rule has no sub-rules")]
	EmptyCombinedRule,

	#[error("rule references an empty {0} name")]
	EmptyName(&'static str),

	#[error("invalid range: min {min} is greater than max {max}")]
	InvalidRange { min: f64, max: f64 },

	#[error("event_count rule needs min_count of at least 1")]
	ZeroMinCount,

	#[error("invalid event name '{0}'")]
	InvalidEventName(String),

	#[error("event id must not be empty")]
	EmptyEventId,
}

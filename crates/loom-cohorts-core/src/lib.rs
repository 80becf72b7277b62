// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for on-device behavioral cohorts.
//!
//! This crate holds everything that can be computed without I/O:
//!
//! - [`SignalSnapshot`]: an immutable view of locally aggregated usage signals
//! - [`RuleSet`]: the versioned, server-distributed cohort definitions
//! - [`CohortCriteria`]: app-registered definitions with event-history rules
//! - [`evaluate`] / [`evaluate_criteria`]: pure evaluation producing ranked
//!   cohort identifiers
//!
//! Raw signals never leave the device; only the resulting cohort identifiers
//! are handed to the ad-request path.

pub mod criteria;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod matching;
pub mod rule_set;
pub mod signal;
pub mod value;

pub use criteria::{
	validate_cohort_id, CohortCriteria, CohortRule, MAX_COHORT_ID_LENGTH, MAX_TIME_WINDOW_DAYS,
};
pub use error::ValidationError;
pub use evaluator::{evaluate, evaluate_detailed, CohortMatch};
pub use history::{EventHistory, EventProperties, HistoryEntry, InMemoryEventHistory, NoEventHistory};
pub use matching::{criteria_matches, evaluate_criteria};
pub use rule_set::{
	AdvertiserValue, CohortCondition, CohortDefinition, ConditionOperator, ConditionValue, FieldRef,
	RuleSet,
};
pub use signal::{SignalField, SignalSnapshot};
pub use value::{PropertyValue, ScalarValue, SignalValue};

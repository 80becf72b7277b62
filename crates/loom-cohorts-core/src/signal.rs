// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Signal snapshots: the local behavior measurements cohorts are computed from.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::SignalValue;

/// A known, built-in signal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalField {
	/// Lifetime session count.
	SessionCount,
	SessionCount7d,
	SessionCount30d,
	EventCount,
	IapEventCount,
	LevelReached,
	DaysSinceInstall,
	DaysSinceLastSession,
	AvgSessionMinutes,
	RewardedVideoCompletionRate,
	TotalTimeInAppMinutes,
	TutorialCompleted,
}

impl SignalField {
	pub const ALL: [SignalField; 12] = [
		SignalField::SessionCount,
		SignalField::SessionCount7d,
		SignalField::SessionCount30d,
		SignalField::EventCount,
		SignalField::IapEventCount,
		SignalField::LevelReached,
		SignalField::DaysSinceInstall,
		SignalField::DaysSinceLastSession,
		SignalField::AvgSessionMinutes,
		SignalField::RewardedVideoCompletionRate,
		SignalField::TotalTimeInAppMinutes,
		SignalField::TutorialCompleted,
	];

	/// Canonical wire name.
	pub fn as_str(&self) -> &'static str {
		match self {
			SignalField::SessionCount => "session_count",
			SignalField::SessionCount7d => "session_count_7d",
			SignalField::SessionCount30d => "session_count_30d",
			SignalField::EventCount => "event_count",
			SignalField::IapEventCount => "iap_event_count",
			SignalField::LevelReached => "level_reached",
			SignalField::DaysSinceInstall => "days_since_install",
			SignalField::DaysSinceLastSession => "days_since_last_session",
			SignalField::AvgSessionMinutes => "avg_session_minutes",
			SignalField::RewardedVideoCompletionRate => "rewarded_video_completion_rate",
			SignalField::TotalTimeInAppMinutes => "total_time_in_app_minutes",
			SignalField::TutorialCompleted => "tutorial_completed",
		}
	}

	fn camel_case(&self) -> &'static str {
		match self {
			SignalField::SessionCount => "sessionCount",
			SignalField::SessionCount7d => "sessionCount7d",
			SignalField::SessionCount30d => "sessionCount30d",
			SignalField::EventCount => "eventCount",
			SignalField::IapEventCount => "iapEventCount",
			SignalField::LevelReached => "levelReached",
			SignalField::DaysSinceInstall => "daysSinceInstall",
			SignalField::DaysSinceLastSession => "daysSinceLastSession",
			SignalField::AvgSessionMinutes => "avgSessionMinutes",
			SignalField::RewardedVideoCompletionRate => "rewardedVideoCompletionRate",
			SignalField::TotalTimeInAppMinutes => "totalTimeInAppMinutes",
			SignalField::TutorialCompleted => "tutorialCompleted",
		}
	}

	/// Resolves a field by its snake_case or camelCase name.
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|field| field.as_str() == name || field.camel_case() == name)
	}
}

impl fmt::Display for SignalField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Immutable snapshot of the device's usage signals at one point in time.
///
/// Produced once per evaluation call by a signal provider and only ever read
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSnapshot {
	pub session_count: i64,
	pub session_count_7d: i64,
	pub session_count_30d: i64,
	pub event_count: i64,
	pub iap_event_count: i64,
	pub level_reached: i64,
	pub days_since_install: i64,
	pub days_since_last_session: i64,
	pub avg_session_minutes: f64,
	pub rewarded_video_completion_rate: f64,
	pub total_time_in_app_minutes: f64,
	pub tutorial_completed: bool,
	pub custom: BTreeMap<String, SignalValue>,
}

impl SignalSnapshot {
	pub fn with_custom(mut self, name: impl Into<String>, value: impl Into<SignalValue>) -> Self {
		self.custom.insert(name.into(), value.into());
		self
	}

	/// Returns the value of a built-in field.
	pub fn field(&self, field: SignalField) -> SignalValue {
		match field {
			SignalField::SessionCount => SignalValue::Int(self.session_count),
			SignalField::SessionCount7d => SignalValue::Int(self.session_count_7d),
			SignalField::SessionCount30d => SignalValue::Int(self.session_count_30d),
			SignalField::EventCount => SignalValue::Int(self.event_count),
			SignalField::IapEventCount => SignalValue::Int(self.iap_event_count),
			SignalField::LevelReached => SignalValue::Int(self.level_reached),
			SignalField::DaysSinceInstall => SignalValue::Int(self.days_since_install),
			SignalField::DaysSinceLastSession => SignalValue::Int(self.days_since_last_session),
			SignalField::AvgSessionMinutes => SignalValue::Double(self.avg_session_minutes),
			SignalField::RewardedVideoCompletionRate => {
				SignalValue::Double(self.rewarded_video_completion_rate)
			}
			SignalField::TotalTimeInAppMinutes => SignalValue::Double(self.total_time_in_app_minutes),
			SignalField::TutorialCompleted => SignalValue::Bool(self.tutorial_completed),
		}
	}

	/// Looks a signal up by name: built-in fields first, then custom signals.
	pub fn named(&self, name: &str) -> Option<SignalValue> {
		match SignalField::from_name(name) {
			Some(field) => Some(self.field(field)),
			None => self
				.custom
				.get(name.strip_prefix("custom.").unwrap_or(name))
				.cloned(),
		}
	}
}

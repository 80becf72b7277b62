// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-distributed cohort rule sets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::SignalField;

/// A versioned, ordered collection of cohort definitions.
///
/// Rule sets are replaced wholesale; a partially applied rule set never
/// exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
	pub version: i64,
	#[serde(alias = "ownerId")]
	pub owner_id: String,
	#[serde(alias = "updatedAt")]
	pub updated_at: DateTime<Utc>,
	#[serde(default)]
	pub cohorts: Vec<CohortDefinition>,
}

impl RuleSet {
	pub fn new(version: i64, owner_id: impl Into<String>) -> Self {
		Self {
			version,
			owner_id: owner_id.into(),
			updated_at: Utc::now(),
			cohorts: Vec::new(),
		}
	}

	pub fn with_cohort(mut self, cohort: CohortDefinition) -> Self {
		self.cohorts.push(cohort);
		self
	}
}

/// One cohort: all conditions must hold (AND).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
	pub id: String,
	#[serde(default)]
	pub conditions: Vec<CohortCondition>,
	/// Higher priorities are listed first in evaluation output.
	#[serde(default)]
	pub priority: i32,
	#[serde(default, alias = "advertiserValue")]
	pub advertiser_value: AdvertiserValue,
}

impl CohortDefinition {
	pub fn new(id: impl Into<String>, priority: i32) -> Self {
		Self {
			id: id.into(),
			conditions: Vec::new(),
			priority,
			advertiser_value: AdvertiserValue::default(),
		}
	}

	pub fn with_condition(mut self, condition: CohortCondition) -> Self {
		self.conditions.push(condition);
		self
	}

	pub fn with_advertiser_value(mut self, value: AdvertiserValue) -> Self {
		self.advertiser_value = value;
		self
	}
}

/// Monetization tag attached to a cohort by the backend.
///
/// Unrecognised tags deserialize to [`AdvertiserValue::Unknown`] so that a
/// newer backend never makes a rule set unparseable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AdvertiserValue {
	Low,
	Medium,
	High,
	Premium,
	#[default]
	Unknown,
}

impl AdvertiserValue {
	pub fn as_str(&self) -> &'static str {
		match self {
			AdvertiserValue::Low => "low",
			AdvertiserValue::Medium => "medium",
			AdvertiserValue::High => "high",
			AdvertiserValue::Premium => "premium",
			AdvertiserValue::Unknown => "unknown",
		}
	}
}

impl From<String> for AdvertiserValue {
	fn from(value: String) -> Self {
		match value.to_ascii_lowercase().as_str() {
			"low" => AdvertiserValue::Low,
			"medium" => AdvertiserValue::Medium,
			"high" => AdvertiserValue::High,
			"premium" => AdvertiserValue::Premium,
			_ => AdvertiserValue::Unknown,
		}
	}
}

impl From<AdvertiserValue> for String {
	fn from(value: AdvertiserValue) -> Self {
		value.as_str().to_string()
	}
}

/// A single comparison between a signal and a rule value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortCondition {
	pub field: FieldRef,
	pub operator: ConditionOperator,
	pub value: ConditionValue,
}

impl CohortCondition {
	pub fn new(field: FieldRef, operator: ConditionOperator, value: ConditionValue) -> Self {
		Self {
			field,
			operator,
			value,
		}
	}
}

/// Reference to either a built-in signal field or a named custom signal.
///
/// On the wire this is a plain string. Known field names (snake_case or
/// camelCase) resolve to [`FieldRef::Known`]; `custom.`-prefixed names and any
/// other name resolve to [`FieldRef::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldRef {
	Known(SignalField),
	Custom(String),
}

impl FieldRef {
	pub fn custom(name: impl Into<String>) -> Self {
		FieldRef::Custom(name.into())
	}
}

impl From<SignalField> for FieldRef {
	fn from(field: SignalField) -> Self {
		FieldRef::Known(field)
	}
}

impl From<String> for FieldRef {
	fn from(name: String) -> Self {
		if let Some(custom) = name.strip_prefix("custom.") {
			return FieldRef::Custom(custom.to_string());
		}
		match SignalField::from_name(&name) {
			Some(field) => FieldRef::Known(field),
			None => FieldRef::Custom(name),
		}
	}
}

impl From<FieldRef> for String {
	fn from(field: FieldRef) -> Self {
		field.to_string()
	}
}

impl fmt::Display for FieldRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldRef::Known(field) => f.write_str(field.as_str()),
			FieldRef::Custom(name) => write!(f, "custom.{name}"),
		}
	}
}

/// Comparison operators available to server-defined conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
	Eq,
	Neq,
	Gt,
	Gte,
	Lt,
	Lte,
	In,
	Between,
}

/// The right-hand side of a condition.
///
/// `NumberArray` carries the `[min, max]` bounds of `between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
	Bool(bool),
	Int(i64),
	Double(f64),
	String(String),
	StringArray(Vec<String>),
	NumberArray(Vec<f64>),
}

impl From<i64> for ConditionValue {
	fn from(value: i64) -> Self {
		ConditionValue::Int(value)
	}
}

impl From<f64> for ConditionValue {
	fn from(value: f64) -> Self {
		ConditionValue::Double(value)
	}
}

impl From<bool> for ConditionValue {
	fn from(value: bool) -> Self {
		ConditionValue::Bool(value)
	}
}

impl From<&str> for ConditionValue {
	fn from(value: &str) -> Self {
		ConditionValue::String(value.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const RULE_SET_JSON: &str = r#"{
		"version": 3,
		"ownerId": "app_123",
		"updatedAt": "2025-06-01T12:00:00Z",
		"cohorts": [
			{
				"id": "engaged_players",
				"priority": 10,
				"advertiserValue": "high",
				"conditions": [
					{"field": "sessionCount7d", "operator": "gte", "value": 5},
					{"field": "custom.favorite_mode", "operator": "in", "value": ["arena", "raid"]},
					{"field": "avg_session_minutes", "operator": "between", "value": [2.5, 30]}
				]
			},
			{
				"id": "whales",
				"priority": 20,
				"advertiser_value": "platinum",
				"conditions": [
					{"field": "iap_event_count", "operator": "gt", "value": 3}
				]
			}
		]
	}"#;

	#[test]
	fn parses_server_rule_set() {
		let rules: RuleSet = serde_json::from_str(RULE_SET_JSON).unwrap();
		assert_eq!(rules.version, 3);
		assert_eq!(rules.owner_id, "app_123");
		assert_eq!(rules.cohorts.len(), 2);

		let engaged = &rules.cohorts[0];
		assert_eq!(engaged.advertiser_value, AdvertiserValue::High);
		assert_eq!(
			engaged.conditions[0].field,
			FieldRef::Known(SignalField::SessionCount7d)
		);
		assert_eq!(engaged.conditions[0].value, ConditionValue::Int(5));
		assert_eq!(
			engaged.conditions[1].field,
			FieldRef::Custom("favorite_mode".to_string())
		);
		assert_eq!(
			engaged.conditions[1].value,
			ConditionValue::StringArray(vec!["arena".into(), "raid".into()])
		);
		assert_eq!(
			engaged.conditions[2].value,
			ConditionValue::NumberArray(vec![2.5, 30.0])
		);

		assert_eq!(rules.cohorts[1].advertiser_value, AdvertiserValue::Unknown);
	}

	#[test]
	fn unknown_field_names_become_custom_fields() {
		let field = FieldRef::from("coins".to_string());
		assert_eq!(field, FieldRef::Custom("coins".to_string()));
		assert_eq!(field.to_string(), "custom.coins");
	}

	#[test]
	fn rule_set_survives_persistence_format() {
		let rules: RuleSet = serde_json::from_str(RULE_SET_JSON).unwrap();
		let stored = serde_json::to_string(&rules).unwrap();
		let restored: RuleSet = serde_json::from_str(&stored).unwrap();
		assert_eq!(restored, rules);
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Small typed scalar used for custom signals and event properties.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A typed scalar: bool, integer, double or string.
///
/// Serialized untagged, so `true`, `3`, `2.5` and `"gold"` map directly to
/// the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
	Bool(bool),
	Int(i64),
	Double(f64),
	String(String),
}

/// Value of a custom signal in a [`crate::SignalSnapshot`].
pub type SignalValue = ScalarValue;

/// Value of a property attached to an analytics event.
pub type PropertyValue = ScalarValue;

impl ScalarValue {
	/// Returns the numeric value, coercing integers to `f64`.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			ScalarValue::Int(i) => Some(*i as f64),
			ScalarValue::Double(d) => Some(*d),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			ScalarValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			ScalarValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn is_numeric(&self) -> bool {
		matches!(self, ScalarValue::Int(_) | ScalarValue::Double(_))
	}

	/// Equality with int/double coercion. Any other cross-type pair is unequal.
	pub fn loosely_equals(&self, other: &ScalarValue) -> bool {
		match (self, other) {
			(ScalarValue::Bool(a), ScalarValue::Bool(b)) => a == b,
			(ScalarValue::String(a), ScalarValue::String(b)) => a == b,
			(a, b) if a.is_numeric() && b.is_numeric() => {
				compare_numeric(a, b) == Some(Ordering::Equal)
			}
			_ => false,
		}
	}

	/// Short type name used in log output.
	pub fn type_name(&self) -> &'static str {
		match self {
			ScalarValue::Bool(_) => "bool",
			ScalarValue::Int(_) => "int",
			ScalarValue::Double(_) => "double",
			ScalarValue::String(_) => "string",
		}
	}
}

/// Orders two numeric scalars. Integer pairs compare exactly; mixed pairs
/// compare as `f64`. Returns `None` for non-numeric inputs or NaN.
pub(crate) fn compare_numeric(a: &ScalarValue, b: &ScalarValue) -> Option<Ordering> {
	match (a, b) {
		(ScalarValue::Int(x), ScalarValue::Int(y)) => Some(x.cmp(y)),
		_ => a.as_f64()?.partial_cmp(&b.as_f64()?),
	}
}

impl From<bool> for ScalarValue {
	fn from(value: bool) -> Self {
		ScalarValue::Bool(value)
	}
}

impl From<i64> for ScalarValue {
	fn from(value: i64) -> Self {
		ScalarValue::Int(value)
	}
}

impl From<i32> for ScalarValue {
	fn from(value: i32) -> Self {
		ScalarValue::Int(value.into())
	}
}

impl From<f64> for ScalarValue {
	fn from(value: f64) -> Self {
		ScalarValue::Double(value)
	}
}

impl From<&str> for ScalarValue {
	fn from(value: &str) -> Self {
		ScalarValue::String(value.to_string())
	}
}

impl From<String> for ScalarValue {
	fn from(value: String) -> Self {
		ScalarValue::String(value)
	}
}

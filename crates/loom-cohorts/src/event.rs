// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Analytics events awaiting delivery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use loom_cohorts_core::{EventProperties, PropertyValue, ValidationError};
use loom_common_http::Backoff;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an event name in characters.
pub const MAX_EVENT_NAME_LENGTH: usize = 200;

/// An event in the durable queue.
///
/// Identity is `id`. `retry_count` is the only field that changes after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub properties: Option<EventProperties>,
	/// When the event happened.
	pub timestamp: DateTime<Utc>,
	/// When the event entered the queue.
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub retry_count: u32,
}

impl QueuedEvent {
	/// Creates an event with a generated id, stamped now.
	pub fn new(name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: Uuid::new_v4().to_string(),
			name: name.into(),
			properties: None,
			timestamp: now,
			created_at: now,
			retry_count: 0,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = id.into();
		self
	}

	pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = timestamp;
		self
	}

	pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
		self.created_at = created_at;
		self
	}

	pub fn with_properties(mut self, properties: EventProperties) -> Self {
		self.properties = Some(properties);
		self
	}

	pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self
			.properties
			.get_or_insert_with(EventProperties::new)
			.insert(key.into(), value.into());
		self
	}

	pub fn increment_retry(&mut self) {
		self.retry_count = self.retry_count.saturating_add(1);
	}

	/// Time spent in the queue as of `now`.
	pub fn age(&self, now: DateTime<Utc>) -> Duration {
		(now - self.created_at).to_std().unwrap_or(Duration::ZERO)
	}

	/// Delay assigned to this event's next attempt.
	pub fn backoff_delay(&self, backoff: &Backoff) -> Duration {
		backoff.delay(self.retry_count)
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.id.trim().is_empty() {
			return Err(ValidationError::EmptyEventId);
		}
		if !validate_event_name(&self.name) {
			return Err(ValidationError::InvalidEventName(self.name.clone()));
		}
		Ok(())
	}
}

/// Event names must be non-blank, at most [`MAX_EVENT_NAME_LENGTH`]
/// characters and free of control characters.
pub fn validate_event_name(name: &str) -> bool {
	!name.trim().is_empty()
		&& name.chars().count() <= MAX_EVENT_NAME_LENGTH
		&& !name.chars().any(char::is_control)
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capped exponential backoff.

use std::time::Duration;

/// Capped exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
///
/// Unlike [`crate::RetryConfig`] this carries no jitter, so the same attempt
/// number always maps to the same delay. That makes it suitable for
/// bookkeeping that is logged or persisted alongside queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(300),
		}
	}
}

impl Backoff {
	pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
		Self {
			base_delay,
			max_delay,
		}
	}

	/// Returns the delay for the given attempt number (0-based).
	pub fn delay(&self, attempt: u32) -> Duration {
		let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
		self
			.base_delay
			.checked_mul(factor)
			.unwrap_or(self.max_delay)
			.min(self.max_delay)
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-call retry with jittered exponential backoff for transient transport
//! failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::Backoff;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts including the first one.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			jitter: true,
		}
	}
}

impl RetryConfig {
	/// A config that performs exactly one attempt.
	pub fn no_retry() -> Self {
		Self {
			max_attempts: 1,
			..Self::default()
		}
	}

	fn delay_for(&self, attempt: u32) -> Duration {
		let capped = Backoff::new(self.base_delay, self.max_delay).delay(attempt);
		if self.jitter {
			capped.mul_f64(0.5 + fastrand::f64())
		} else {
			capped
		}
	}
}

/// Classifies errors that may succeed when the same call is repeated.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() {
			return true;
		}

		self
			.status()
			.map(|status| status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408)
			.unwrap_or(false)
	}
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or
/// `cfg.max_attempts` attempts have been made.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Display,
{
	let max_attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		let err = match f().await {
			Ok(value) => return Ok(value),
			Err(err) => err,
		};
		attempt += 1;

		if !err.is_retryable() {
			debug!(error = %err, attempt, "non-retryable error, giving up");
			return Err(err);
		}

		if attempt >= max_attempts {
			warn!(error = %err, attempt, max_attempts, "retry attempts exhausted");
			return Err(err);
		}

		let delay = cfg.delay_for(attempt - 1);
		debug!(
			error = %err,
			attempt,
			delay_ms = delay.as_millis() as u64,
			"retrying after transient error"
		);
		tokio::time::sleep(delay).await;
	}
}

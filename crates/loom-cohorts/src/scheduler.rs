// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cancellable periodic tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawns background tasks that run a callback on a fixed period until
/// cancelled.
pub struct Ticker;

impl Ticker {
	/// Runs `callback` every `period`. With `fire_immediately` the first run
	/// happens right away, otherwise after one period.
	///
	/// A callback that is in progress when the ticker is cancelled runs to
	/// completion; no further runs start.
	pub fn spawn<F, Fut>(
		name: &'static str,
		period: Duration,
		fire_immediately: bool,
		mut callback: F,
	) -> TickerHandle
	where
		F: FnMut() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let period = period.max(MIN_PERIOD);
		let token = CancellationToken::new();
		let cancelled = token.clone();

		let handle = tokio::spawn(async move {
			let start = if fire_immediately {
				Instant::now()
			} else {
				Instant::now() + period
			};
			let mut interval = time::interval_at(start, period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

			debug!(ticker = name, period_ms = period.as_millis() as u64, "ticker started");
			loop {
				tokio::select! {
					biased;
					_ = cancelled.cancelled() => break,
					_ = interval.tick() => callback().await,
				}
			}
			debug!(ticker = name, "ticker stopped");
		});

		TickerHandle {
			name,
			token,
			handle: Some(handle),
		}
	}
}

/// Owner of a running [`Ticker`] task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TickerHandle {
	name: &'static str,
	token: CancellationToken,
	handle: Option<JoinHandle<()>>,
}

impl TickerHandle {
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Requests cancellation without waiting.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Cancels the task and waits for it to finish.
	pub async fn join(mut self) {
		self.token.cancel();
		if let Some(handle) = self.handle.take() {
			if let Err(e) = handle.await {
				if e.is_panic() {
					warn!(ticker = self.name, error = %e, "ticker task panicked");
				}
			}
		}
	}
}

impl Drop for TickerHandle {
	fn drop(&mut self) {
		self.token.cancel();
	}
}

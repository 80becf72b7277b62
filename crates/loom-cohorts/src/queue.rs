// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable, connectivity-aware event queue.
//!
//! Events are persisted on every change and delivered oldest-first in
//! batches. Three triggers call [`DurableEventQueue::flush`]: the periodic
//! ticker, a connectivity-regained transition, and an enqueue that reaches
//! the batch size while connected.
//!
//! A failed batch increments the retry count of each of its events; an
//! event is discarded once its retry count reaches `max_retries`, so no
//! event is sent more than `max_retries` times. The per-event backoff delay
//! is computed and logged but does not hold events back: resend cadence is
//! set by the ticker and connectivity transitions.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use loom_common_http::Backoff;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::connectivity::{ConnectionStatus, ConnectivityMonitor};
use crate::error::{DeliveryError, Result};
use crate::event::QueuedEvent;
use crate::scheduler::{Ticker, TickerHandle};
use crate::storage::{load_json, store_json, KeyValueStore, Namespace};

const QUEUE_KEY: &str = "event_queue";

/// Configuration for the event queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
	/// Maximum number of events per send.
	pub batch_size: usize,
	/// Maximum number of pending events; the oldest are dropped beyond it.
	pub max_queue_size: usize,
	/// Failed attempts after which an event is discarded.
	pub max_retries: u32,
	/// Pending events older than this are discarded.
	pub max_event_age: Duration,
	/// Interval of the periodic flush.
	pub flush_interval: Duration,
	pub backoff: Backoff,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			batch_size: 20,
			max_queue_size: 1000,
			max_retries: 5,
			max_event_age: Duration::from_secs(7 * 24 * 60 * 60),
			flush_interval: Duration::from_secs(60),
			backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(300)),
		}
	}
}

/// Delivers a batch of events to the backend.
#[async_trait]
pub trait EventSender: Send + Sync {
	async fn send(&self, events: &[QueuedEvent]) -> std::result::Result<(), DeliveryError>;
}

/// What a single `flush` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
	/// Events delivered.
	pub sent: usize,
	/// Events in the batch that failed.
	pub failed: usize,
	/// Events removed because of age or the retry cap.
	pub discarded: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
	pub pending: usize,
	pub oldest_event_age: Option<Duration>,
	/// Failed delivery attempts, summed over events, since the process
	/// started.
	pub total_retries: u64,
	pub total_sent: u64,
	pub total_discarded: u64,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub last_sync_succeeded: Option<bool>,
}

#[derive(Debug, Default)]
struct QueueState {
	events: VecDeque<QueuedEvent>,
	loaded: bool,
	total_retries: u64,
	total_sent: u64,
	total_discarded: u64,
	last_sync_at: Option<DateTime<Utc>>,
	last_sync_succeeded: Option<bool>,
}

struct QueueTasks {
	ticker: TickerHandle,
	listener_guard: DropGuard,
	listener: JoinHandle<()>,
}

struct QueueInner {
	config: QueueConfig,
	sender: Arc<dyn EventSender>,
	store: Arc<dyn KeyValueStore>,
	key: String,
	connectivity: ConnectivityMonitor,
	state: Mutex<QueueState>,
	tasks: Mutex<Option<QueueTasks>>,
	/// Flushes spawned by `enqueue`; `stop` waits for them.
	triggered: Mutex<Vec<JoinHandle<()>>>,
}

/// Persisted FIFO of analytics events with bounded size, age and retries.
///
/// Cloning is cheap; clones share one queue.
#[derive(Clone)]
pub struct DurableEventQueue {
	inner: Arc<QueueInner>,
}

impl DurableEventQueue {
	pub fn new(
		config: QueueConfig,
		sender: Arc<dyn EventSender>,
		store: Arc<dyn KeyValueStore>,
		namespace: &Namespace,
		connectivity: ConnectivityMonitor,
	) -> Self {
		Self {
			inner: Arc::new(QueueInner {
				config,
				sender,
				store,
				key: namespace.key(QUEUE_KEY),
				connectivity,
				state: Mutex::new(QueueState::default()),
				tasks: Mutex::new(None),
				triggered: Mutex::new(Vec::new()),
			}),
		}
	}

	fn from_inner(inner: Arc<QueueInner>) -> Self {
		Self { inner }
	}

	pub fn config(&self) -> &QueueConfig {
		&self.inner.config
	}

	/// Loads persisted events, drops expired ones, starts the flush ticker and
	/// the connectivity listener, then flushes if already connected.
	/// Calling `start` on a running queue does nothing.
	pub async fn start(&self) {
		let mut tasks = self.inner.tasks.lock().await;
		if tasks.is_some() {
			return;
		}

		{
			let mut state = self.inner.state.lock().await;
			self.ensure_loaded(&mut state).await;
			if self.prune_expired(&mut state, Utc::now()) > 0 {
				self.persist(&state).await;
			}
		}

		let weak = Arc::downgrade(&self.inner);
		let ticker = Ticker::spawn("event-queue-flush", self.inner.config.flush_interval, false, move || {
			let weak = weak.clone();
			async move {
				if let Some(inner) = weak.upgrade() {
					DurableEventQueue::from_inner(inner).flush().await;
				}
			}
		});

		// Subscribe before spawning so a transition reported while the task is
		// not yet polled still counts against this baseline.
		let updates = self.inner.connectivity.updates();
		let listener_token = CancellationToken::new();
		let listener = tokio::spawn(run_connectivity_listener(
			Arc::downgrade(&self.inner),
			Box::pin(updates),
			listener_token.clone(),
		));

		*tasks = Some(QueueTasks {
			ticker,
			listener_guard: listener_token.drop_guard(),
			listener,
		});
		drop(tasks);

		info!(
			flush_interval_secs = self.inner.config.flush_interval.as_secs(),
			batch_size = self.inner.config.batch_size,
			max_queue_size = self.inner.config.max_queue_size,
			"Event queue started"
		);

		if self.inner.connectivity.is_connected() {
			self.flush().await;
		}
	}

	/// Queues `event` for delivery.
	///
	/// Returns false without changing anything if an event with the same id
	/// is already queued. Invalid events are rejected before storage.
	pub async fn enqueue(&self, event: QueuedEvent) -> Result<bool> {
		event.validate()?;

		let should_flush = {
			let mut state = self.inner.state.lock().await;
			self.ensure_loaded(&mut state).await;

			if state.events.iter().any(|queued| queued.id == event.id) {
				debug!(event_id = %event.id, "Ignoring duplicate event");
				return Ok(false);
			}

			debug!(event_id = %event.id, name = %event.name, "Queued event");
			state.events.push_back(event);

			while state.events.len() > self.inner.config.max_queue_size {
				if let Some(dropped) = state.events.pop_front() {
					state.total_discarded += 1;
					warn!(
						event_id = %dropped.id,
						name = %dropped.name,
						"Dropped event due to queue overflow"
					);
				}
			}
			self.persist(&state).await;

			state.events.len() >= self.inner.config.batch_size && self.inner.connectivity.is_connected()
		};

		if should_flush {
			let queue = self.clone();
			let handle = tokio::spawn(async move {
				queue.flush().await;
			});
			let mut triggered = self.inner.triggered.lock().await;
			triggered.retain(|pending| !pending.is_finished());
			triggered.push(handle);
		}

		Ok(true)
	}

	/// Sends pending events, oldest first.
	///
	/// Does nothing while disconnected. Sends one batch of up to
	/// `batch_size` events, then keeps going while a full batch remains; a
	/// trailing partial batch waits for the next trigger. The first failed
	/// batch ends the call.
	pub async fn flush(&self) -> FlushOutcome {
		let mut outcome = FlushOutcome::default();
		if !self.inner.connectivity.is_connected() {
			debug!("Skipping flush while offline");
			return outcome;
		}

		let mut state = self.inner.state.lock().await;
		self.ensure_loaded(&mut state).await;

		outcome.discarded += self.prune_expired(&mut state, Utc::now());
		if outcome.discarded > 0 {
			self.persist(&state).await;
		}

		let batch_size = self.inner.config.batch_size.max(1);
		let mut first = true;
		while !state.events.is_empty() && (first || state.events.len() >= batch_size) {
			first = false;
			if !self.inner.connectivity.is_connected() {
				debug!("Connectivity lost during flush");
				break;
			}

			let batch: Vec<QueuedEvent> = state.events.iter().take(batch_size).cloned().collect();
			let ids: HashSet<&str> = batch.iter().map(|event| event.id.as_str()).collect();
			debug!(count = batch.len(), "Sending event batch");

			match self.inner.sender.send(&batch).await {
				Ok(()) => {
					state.events.retain(|event| !ids.contains(event.id.as_str()));
					state.total_sent += batch.len() as u64;
					state.last_sync_at = Some(Utc::now());
					state.last_sync_succeeded = Some(true);
					outcome.sent += batch.len();
					self.persist(&state).await;
				}
				Err(e) => {
					let discarded = self.record_failure(&mut state, &ids);
					outcome.failed += batch.len();
					outcome.discarded += discarded;
					warn!(
						error = %e,
						kind = e.kind(),
						count = batch.len(),
						discarded,
						"Event batch delivery failed"
					);
					self.persist(&state).await;
					break;
				}
			}
		}

		if outcome.sent > 0 {
			info!(sent = outcome.sent, pending = state.events.len(), "Flushed events");
		}
		outcome
	}

	/// Increments retries for the failed batch and drops events that hit the
	/// retry cap. Returns the number dropped.
	fn record_failure(&self, state: &mut QueueState, failed: &HashSet<&str>) -> usize {
		let max_retries = self.inner.config.max_retries;
		let backoff = &self.inner.config.backoff;

		for event in state.events.iter_mut().filter(|e| failed.contains(e.id.as_str())) {
			event.increment_retry();
			debug!(
				event_id = %event.id,
				retry_count = event.retry_count,
				backoff_ms = event.backoff_delay(backoff).as_millis() as u64,
				"Event delivery will be retried"
			);
		}
		state.total_retries += failed.len() as u64;
		state.last_sync_at = Some(Utc::now());
		state.last_sync_succeeded = Some(false);

		let before = state.events.len();
		state.events.retain(|event| {
			let keep = event.retry_count < max_retries;
			if !keep {
				warn!(
					event_id = %event.id,
					name = %event.name,
					retry_count = event.retry_count,
					"Discarding event after max retries"
				);
			}
			keep
		});
		let discarded = before - state.events.len();
		state.total_discarded += discarded as u64;
		discarded
	}

	pub async fn stats(&self) -> QueueStats {
		let mut state = self.inner.state.lock().await;
		self.ensure_loaded(&mut state).await;

		let now = Utc::now();
		QueueStats {
			pending: state.events.len(),
			oldest_event_age: state.events.iter().map(|event| event.age(now)).max(),
			total_retries: state.total_retries,
			total_sent: state.total_sent,
			total_discarded: state.total_discarded,
			last_sync_at: state.last_sync_at,
			last_sync_succeeded: state.last_sync_succeeded,
		}
	}

	/// Copy of the pending events, oldest first.
	pub async fn pending(&self) -> Vec<QueuedEvent> {
		let mut state = self.inner.state.lock().await;
		self.ensure_loaded(&mut state).await;
		state.events.iter().cloned().collect()
	}

	/// Drops every pending event.
	pub async fn clear(&self) {
		let mut state = self.inner.state.lock().await;
		self.ensure_loaded(&mut state).await;
		let cleared = state.events.len();
		state.events.clear();
		self.persist(&state).await;
		info!(cleared, "Event queue cleared");
	}

	/// Stops background tasks, waits for flushes triggered by `enqueue`, and
	/// persists the queue. Safe to call without `start` and more than once.
	pub async fn stop(&self) {
		let tasks = self.inner.tasks.lock().await.take();
		if let Some(QueueTasks {
			ticker,
			listener_guard,
			listener,
		}) = tasks
		{
			drop(listener_guard);
			if let Err(e) = listener.await {
				if e.is_panic() {
					error!(error = %e, "Connectivity listener panicked");
				}
			}
			ticker.join().await;
		}

		let triggered = std::mem::take(&mut *self.inner.triggered.lock().await);
		for handle in triggered {
			if let Err(e) = handle.await {
				if e.is_panic() {
					error!(error = %e, "Triggered flush panicked");
				}
			}
		}

		let state = self.inner.state.lock().await;
		if state.loaded {
			self.persist(&state).await;
		}
		info!(pending = state.events.len(), "Event queue stopped");
	}

	async fn ensure_loaded(&self, state: &mut QueueState) {
		if state.loaded {
			return;
		}
		state.loaded = true;

		match load_json::<VecDeque<QueuedEvent>>(self.inner.store.as_ref(), &self.inner.key).await {
			Ok(Some(stored)) => {
				let mut seen = HashSet::new();
				for event in stored {
					if seen.insert(event.id.clone()) {
						state.events.push_back(event);
					}
				}
				while state.events.len() > self.inner.config.max_queue_size {
					state.events.pop_front();
					state.total_discarded += 1;
				}
				debug!(pending = state.events.len(), "Restored event queue");
			}
			Ok(None) => {}
			Err(e) => warn!(key = %self.inner.key, error = %e, "Failed to restore event queue"),
		}
	}

	fn prune_expired(&self, state: &mut QueueState, now: DateTime<Utc>) -> usize {
		let max_age = self.inner.config.max_event_age;
		let before = state.events.len();
		state.events.retain(|event| {
			let keep = event.age(now) <= max_age;
			if !keep {
				warn!(event_id = %event.id, name = %event.name, "Discarding expired event");
			}
			keep
		});
		let pruned = before - state.events.len();
		state.total_discarded += pruned as u64;
		pruned
	}

	async fn persist(&self, state: &QueueState) {
		if let Err(e) = store_json(self.inner.store.as_ref(), &self.inner.key, &state.events).await {
			warn!(key = %self.inner.key, error = %e, "Failed to persist event queue");
		}
	}
}

async fn run_connectivity_listener(
	queue: Weak<QueueInner>,
	mut updates: Pin<Box<dyn Stream<Item = ConnectionStatus> + Send>>,
	cancelled: CancellationToken,
) {
	loop {
		tokio::select! {
			biased;
			_ = cancelled.cancelled() => break,
			status = updates.next() => match status {
				Some(ConnectionStatus::Connected) => {
					let Some(inner) = queue.upgrade() else {
						break;
					};
					info!("Connectivity regained, flushing events");
					DurableEventQueue::from_inner(inner).flush().await;
				}
				Some(_) => {}
				None => break,
			},
		}
	}
	debug!("Connectivity listener stopped");
}

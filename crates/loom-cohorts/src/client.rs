// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring of the SDK components for one app.

use std::sync::Arc;

use loom_cohorts_core::{EventHistory, EventProperties};
use tracing::info;

use crate::config::CohortsConfig;
use crate::connectivity::{ConnectivityMonitor, TcpPathProbe};
use crate::delivery::HttpEventSender;
use crate::engine::CohortEngine;
use crate::error::Result;
use crate::event::QueuedEvent;
use crate::fetch::{HttpRuleFetcher, RuleFetcher};
use crate::queue::{DurableEventQueue, EventSender};
use crate::registry::CustomCohortRegistry;
use crate::rule_cache::RuleCache;
use crate::signals::SignalStore;
use crate::storage::{FileKeyValueStore, KeyValueStore, Namespace};

/// All components for one app identity, sharing one store and one
/// connectivity monitor.
///
/// # Example
///
/// ```ignore
/// use loom_cohorts::{CohortsClient, CohortsConfig, CohortsConfigLayer};
/// use loom_cohorts_core::NoEventHistory;
///
/// let config = CohortsConfig::load(None, CohortsConfigLayer::default())?;
/// let client = CohortsClient::from_config(config)?;
/// client.start().await;
///
/// client.track("level_complete", None).await?;
/// let cohorts = client.cohorts(&NoEventHistory).await;
///
/// client.shutdown().await;
/// ```
pub struct CohortsClient {
	config: CohortsConfig,
	store: Arc<dyn KeyValueStore>,
	connectivity: ConnectivityMonitor,
	signals: Arc<SignalStore>,
	queue: DurableEventQueue,
	engine: CohortEngine,
}

impl CohortsClient {
	/// Builds the production stack: file storage under `storage_dir`, a TCP
	/// reachability probe, and the HTTP fetcher and sender.
	pub fn from_config(config: CohortsConfig) -> Result<Self> {
		config.validate()?;

		let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(&config.storage_dir));
		let probe = Arc::new(TcpPathProbe::new(
			config.probe_address()?,
			config.connectivity.probe_timeout,
		));
		let connectivity = ConnectivityMonitor::new(probe, config.connectivity.clone());

		let http_client = loom_common_http::new_client_with_timeout(config.request_timeout)
			.map_err(crate::error::CohortsError::HttpClient)?;
		let fetcher = Arc::new(HttpRuleFetcher::with_client(
			http_client.clone(),
			&config.base_url,
			config.retry.clone(),
		)?);
		let sender = Arc::new(HttpEventSender::with_client(
			http_client,
			&config.base_url,
			&config.app_key,
		)?);

		info!(
			base_url = %config.base_url,
			storage_dir = %config.storage_dir.display(),
			"Cohorts client initialized"
		);
		Ok(Self::with_parts(config, store, connectivity, fetcher, sender))
	}

	/// Builds the stack from caller-supplied infrastructure.
	pub fn with_parts(
		config: CohortsConfig,
		store: Arc<dyn KeyValueStore>,
		connectivity: ConnectivityMonitor,
		fetcher: Arc<dyn RuleFetcher>,
		sender: Arc<dyn EventSender>,
	) -> Self {
		let namespace = Namespace::for_app(&config.app_key);

		let signals = Arc::new(SignalStore::new(store.clone(), &namespace));
		let rules = Arc::new(RuleCache::new(fetcher, store.clone(), config.rules.clone()));
		let registry = Arc::new(CustomCohortRegistry::new(store.clone(), &namespace));
		let queue = DurableEventQueue::new(
			config.queue.clone(),
			sender,
			store.clone(),
			&namespace,
			connectivity.clone(),
		);
		let engine = CohortEngine::new(
			config.app_key.clone(),
			config.engine.clone(),
			signals.clone(),
			rules,
			registry,
		);

		Self {
			config,
			store,
			connectivity,
			signals,
			queue,
			engine,
		}
	}

	/// Starts connectivity polling and the event queue.
	pub async fn start(&self) {
		self.connectivity.start().await;
		self.queue.start().await;
	}

	/// Stops background work and persists the queue.
	pub async fn shutdown(&self) {
		self.queue.stop().await;
		self.connectivity.stop().await;
		info!("Cohorts client shut down");
	}

	/// Queues an analytics event and counts it toward the event signals.
	/// Returns false if an event with the same id was already queued.
	pub async fn track(&self, name: &str, properties: Option<EventProperties>) -> Result<bool> {
		let mut event = QueuedEvent::new(name);
		if let Some(properties) = properties {
			event = event.with_properties(properties);
		}
		self.track_event(event).await
	}

	pub async fn track_event(&self, event: QueuedEvent) -> Result<bool> {
		let queued = self.queue.enqueue(event).await?;
		if queued {
			self.signals.record_event().await;
		}
		Ok(queued)
	}

	/// Ranked cohort ids for the ad request.
	pub async fn cohorts(&self, history: &dyn EventHistory) -> Vec<String> {
		self.engine.cohorts(history).await
	}

	pub fn config(&self) -> &CohortsConfig {
		&self.config
	}

	pub fn store(&self) -> &Arc<dyn KeyValueStore> {
		&self.store
	}

	pub fn connectivity(&self) -> &ConnectivityMonitor {
		&self.connectivity
	}

	pub fn signals(&self) -> &Arc<SignalStore> {
		&self.signals
	}

	pub fn queue(&self) -> &DurableEventQueue {
		&self.queue
	}

	pub fn engine(&self) -> &CohortEngine {
		&self.engine
	}
}

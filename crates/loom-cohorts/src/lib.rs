// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! On-device behavioral cohorts and durable event delivery.
//!
//! Two independent paths share one key-value store and one connectivity
//! monitor:
//!
//! - **Cohorts**: [`SignalStore`] aggregates usage locally, [`RuleCache`]
//!   keeps the server rule set fresh with conditional fetches, and
//!   [`CustomCohortRegistry`] holds app-defined criteria. [`CohortEngine`]
//!   merges both into a short-lived ranked list of cohort ids.
//! - **Events**: [`DurableEventQueue`] persists analytics events and sends
//!   them in batches through an [`EventSender`] whenever the device is
//!   online, with bounded size, age and retries.
//!
//! [`CohortsClient`] wires everything together from a [`CohortsConfig`].

pub mod client;
pub mod config;
pub mod connectivity;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod event;
pub mod fetch;
pub mod queue;
pub mod registry;
pub mod rule_cache;
pub mod scheduler;
pub mod signals;
pub mod storage;

pub use client::CohortsClient;
pub use config::{default_config_path, CohortsConfig, CohortsConfigLayer, ConfigError};
pub use connectivity::{
	ConnectionInfo, ConnectionStatus, ConnectivityConfig, ConnectivityMonitor, InterfaceKind, PathProbe,
	TcpPathProbe,
};
pub use delivery::HttpEventSender;
pub use engine::{CohortEngine, EngineConfig};
pub use error::{CohortsError, DeliveryError, FetchError, Result, StorageError};
pub use event::{validate_event_name, QueuedEvent, MAX_EVENT_NAME_LENGTH};
pub use fetch::{FetchOutcome, HttpRuleFetcher, RuleFetcher};
pub use queue::{DurableEventQueue, EventSender, FlushOutcome, QueueConfig, QueueStats};
pub use registry::CustomCohortRegistry;
pub use rule_cache::{RuleCache, RuleCacheConfig};
pub use scheduler::{Ticker, TickerHandle};
pub use signals::{SignalProvider, SignalStore};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Namespace};

pub use loom_cohorts_core as core;

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network reachability tracking.
//!
//! The monitor keeps the latest [`ConnectionInfo`] in a `watch` channel. It
//! is fed either by a background poll of a [`PathProbe`] or by the platform
//! pushing updates through [`ConnectivityMonitor::report`].

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::scheduler::{Ticker, TickerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
	Connected,
	Disconnected,
	Unknown,
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ConnectionStatus::Connected => "connected",
			ConnectionStatus::Disconnected => "disconnected",
			ConnectionStatus::Unknown => "unknown",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
	Wifi,
	Cellular,
	Wired,
	Loopback,
	Other,
	None,
}

/// Status plus interface details. The details are informational and never
/// gate delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
	pub status: ConnectionStatus,
	pub interface: InterfaceKind,
	pub is_expensive: bool,
	pub is_constrained: bool,
}

impl ConnectionInfo {
	pub fn unknown() -> Self {
		Self {
			status: ConnectionStatus::Unknown,
			interface: InterfaceKind::None,
			is_expensive: false,
			is_constrained: false,
		}
	}

	pub fn connected(interface: InterfaceKind) -> Self {
		Self {
			status: ConnectionStatus::Connected,
			interface,
			is_expensive: interface == InterfaceKind::Cellular,
			is_constrained: false,
		}
	}

	pub fn disconnected() -> Self {
		Self {
			status: ConnectionStatus::Disconnected,
			interface: InterfaceKind::None,
			is_expensive: false,
			is_constrained: false,
		}
	}

	pub fn with_expensive(mut self, expensive: bool) -> Self {
		self.is_expensive = expensive;
		self
	}

	pub fn with_constrained(mut self, constrained: bool) -> Self {
		self.is_constrained = constrained;
		self
	}
}

impl Default for ConnectionInfo {
	fn default() -> Self {
		Self::unknown()
	}
}

/// Platform path-status primitive.
#[async_trait]
pub trait PathProbe: Send + Sync + fmt::Debug {
	async fn probe(&self) -> ConnectionInfo;
}

/// Probe that treats a successful TCP connect to `target` as connected.
#[derive(Debug, Clone)]
pub struct TcpPathProbe {
	target: String,
	timeout: Duration,
}

impl TcpPathProbe {
	/// `target` is a `host:port` pair.
	pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
		Self {
			target: target.into(),
			timeout,
		}
	}

	pub fn target(&self) -> &str {
		&self.target
	}
}

#[async_trait]
impl PathProbe for TcpPathProbe {
	async fn probe(&self) -> ConnectionInfo {
		match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
			Ok(Ok(stream)) => {
				let loopback = stream
					.peer_addr()
					.map(|addr| addr.ip().is_loopback())
					.unwrap_or(false);
				ConnectionInfo::connected(if loopback {
					InterfaceKind::Loopback
				} else {
					InterfaceKind::Other
				})
			}
			Ok(Err(e)) => {
				debug!(target = %self.target, error = %e, "connectivity probe failed");
				ConnectionInfo::disconnected()
			}
			Err(_) => {
				debug!(target = %self.target, "connectivity probe timed out");
				ConnectionInfo::disconnected()
			}
		}
	}
}

/// Configuration for the probe poll loop.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
	pub poll_interval: Duration,
	pub probe_timeout: Duration,
}

impl Default for ConnectivityConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(15),
			probe_timeout: Duration::from_secs(3),
		}
	}
}

/// Tracks the current connection state and publishes status transitions.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
	inner: Arc<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
	probe: Option<Arc<dyn PathProbe>>,
	config: ConnectivityConfig,
	state: watch::Sender<ConnectionInfo>,
	poller: Mutex<Option<TickerHandle>>,
}

impl MonitorInner {
	fn publish(&self, info: ConnectionInfo) -> bool {
		let mut previous = None;
		let changed = self.state.send_if_modified(|current| {
			if *current == info {
				return false;
			}
			previous = Some(current.status);
			*current = info;
			true
		});

		if let Some(previous) = previous {
			if previous != info.status {
				info!(from = %previous, to = %info.status, interface = ?info.interface, "connectivity changed");
			}
		}
		changed
	}
}

impl ConnectivityMonitor {
	/// Monitor that polls `probe` once started.
	pub fn new(probe: Arc<dyn PathProbe>, config: ConnectivityConfig) -> Self {
		Self::build(Some(probe), config, ConnectionInfo::unknown())
	}

	/// Monitor driven only by [`ConnectivityMonitor::report`].
	pub fn manual(initial: ConnectionInfo) -> Self {
		Self::build(None, ConnectivityConfig::default(), initial)
	}

	fn build(probe: Option<Arc<dyn PathProbe>>, config: ConnectivityConfig, initial: ConnectionInfo) -> Self {
		let (state, _) = watch::channel(initial);
		Self {
			inner: Arc::new(MonitorInner {
				probe,
				config,
				state,
				poller: Mutex::new(None),
			}),
		}
	}

	pub fn current_info(&self) -> ConnectionInfo {
		*self.inner.state.borrow()
	}

	pub fn current_status(&self) -> ConnectionStatus {
		self.current_info().status
	}

	pub fn is_connected(&self) -> bool {
		self.current_status() == ConnectionStatus::Connected
	}

	/// Records a new observation. Returns true if anything changed.
	pub fn report(&self, info: ConnectionInfo) -> bool {
		self.inner.publish(info)
	}

	/// Edge-triggered stream of status transitions.
	///
	/// Yields only when the status differs from the last one seen by this
	/// stream; interface-only changes are skipped. Ends when every monitor
	/// handle has been dropped.
	pub fn updates(&self) -> impl Stream<Item = ConnectionStatus> + Send + 'static {
		let mut rx = self.inner.state.subscribe();
		let last = rx.borrow_and_update().status;

		futures::stream::unfold((rx, last), |(mut rx, last)| async move {
			loop {
				if rx.changed().await.is_err() {
					return None;
				}
				let status = rx.borrow_and_update().status;
				if status != last {
					return Some((status, (rx, status)));
				}
			}
		})
	}

	/// Starts polling the probe. No-op if already started or if the monitor
	/// has no probe.
	pub async fn start(&self) {
		let Some(probe) = self.inner.probe.clone() else {
			return;
		};

		let mut poller = self.inner.poller.lock().await;
		if poller.is_some() {
			return;
		}

		let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
		let handle = Ticker::spawn(
			"connectivity-poll",
			self.inner.config.poll_interval,
			true,
			move || {
				let probe = Arc::clone(&probe);
				let weak = weak.clone();
				async move {
					let info = probe.probe().await;
					if let Some(inner) = weak.upgrade() {
						inner.publish(info);
					}
				}
			},
		);

		info!(
			poll_interval_secs = self.inner.config.poll_interval.as_secs(),
			"connectivity monitor started"
		);
		*poller = Some(handle);
	}

	/// Stops polling. Safe to call repeatedly or without `start`.
	pub async fn stop(&self) {
		let handle = self.inner.poller.lock().await.take();
		if let Some(handle) = handle {
			handle.join().await;
			info!("connectivity monitor stopped");
		}
	}

	/// Resolves true as soon as the status is connected, or false once
	/// `timeout` elapses.
	pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
		let mut rx = self.inner.state.subscribe();
		let connected = tokio::time::timeout(timeout, async move {
			rx.wait_for(|info| info.status == ConnectionStatus::Connected)
				.await
				.is_ok()
		})
		.await;
		matches!(connected, Ok(true))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt;
	use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

	#[derive(Debug, Default)]
	struct ToggleProbe {
		up: AtomicBool,
		calls: AtomicU32,
	}

	#[async_trait]
	impl PathProbe for ToggleProbe {
		async fn probe(&self) -> ConnectionInfo {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.up.load(Ordering::SeqCst) {
				ConnectionInfo::connected(InterfaceKind::Wifi)
			} else {
				ConnectionInfo::disconnected()
			}
		}
	}

	#[test]
	fn report_updates_current_status() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::unknown());
		assert_eq!(monitor.current_status(), ConnectionStatus::Unknown);
		assert!(!monitor.is_connected());

		assert!(monitor.report(ConnectionInfo::connected(InterfaceKind::Cellular)));
		assert!(monitor.is_connected());
		assert!(monitor.current_info().is_expensive);

		assert!(!monitor.report(ConnectionInfo::connected(InterfaceKind::Cellular)));
	}

	#[tokio::test]
	async fn updates_yield_only_status_transitions() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::disconnected());
		let mut updates = Box::pin(monitor.updates());

		monitor.report(ConnectionInfo::disconnected().with_constrained(true));
		monitor.report(ConnectionInfo::connected(InterfaceKind::Wifi));
		assert_eq!(updates.next().await, Some(ConnectionStatus::Connected));

		monitor.report(ConnectionInfo::connected(InterfaceKind::Cellular));
		monitor.report(ConnectionInfo::disconnected());
		assert_eq!(updates.next().await, Some(ConnectionStatus::Disconnected));
	}

	#[tokio::test]
	async fn updates_end_when_monitor_dropped() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::unknown());
		let mut updates = Box::pin(monitor.updates());
		drop(monitor);
		assert_eq!(updates.next().await, None);
	}

	#[tokio::test]
	async fn wait_for_connection_resolves_immediately_when_connected() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::connected(InterfaceKind::Wired));
		assert!(monitor.wait_for_connection(Duration::from_millis(1)).await);
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_connection_times_out() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::disconnected());
		assert!(!monitor.wait_for_connection(Duration::from_secs(5)).await);
	}

	#[tokio::test]
	async fn wait_for_connection_sees_transition() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::disconnected());
		let reporter = monitor.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			reporter.report(ConnectionInfo::connected(InterfaceKind::Wifi));
		});
		assert!(monitor.wait_for_connection(Duration::from_secs(5)).await);
	}

	#[tokio::test(start_paused = true)]
	async fn start_polls_probe_and_is_idempotent() {
		let probe = Arc::new(ToggleProbe::default());
		let config = ConnectivityConfig {
			poll_interval: Duration::from_secs(10),
			probe_timeout: Duration::from_secs(1),
		};
		let monitor = ConnectivityMonitor::new(probe.clone(), config);

		monitor.start().await;
		monitor.start().await;
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
		assert_eq!(monitor.current_status(), ConnectionStatus::Disconnected);

		probe.up.store(true, Ordering::SeqCst);
		tokio::time::sleep(Duration::from_secs(10)).await;
		assert!(monitor.is_connected());
		assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

		monitor.stop().await;
		monitor.stop().await;
		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn stop_without_start_is_safe() {
		let monitor = ConnectivityMonitor::manual(ConnectionInfo::unknown());
		monitor.start().await;
		monitor.stop().await;
	}

	#[tokio::test]
	async fn tcp_probe_detects_listener() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let probe = TcpPathProbe::new(addr.to_string(), Duration::from_secs(1));
		let info = probe.probe().await;
		assert_eq!(info.status, ConnectionStatus::Connected);
		assert_eq!(info.interface, InterfaceKind::Loopback);

		drop(listener);
		let info = probe.probe().await;
		assert_eq!(info.status, ConnectionStatus::Disconnected);
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP delivery of queued events.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_cohorts_core::EventProperties;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{CohortsError, DeliveryError};
use crate::event::QueuedEvent;
use crate::queue::EventSender;

#[derive(Debug, Serialize)]
struct DeliveryPayload<'a> {
	event_id: &'a str,
	name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	properties: Option<&'a EventProperties>,
	timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct DeliveryRequest<'a> {
	app_key: &'a str,
	events: Vec<DeliveryPayload<'a>>,
}

/// Sends batches to `POST {base}/v1/events`.
///
/// Makes exactly one attempt per call. Retries belong to the queue, which
/// counts them against each event's budget.
#[derive(Debug, Clone)]
pub struct HttpEventSender {
	http_client: Client,
	base_url: String,
	app_key: String,
}

impl HttpEventSender {
	pub fn new(base_url: &str, app_key: &str, request_timeout: Duration) -> Result<Self, CohortsError> {
		let http_client = loom_common_http::new_client_with_timeout(request_timeout)
			.map_err(CohortsError::HttpClient)?;
		Self::with_client(http_client, base_url, app_key)
	}

	pub fn with_client(http_client: Client, base_url: &str, app_key: &str) -> Result<Self, CohortsError> {
		let base_url = base_url.trim().trim_end_matches('/');
		if base_url.is_empty() {
			return Err(CohortsError::InvalidBaseUrl);
		}
		if app_key.trim().is_empty() {
			return Err(CohortsError::InvalidAppKey);
		}

		Ok(Self {
			http_client,
			base_url: base_url.to_string(),
			app_key: app_key.to_string(),
		})
	}

	fn events_url(&self) -> String {
		format!("{}/v1/events", self.base_url)
	}
}

#[async_trait]
impl EventSender for HttpEventSender {
	async fn send(&self, events: &[QueuedEvent]) -> Result<(), DeliveryError> {
		let url = self.events_url();
		let request_body = DeliveryRequest {
			app_key: &self.app_key,
			events: events
				.iter()
				.map(|event| DeliveryPayload {
					event_id: &event.id,
					name: &event.name,
					properties: event.properties.as_ref(),
					timestamp: event.timestamp,
				})
				.collect(),
		};

		debug!(url = %url, count = request_body.events.len(), "Sending event batch");

		let response = self
			.http_client
			.post(&url)
			.header(AUTHORIZATION, format!("Bearer {}", self.app_key))
			.json(&request_body)
			.send()
			.await
			.map_err(DeliveryError::Transport)?;

		let status = response.status();
		if status.is_success() {
			return Ok(());
		}

		let retry_after = response
			.headers()
			.get(RETRY_AFTER)
			.and_then(|v| v.to_str().ok())
			.and_then(|s| s.trim().parse().ok());
		let message = response.text().await.unwrap_or_default();
		Err(DeliveryError::from_status(status.as_u16(), message, retry_after))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, Request, ResponseTemplate};

	fn sender(server: &MockServer) -> HttpEventSender {
		HttpEventSender::new(&server.uri(), "key_123", Duration::from_secs(5)).unwrap()
	}

	fn events() -> Vec<QueuedEvent> {
		vec![
			QueuedEvent::new("purchase")
				.with_id("e1")
				.with_property("amount", 4.99),
			QueuedEvent::new("level_up").with_id("e2"),
		]
	}

	#[tokio::test]
	async fn posts_batch_with_bearer_key() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/events"))
			.and(header("Authorization", "Bearer key_123"))
			.respond_with(ResponseTemplate::new(202))
			.expect(1)
			.mount(&server)
			.await;

		sender(&server).send(&events()).await.unwrap();

		let requests: Vec<Request> = server.received_requests().await.unwrap();
		let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
		assert_eq!(body["app_key"], "key_123");
		assert_eq!(body["events"][0]["event_id"], "e1");
		assert_eq!(body["events"][0]["name"], "purchase");
		assert_eq!(body["events"][0]["properties"]["amount"], 4.99);
		assert!(body["events"][0]["timestamp"].is_string());
		assert_eq!(body["events"][1]["event_id"], "e2");
		assert!(body["events"][1].get("properties").is_none());
	}

	#[tokio::test]
	async fn rate_limit_reads_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
			.mount(&server)
			.await;

		match sender(&server).send(&events()).await {
			Err(DeliveryError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, Some(30)),
			other => panic!("expected rate limit, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn classifies_error_statuses() {
		for (status, kind) in [(401, "unauthorized"), (503, "server_error"), (400, "http_error")] {
			let server = MockServer::start().await;
			Mock::given(method("POST"))
				.respond_with(ResponseTemplate::new(status).set_body_string("nope"))
				.expect(1)
				.mount(&server)
				.await;

			let err = sender(&server).send(&events()).await.unwrap_err();
			assert_eq!(err.kind(), kind, "status {status}");
		}
	}

	#[tokio::test]
	async fn unreachable_server_is_transport_error() {
		let sender = HttpEventSender::new("http://127.0.0.1:9", "key", Duration::from_millis(500)).unwrap();
		let err = sender.send(&events()).await.unwrap_err();
		assert_eq!(err.kind(), "transport");
	}

	#[test]
	fn rejects_missing_app_key() {
		assert!(matches!(
			HttpEventSender::new("https://ads.example.com", " ", Duration::from_secs(1)),
			Err(CohortsError::InvalidAppKey)
		));
	}
}

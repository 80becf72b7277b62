// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conditional rule-set fetch.

use std::time::Duration;

use async_trait::async_trait;
use loom_cohorts_core::RuleSet;
use loom_common_http::RetryConfig;
use reqwest::header::{ACCEPT, AUTHORIZATION, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{CohortsError, FetchError};

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
	/// The server confirmed the caller's version is current. No data was
	/// transferred.
	Unchanged,
	Updated(RuleSet),
}

/// Source of rule sets.
#[async_trait]
pub trait RuleFetcher: Send + Sync {
	/// Fetches the rule set for `app_key`, passing the locally known version
	/// so the server can answer [`FetchOutcome::Unchanged`].
	async fn fetch(&self, app_key: &str, current_version: Option<i64>) -> Result<FetchOutcome, FetchError>;
}

/// Fetches `GET {base}/v1/cohorts/rules`.
///
/// Transport failures are retried in-call according to the retry config;
/// any HTTP status other than 200 or 304 fails immediately.
#[derive(Debug, Clone)]
pub struct HttpRuleFetcher {
	http_client: Client,
	base_url: String,
	retry_config: RetryConfig,
}

impl HttpRuleFetcher {
	pub fn new(base_url: &str, request_timeout: Duration, retry_config: RetryConfig) -> Result<Self, CohortsError> {
		let http_client = loom_common_http::new_client_with_timeout(request_timeout)
			.map_err(CohortsError::HttpClient)?;
		Self::with_client(http_client, base_url, retry_config)
	}

	pub fn with_client(http_client: Client, base_url: &str, retry_config: RetryConfig) -> Result<Self, CohortsError> {
		let base_url = base_url.trim().trim_end_matches('/');
		if base_url.is_empty() {
			return Err(CohortsError::InvalidBaseUrl);
		}

		Ok(Self {
			http_client,
			base_url: base_url.to_string(),
			retry_config,
		})
	}

	fn rules_url(&self) -> String {
		format!("{}/v1/cohorts/rules", self.base_url)
	}
}

#[async_trait]
impl RuleFetcher for HttpRuleFetcher {
	async fn fetch(&self, app_key: &str, current_version: Option<i64>) -> Result<FetchOutcome, FetchError> {
		let url = self.rules_url();
		debug!(url = %url, current_version = ?current_version, "Fetching cohort rules");

		let response = loom_common_http::retry(&self.retry_config, || async {
			let mut request = self
				.http_client
				.get(&url)
				.header(AUTHORIZATION, format!("Bearer {app_key}"))
				.header(ACCEPT, "application/json");
			if let Some(version) = current_version {
				request = request.header(IF_NONE_MATCH, version.to_string());
			}
			request.send().await
		})
		.await
		.map_err(FetchError::Transport)?;

		match response.status() {
			StatusCode::NOT_MODIFIED => {
				debug!(current_version = ?current_version, "Cohort rules unchanged");
				Ok(FetchOutcome::Unchanged)
			}
			StatusCode::OK => {
				let body = response.bytes().await.map_err(FetchError::Transport)?;
				let rules: RuleSet =
					serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
				debug!(version = rules.version, cohorts = rules.cohorts.len(), "Fetched cohort rules");
				Ok(FetchOutcome::Updated(rules))
			}
			StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
			status => Err(FetchError::Status {
				status: status.as_u16(),
				message: response.text().await.unwrap_or_default(),
			}),
		}
	}
}

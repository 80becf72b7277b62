// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the cohorts SDK.

use loom_cohorts_core::ValidationError;
use loom_common_http::RetryableError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for cohorts operations.
pub type Result<T> = std::result::Result<T, CohortsError>;

/// Top-level cohorts SDK errors.
#[derive(Debug, Error)]
pub enum CohortsError {
	/// An app-supplied definition or event was rejected before storage.
	#[error("validation failed: {0}")]
	Validation(#[from] ValidationError),

	/// No rule set has ever been cached and the refresh failed.
	#[error("no cohort rules available: {0}")]
	NoRulesAvailable(#[source] FetchError),

	#[error("storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("invalid or missing app key")]
	InvalidAppKey,

	#[error("invalid or missing base URL")]
	InvalidBaseUrl,

	/// The HTTP client could not be constructed.
	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[source] reqwest::Error),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
}

/// Durable storage failures. Always logged and treated as non-fatal by the
/// components; in-memory state stays authoritative.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid storage key '{0}'")]
	InvalidKey(String),
}

/// Failures of the conditional rule fetch.
#[derive(Debug, Error)]
pub enum FetchError {
	/// Connection, timeout or body read failure.
	#[error("request failed: {0}")]
	Transport(#[source] reqwest::Error),

	#[error("app key was rejected")]
	Unauthorized,

	#[error("unexpected status ({status}): {message}")]
	Status { status: u16, message: String },

	#[error("failed to parse rule set: {0}")]
	Parse(String),

	/// The server answered "not modified" although no version was sent.
	#[error("server reported no change but no rule set is cached")]
	UnexpectedNotModified,
}

impl RetryableError for FetchError {
	fn is_retryable(&self) -> bool {
		match self {
			FetchError::Transport(e) => e.is_retryable(),
			FetchError::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
			_ => false,
		}
	}
}

/// Failures of a batch delivery, classified by response.
///
/// The queue handles every variant the same way; the classification exists
/// for logging and for callers inspecting a failed send.
#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("app key was rejected")]
	Unauthorized,

	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	#[error("unexpected status ({status}): {message}")]
	Http { status: u16, message: String },

	/// Connection, timeout or body read failure.
	#[error("request failed: {0}")]
	Transport(#[source] reqwest::Error),
}

impl DeliveryError {
	/// Classifies a non-success status code.
	pub fn from_status(status: u16, message: String, retry_after_secs: Option<u64>) -> Self {
		match status {
			401 => DeliveryError::Unauthorized,
			429 => DeliveryError::RateLimited { retry_after_secs },
			500..=599 => DeliveryError::ServerError { status, message },
			_ => DeliveryError::Http { status, message },
		}
	}

	/// Short label used as a structured log field.
	pub fn kind(&self) -> &'static str {
		match self {
			DeliveryError::Unauthorized => "unauthorized",
			DeliveryError::RateLimited { .. } => "rate_limited",
			DeliveryError::ServerError { .. } => "server_error",
			DeliveryError::Http { .. } => "http_error",
			DeliveryError::Transport(_) => "transport",
		}
	}
}

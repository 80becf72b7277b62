// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable key-value storage backends.
//!
//! Every component persists opaque byte values under keys namespaced per app
//! identity, so several apps sharing one device never see each other's rule
//! sets, criteria or queued events.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Minimal durable storage interface.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

	async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

	/// Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a JSON value.
pub async fn load_json<T: DeserializeOwned>(
	store: &dyn KeyValueStore,
	key: &str,
) -> Result<Option<T>, StorageError> {
	match store.get(key).await? {
		Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
		None => Ok(None),
	}
}

/// Encodes and writes a JSON value.
pub async fn store_json<T: Serialize + ?Sized>(
	store: &dyn KeyValueStore,
	key: &str,
	value: &T,
) -> Result<(), StorageError> {
	let bytes = serde_json::to_vec(value)?;
	store.set(key, &bytes).await
}

/// Key prefix for one app identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
	prefix: String,
}

impl Namespace {
	const ROOT: &'static str = "cohorts";

	/// Builds the namespace for `app_key`. Characters that are not safe in a
	/// storage key are replaced with `_`.
	pub fn for_app(app_key: &str) -> Self {
		let app: String = app_key
			.trim()
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
					c
				} else {
					'_'
				}
			})
			.collect();
		let app = if app.is_empty() { "default".to_string() } else { app };

		Self {
			prefix: format!("{}/{app}", Self::ROOT),
		}
	}

	pub fn key(&self, name: &str) -> String {
		format!("{}/{name}", self.prefix)
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}
}

/// Store with one file per key under a root directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash never
/// leaves a half-written value behind. Files are created with 0600
/// permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
	root: PathBuf,
}

impl FileKeyValueStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
		let mut path = self.root.clone();
		let mut segments = 0;

		for segment in key.split('/') {
			let valid = !segment.is_empty()
				&& segment != "."
				&& segment != ".."
				&& segment
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
			if !valid {
				return Err(StorageError::InvalidKey(key.to_string()));
			}
			path.push(segment);
			segments += 1;
		}

		if segments == 0 {
			return Err(StorageError::InvalidKey(key.to_string()));
		}
		Ok(path)
	}
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		let path = self.path_for(key)?;
		match fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
		let path = self.path_for(key)?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await?;
		}

		let mut temp_name = path.as_os_str().to_owned();
		temp_name.push(".tmp");
		let temp_path = PathBuf::from(temp_name);

		let mut file = fs::File::create(&temp_path).await?;
		file.write_all(value).await?;
		file.sync_all().await?;
		drop(file);

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let perms = std::fs::Permissions::from_mode(0o600);
			if let Err(e) = fs::set_permissions(&temp_path, perms).await {
				warn!(path = ?temp_path, error = %e, "Failed to set file permissions to 0600");
			}
		}

		fs::rename(&temp_path, &path).await?;

		debug!(key, bytes = value.len(), "stored value");
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.path_for(key)?;
		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
	values: tokio::sync::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns all stored keys, sorted.
	pub async fn keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.values.read().await.keys().cloned().collect();
		keys.sort();
		keys
	}
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.values.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
		self
			.values
			.write()
			.await
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.values.write().await.remove(key);
		Ok(())
	}
}

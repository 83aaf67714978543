// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable key/value storage for identity and the event queue.
//!
//! The SDK only needs string values under a handful of fixed keys. Hosts with
//! their own persistence layer implement [`DurableStore`]; [`FileStore`] keeps
//! one file per key and [`MemoryStore`] backs tests and ephemeral clients.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tally_core::generate_id;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, TallyError};

/// Keys written by the SDK.
pub mod keys {
	pub const ANONYMOUS_ID: &str = "tally-anonymous-id";
	pub const USER_ID: &str = "tally-user-id";
	pub const EXTERNAL_ID: &str = "tally-external-id";
	/// JSON array of queued event records.
	pub const EVENT_QUEUE: &str = "tally-event-queue";

	pub const ALL: [&str; 4] = [ANONYMOUS_ID, USER_ID, EXTERNAL_ID, EVENT_QUEUE];
}

/// Persistence that survives process restarts.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>>;

	async fn set(&self, key: &str, value: &str) -> Result<()>;

	async fn remove(&self, key: &str) -> Result<()>;

	async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			values.push(self.get(key).await?);
		}
		Ok(values)
	}

	async fn multi_remove(&self, keys: &[&str]) -> Result<()> {
		for key in keys {
			self.remove(key).await?;
		}
		Ok(())
	}
}

/// In-memory store. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of stored keys.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		self
			.entries
			.write()
			.await
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<()> {
		self.entries.write().await.remove(key);
		Ok(())
	}
}

/// File-backed store: one file per key inside a directory.
///
/// Writes go to a uniquely named temporary sibling first and are renamed
/// into place, so a crash mid-write leaves the previous value intact. Writes
/// through one store (and its clones) are serialized.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
	write_lock: Arc<Mutex<()>>,
}

impl FileStore {
	/// Opens (and creates if needed) a store rooted at `dir`.
	pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
		let dir = dir.into();
		tokio::fs::create_dir_all(&dir)
			.await
			.map_err(|e| TallyError::Storage(format!("create {}: {e}", dir.display())))?;
		debug!(dir = %dir.display(), "Opened file store");
		Ok(Self {
			dir,
			write_lock: Arc::new(Mutex::new(())),
		})
	}

	/// Default location: `$XDG_DATA_HOME/tally` (or the platform equivalent).
	pub fn default_dir() -> Option<PathBuf> {
		dirs::data_dir().map(|p| p.join("tally"))
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> Result<PathBuf> {
		if key.is_empty()
			|| !key
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
		{
			return Err(TallyError::Storage(format!("invalid key: {key:?}")));
		}
		Ok(self.dir.join(key))
	}
}

#[async_trait::async_trait]
impl DurableStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let path = self.path_for(key)?;
		match tokio::fs::read_to_string(&path).await {
			Ok(contents) => Ok(Some(contents)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(TallyError::Storage(format!("read {key}: {e}"))),
		}
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		let path = self.path_for(key)?;
		let tmp = self.dir.join(format!("{key}.{}.tmp", generate_id()));

		let _guard = self.write_lock.lock().await;
		if let Err(e) = tokio::fs::write(&tmp, value).await {
			let _ = tokio::fs::remove_file(&tmp).await;
			return Err(TallyError::Storage(format!("write {key}: {e}")));
		}
		tokio::fs::rename(&tmp, &path)
			.await
			.map_err(|e| TallyError::Storage(format!("rename {key}: {e}")))
	}

	async fn remove(&self, key: &str) -> Result<()> {
		let path = self.path_for(key)?;
		let _guard = self.write_lock.lock().await;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(TallyError::Storage(format!("remove {key}: {e}"))),
		}
	}
}

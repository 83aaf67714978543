// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity resolution: anonymous, user and external ids.
//!
//! The resolver is the single owner of identity state. It re-hydrates from
//! the durable store at startup and writes through on every change.

use std::sync::Arc;

use tally_core::{generate_id, is_blank_identity, normalize_identity};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{keys, DurableStore};

/// Snapshot of the current identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityState {
	pub anonymous_id: String,
	pub user_id: Option<String>,
	pub external_id: Option<String>,
}

/// Owns anonymous, user and external ids and their persistence.
pub struct IdentityResolver {
	store: Arc<dyn DurableStore>,
	persist_user_id: bool,
	state: Mutex<IdentityState>,
}

impl IdentityResolver {
	/// Creates a resolver with empty state. Call [`restore`](Self::restore)
	/// before use.
	pub fn new(store: Arc<dyn DurableStore>, persist_user_id: bool) -> Self {
		Self {
			store,
			persist_user_id,
			state: Mutex::new(IdentityState::default()),
		}
	}

	/// Loads identity from the store and guarantees an anonymous id exists.
	///
	/// When user-id persistence is disabled, a previously stored user id is
	/// kept in memory for this process and removed from storage.
	pub async fn restore(&self) -> Result<IdentityState> {
		let values = self
			.store
			.multi_get(&[keys::ANONYMOUS_ID, keys::USER_ID, keys::EXTERNAL_ID])
			.await?;
		let stored = |i: usize| values.get(i).cloned().flatten();

		let mut state = self.state.lock().await;
		state.anonymous_id = stored(0).unwrap_or_default();
		state.user_id = normalize_identity(stored(1).as_deref());
		state.external_id = normalize_identity(stored(2).as_deref());
		self.ensure_anonymous_id(&mut state).await;

		if !self.persist_user_id && stored(1).is_some() {
			debug!("User id storage disabled, removing stored user id");
			self.store.remove(keys::USER_ID).await?;
		}

		Ok(state.clone())
	}

	/// Returns the anonymous id, generating and persisting a new one when the
	/// current value is absent or blank.
	pub async fn get_or_create_anonymous_id(&self) -> String {
		let mut state = self.state.lock().await;
		self.ensure_anonymous_id(&mut state).await
	}

	pub async fn user_id(&self) -> Option<String> {
		self.state.lock().await.user_id.clone()
	}

	pub async fn external_id(&self) -> Option<String> {
		self.state.lock().await.external_id.clone()
	}

	pub async fn snapshot(&self) -> IdentityState {
		self.state.lock().await.clone()
	}

	/// Sets the user id. Persisted unless user-id storage is disabled.
	pub async fn set_user_id(&self, user_id: Option<String>) -> Result<()> {
		let mut state = self.state.lock().await;
		self
			.store_user_id(&mut state, normalize_identity(user_id.as_deref()))
			.await
	}

	/// Sets the external id and persists it.
	pub async fn set_external_id(&self, external_id: Option<String>) -> Result<()> {
		let mut state = self.state.lock().await;
		self
			.store_external_id(&mut state, normalize_identity(external_id.as_deref()))
			.await
	}

	/// Resolves the user id for a call: an explicit value wins, otherwise the
	/// stored value. A changed result is stored.
	pub async fn resolve_user_id(&self, explicit: Option<&str>) -> Option<String> {
		let mut state = self.state.lock().await;
		let resolved = resolve(explicit, state.user_id.as_deref());
		if resolved != state.user_id {
			if let Err(e) = self.store_user_id(&mut state, resolved.clone()).await {
				warn!(error = %e, "Failed to persist user id");
			}
		}
		resolved
	}

	/// Resolves the external id with the same rules as
	/// [`resolve_user_id`](Self::resolve_user_id).
	pub async fn resolve_external_id(&self, explicit: Option<&str>) -> Option<String> {
		let mut state = self.state.lock().await;
		let resolved = resolve(explicit, state.external_id.as_deref());
		if resolved != state.external_id {
			if let Err(e) = self.store_external_id(&mut state, resolved.clone()).await {
				warn!(error = %e, "Failed to persist external id");
			}
		}
		resolved
	}

	/// Clears user and external ids and retires the anonymous id in favour of
	/// a fresh one.
	pub async fn reset(&self) -> Result<String> {
		let mut state = self.state.lock().await;
		*state = IdentityState::default();
		self
			.store
			.multi_remove(&[keys::USER_ID, keys::ANONYMOUS_ID, keys::EXTERNAL_ID])
			.await?;
		Ok(self.ensure_anonymous_id(&mut state).await)
	}

	// Callers hold the state lock across the store write.

	async fn ensure_anonymous_id(&self, state: &mut IdentityState) -> String {
		if !is_blank_identity(&state.anonymous_id) {
			return state.anonymous_id.clone();
		}

		let anonymous_id = generate_id();
		state.anonymous_id = anonymous_id.clone();
		if let Err(e) = self.store.set(keys::ANONYMOUS_ID, &anonymous_id).await {
			warn!(error = %e, "Failed to persist anonymous id");
		}
		info!(anonymous_id = %anonymous_id, "Created anonymous id");
		anonymous_id
	}

	async fn store_user_id(&self, state: &mut IdentityState, user_id: Option<String>) -> Result<()> {
		state.user_id = user_id;
		if !self.persist_user_id {
			return Ok(());
		}
		self.write(keys::USER_ID, state.user_id.as_deref()).await
	}

	async fn store_external_id(
		&self,
		state: &mut IdentityState,
		external_id: Option<String>,
	) -> Result<()> {
		state.external_id = external_id;
		self.write(keys::EXTERNAL_ID, state.external_id.as_deref()).await
	}

	async fn write(&self, key: &str, value: Option<&str>) -> Result<()> {
		match value {
			Some(v) => self.store.set(key, v).await,
			None => self.store.remove(key).await,
		}
	}
}

fn resolve(explicit: Option<&str>, current: Option<&str>) -> Option<String> {
	normalize_identity(explicit).or_else(|| normalize_identity(current))
}

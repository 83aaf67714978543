// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session tracking with inactivity-based expiry.
//!
//! There is no stored "expired" state: expiry is computed on read. Both the
//! read path ([`SessionManager::session_id`]) and the foreground path
//! ([`SessionManager::on_foreground`]) go through [`SessionManager::touch`], so
//! they always agree on the timeout arithmetic.

use std::sync::Arc;
use std::time::Duration;

use tally_core::generate_id;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;

/// A live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
	pub session_id: String,
	/// Epoch milliseconds.
	pub started_at: i64,
	/// Epoch milliseconds.
	pub last_activity: i64,
}

impl SessionState {
	fn is_expired(&self, now: i64, timeout: Duration) -> bool {
		now - self.last_activity > timeout.as_millis() as i64
	}
}

/// Owns the session id lifecycle.
pub struct SessionManager {
	enabled: bool,
	timeout: Duration,
	clock: Arc<dyn Clock>,
	state: Mutex<Option<SessionState>>,
}

impl SessionManager {
	pub fn new(enabled: bool, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
		Self {
			enabled,
			timeout,
			clock,
			state: Mutex::new(None),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Starts a new session and returns its id. Returns `None` when session
	/// tracking is disabled.
	pub async fn start_session(&self) -> Option<String> {
		if !self.enabled {
			return None;
		}
		let mut state = self.state.lock().await;
		Some(self.start_locked(&mut state))
	}

	/// Returns the current session id, rotating it first if the session has
	/// been inactive for longer than the timeout. Every call counts as
	/// activity.
	pub async fn session_id(&self) -> Option<String> {
		self.touch().await.map(|(id, _)| id)
	}

	/// Handles the app returning to the foreground. Returns true when the
	/// session was rotated.
	pub async fn on_foreground(&self) -> bool {
		self.touch().await.is_some_and(|(_, rotated)| rotated)
	}

	/// Whole seconds since the current session started, rounded.
	pub async fn session_duration_secs(&self) -> Option<i64> {
		let state = self.state.lock().await;
		state.as_ref().map(|s| {
			let elapsed = self.clock.now_millis() - s.started_at;
			(elapsed as f64 / 1000.0).round() as i64
		})
	}

	pub async fn snapshot(&self) -> Option<SessionState> {
		self.state.lock().await.clone()
	}

	/// Drops the current session without starting a new one.
	pub async fn clear(&self) {
		*self.state.lock().await = None;
	}

	async fn touch(&self) -> Option<(String, bool)> {
		if !self.enabled {
			return None;
		}
		let now = self.clock.now_millis();
		let mut state = self.state.lock().await;

		let rotated = match state.as_ref() {
			Some(current) if !current.is_expired(now, self.timeout) => false,
			Some(current) => {
				debug!(
					previous = %current.session_id,
					idle_ms = now - current.last_activity,
					"Session expired"
				);
				true
			}
			None => true,
		};
		if rotated {
			self.start_locked(&mut state);
		}

		let current = state.as_mut()?;
		current.last_activity = now;
		Some((current.session_id.clone(), rotated))
	}

	fn start_locked(&self, state: &mut Option<SessionState>) -> String {
		let now = self.clock.now_millis();
		let session_id = generate_id();
		debug!(session_id = %session_id, "Started session");
		*state = Some(SessionState {
			session_id: session_id.clone(),
			started_at: now,
			last_activity: now,
		});
		session_id
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;

	const TIMEOUT: Duration = Duration::from_secs(300);

	fn manager(enabled: bool) -> (Arc<ManualClock>, SessionManager) {
		let clock = Arc::new(ManualClock::new(1_000_000));
		let manager = SessionManager::new(enabled, TIMEOUT, clock.clone());
		(clock, manager)
	}

	#[tokio::test]
	async fn test_disabled_sessions_return_none() {
		let (_clock, manager) = manager(false);
		assert_eq!(manager.start_session().await, None);
		assert_eq!(manager.session_id().await, None);
		assert!(!manager.on_foreground().await);
	}

	#[tokio::test]
	async fn test_session_id_is_stable_within_timeout() {
		let (clock, manager) = manager(true);
		let first = manager.start_session().await.unwrap();

		clock.advance(TIMEOUT.as_millis() as i64);
		assert_eq!(manager.session_id().await.unwrap(), first);

		clock.advance(TIMEOUT.as_millis() as i64);
		assert_eq!(manager.session_id().await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_session_rotates_one_millisecond_past_timeout() {
		let (clock, manager) = manager(true);
		let first = manager.start_session().await.unwrap();

		clock.advance(TIMEOUT.as_millis() as i64 + 1);
		let now = clock.now_millis();

		let second = manager.session_id().await.unwrap();
		assert_ne!(first, second);

		let state = manager.snapshot().await.unwrap();
		assert_eq!(state.started_at, now);
		assert_eq!(state.last_activity, now);
	}

	#[tokio::test]
	async fn test_foreground_uses_same_expiry_rule() {
		let (clock, manager) = manager(true);
		let first = manager.start_session().await.unwrap();

		clock.advance(TIMEOUT.as_millis() as i64);
		assert!(!manager.on_foreground().await);
		assert_eq!(manager.session_id().await.unwrap(), first);

		clock.advance(TIMEOUT.as_millis() as i64 + 1);
		assert!(manager.on_foreground().await);
		assert_ne!(manager.session_id().await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_access_updates_last_activity() {
		let (clock, manager) = manager(true);
		manager.start_session().await;
		clock.advance(1_234);
		manager.session_id().await;

		let state = manager.snapshot().await.unwrap();
		assert_eq!(state.last_activity, clock.now_millis());
	}

	#[tokio::test]
	async fn test_session_duration_rounds_to_seconds() {
		let (clock, manager) = manager(true);
		manager.start_session().await;
		clock.advance(2_600);
		assert_eq!(manager.session_duration_secs().await, Some(3));
	}

	#[tokio::test]
	async fn test_clear_then_read_starts_new_session() {
		let (_clock, manager) = manager(true);
		let first = manager.start_session().await.unwrap();
		manager.clear().await;
		assert_eq!(manager.session_duration_secs().await, None);

		let second = manager.session_id().await.unwrap();
		assert_ne!(first, second);
	}
}

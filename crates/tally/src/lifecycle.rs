// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! App lifecycle coordination.
//!
//! The host forwards app-state and connectivity changes through a
//! [`LifecycleHandle`]. A background task consumes them together with the
//! periodic flush timer and calls back into a [`LifecycleListener`].

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, TallyError};

const SIGNAL_BUFFER: usize = 64;

/// Application state as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
	Active,
	Inactive,
	Background,
}

/// Signals accepted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
	AppState(AppState),
	Connectivity { connected: bool },
}

/// A state change the listener acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	Foreground,
	Background,
}

/// Tracks the last reported app state and derives transitions from it.
/// Starts in [`AppState::Active`].
#[derive(Debug)]
pub struct AppStateTracker {
	state: AppState,
}

impl AppStateTracker {
	pub fn new() -> Self {
		Self {
			state: AppState::Active,
		}
	}

	pub fn state(&self) -> AppState {
		self.state
	}

	/// Records `next` and returns the transition it causes, if any.
	pub fn transition(&mut self, next: AppState) -> Option<Transition> {
		let previous = std::mem::replace(&mut self.state, next);
		match next {
			AppState::Active if previous != AppState::Active => Some(Transition::Foreground),
			AppState::Background if previous != AppState::Background => Some(Transition::Background),
			_ => None,
		}
	}
}

impl Default for AppStateTracker {
	fn default() -> Self {
		Self::new()
	}
}

/// Receives lifecycle callbacks from the coordinator task.
#[async_trait::async_trait]
pub trait LifecycleListener: Send + Sync {
	async fn on_foreground(&self);

	async fn on_background(&self);

	async fn on_connectivity(&self, connected: bool);

	/// Periodic flush timer.
	async fn on_tick(&self);
}

/// Sends lifecycle signals to the coordinator task.
#[derive(Clone)]
pub struct LifecycleHandle {
	tx: mpsc::Sender<LifecycleSignal>,
}

impl LifecycleHandle {
	pub async fn send(&self, signal: LifecycleSignal) -> Result<()> {
		self
			.tx
			.send(signal)
			.await
			.map_err(|_| TallyError::ClientShutdown)
	}

	/// Reports an app-state change.
	pub async fn app_state_changed(&self, state: AppState) -> Result<()> {
		self.send(LifecycleSignal::AppState(state)).await
	}

	/// Reports a connectivity change.
	pub async fn connectivity_changed(&self, connected: bool) -> Result<()> {
		self.send(LifecycleSignal::Connectivity { connected }).await
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Receiving half of the signal channel, consumed by [`spawn_coordinator`].
pub struct LifecycleReceiver {
	rx: mpsc::Receiver<LifecycleSignal>,
}

/// Creates the signal channel.
pub fn channel() -> (LifecycleHandle, LifecycleReceiver) {
	let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
	(LifecycleHandle { tx }, LifecycleReceiver { rx })
}

/// Spawns the coordinator task.
///
/// The task holds only a weak reference to the listener and stops when the
/// listener is dropped, when every handle is dropped, or when `cancel` fires.
pub fn spawn_coordinator(
	signals: LifecycleReceiver,
	listener: Weak<dyn LifecycleListener>,
	flush_interval: Duration,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(run(listener, signals.rx, flush_interval, cancel))
}

async fn run(
	listener: Weak<dyn LifecycleListener>,
	mut rx: mpsc::Receiver<LifecycleSignal>,
	flush_interval: Duration,
	cancel: CancellationToken,
) {
	info!(
		flush_interval_ms = flush_interval.as_millis() as u64,
		"Starting lifecycle coordinator"
	);

	let mut tracker = AppStateTracker::new();
	let mut ticker = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			signal = rx.recv() => {
				let Some(signal) = signal else { break };
				let Some(listener) = listener.upgrade() else { break };
				match signal {
					LifecycleSignal::AppState(next) => {
						match tracker.transition(next) {
							Some(Transition::Foreground) => {
								debug!("App entered foreground");
								listener.on_foreground().await;
							}
							Some(Transition::Background) => {
								debug!("App entered background");
								listener.on_background().await;
							}
							None => {}
						}
					}
					LifecycleSignal::Connectivity { connected } => {
						debug!(connected, "Connectivity changed");
						listener.on_connectivity(connected).await;
					}
				}
			}
			_ = ticker.tick() => {
				let Some(listener) = listener.upgrade() else { break };
				listener.on_tick().await;
			}
		}
	}

	info!("Lifecycle coordinator stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tokio::sync::Mutex;

	#[derive(Default)]
	struct Recorder {
		calls: Mutex<Vec<String>>,
	}

	impl Recorder {
		async fn calls(&self) -> Vec<String> {
			self.calls.lock().await.clone()
		}

		async fn ticks(&self) -> usize {
			self.calls().await.iter().filter(|c| *c == "tick").count()
		}
	}

	#[async_trait::async_trait]
	impl LifecycleListener for Recorder {
		async fn on_foreground(&self) {
			self.calls.lock().await.push("foreground".to_string());
		}

		async fn on_background(&self) {
			self.calls.lock().await.push("background".to_string());
		}

		async fn on_connectivity(&self, connected: bool) {
			self.calls.lock().await.push(format!("connectivity:{connected}"));
		}

		async fn on_tick(&self) {
			self.calls.lock().await.push("tick".to_string());
		}
	}

	fn spawn(recorder: &Arc<Recorder>, cancel: CancellationToken) -> (LifecycleHandle, JoinHandle<()>) {
		let (handle, signals) = channel();
		let weak: Weak<Recorder> = Arc::downgrade(recorder);
		let listener: Weak<dyn LifecycleListener> = weak;
		let task = spawn_coordinator(signals, listener, Duration::from_millis(1500), cancel);
		(handle, task)
	}

	#[test]
	fn test_transitions_follow_previous_state() {
		let mut tracker = AppStateTracker::new();
		assert_eq!(tracker.transition(AppState::Active), None);
		assert_eq!(tracker.transition(AppState::Inactive), None);
		assert_eq!(
			tracker.transition(AppState::Background),
			Some(Transition::Background)
		);
		assert_eq!(tracker.transition(AppState::Background), None);
		assert_eq!(tracker.transition(AppState::Active), Some(Transition::Foreground));
		assert_eq!(tracker.state(), AppState::Active);
	}

	#[test]
	fn test_inactive_to_active_is_foreground() {
		let mut tracker = AppStateTracker::new();
		tracker.transition(AppState::Inactive);
		assert_eq!(tracker.transition(AppState::Active), Some(Transition::Foreground));
	}

	#[tokio::test(start_paused = true)]
	async fn test_signals_reach_listener_in_order() {
		let recorder = Arc::new(Recorder::default());
		let cancel = CancellationToken::new();
		let (handle, task) = spawn(&recorder, cancel.clone());

		handle.app_state_changed(AppState::Background).await.unwrap();
		handle.app_state_changed(AppState::Active).await.unwrap();
		handle.connectivity_changed(true).await.unwrap();

		drop(handle);
		task.await.unwrap();
		assert!(!cancel.is_cancelled());

		let calls: Vec<String> = recorder
			.calls()
			.await
			.into_iter()
			.filter(|c| c != "tick")
			.collect();
		assert_eq!(calls, vec!["background", "foreground", "connectivity:true"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_timer_ticks_every_interval() {
		let recorder = Arc::new(Recorder::default());
		let cancel = CancellationToken::new();
		let (_handle, task) = spawn(&recorder, cancel.clone());

		tokio::time::sleep(Duration::from_millis(1_400)).await;
		assert_eq!(recorder.ticks().await, 0);

		tokio::time::sleep(Duration::from_millis(3_200)).await;
		assert_eq!(recorder.ticks().await, 3);

		cancel.cancel();
		task.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_stops_task_and_closes_handle() {
		let recorder = Arc::new(Recorder::default());
		let cancel = CancellationToken::new();
		let (handle, task) = spawn(&recorder, cancel.clone());

		cancel.cancel();
		task.await.unwrap();

		assert!(handle.is_closed());
		let result = handle.connectivity_changed(true).await;
		assert!(matches!(result, Err(TallyError::ClientShutdown)));

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(recorder.ticks().await, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_dropping_listener_stops_task() {
		let recorder = Arc::new(Recorder::default());
		let (_handle, task) = spawn(&recorder, CancellationToken::new());
		drop(recorder);

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert!(task.is_finished());
	}
}

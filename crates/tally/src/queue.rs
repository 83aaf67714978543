// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable event queue and delivery engine.
//!
//! Every mutation of the queue (append, drain, requeue) is persisted while the
//! queue lock is held, so the stored snapshot never lags the in-memory one.
//! Records taken for a delivery attempt stay in the persisted snapshot until
//! the transport confirms them; a crash mid-attempt can therefore resend a
//! batch but never loses one.
//!
//! Delivery attempts are serialized. A failed batch goes back to the head of
//! the queue, ahead of anything appended while it was in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tally_core::EventRecord;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeliveryConfig;
use crate::error::{Result, TallyError};
use crate::network::NetworkMonitor;
use crate::store::{keys, DurableStore};
use crate::transport::{DeliveryRequest, Transport};

/// Result of a delivery attempt.
#[derive(Debug)]
pub enum FlushOutcome {
	/// The queue was empty or below the threshold.
	NothingToSend,
	/// No API key is configured.
	MissingApiKey,
	/// The network monitor reported no connectivity.
	Offline,
	/// Delivery is suspended after repeated failures.
	CircuitOpen { resume_in: Duration },
	/// A batch of this many records was accepted.
	Delivered(usize),
	/// The batch was rejected and restored to the head of the queue.
	Failed { count: usize, error: TallyError },
}

impl FlushOutcome {
	pub fn is_delivered(&self) -> bool {
		matches!(self, FlushOutcome::Delivered(_))
	}

	/// Number of records delivered by this attempt.
	pub fn delivered(&self) -> usize {
		match self {
			FlushOutcome::Delivered(count) => *count,
			_ => 0,
		}
	}
}

/// Suspends delivery after `max_failures` consecutive failures until the
/// cool-down has elapsed.
#[derive(Debug)]
struct CircuitBreaker {
	max_failures: u32,
	cooldown: Duration,
	failures: u32,
	opened_at: Option<Instant>,
}

impl CircuitBreaker {
	fn new(max_failures: u32, cooldown: Duration) -> Self {
		Self {
			max_failures,
			cooldown,
			failures: 0,
			opened_at: None,
		}
	}

	/// Returns the remaining suspension, or `None` when an attempt may
	/// proceed. An elapsed cool-down resets the counter.
	fn check(&mut self, now: Instant) -> Option<Duration> {
		if self.failures < self.max_failures {
			return None;
		}
		let opened_at = *self.opened_at.get_or_insert(now);
		let elapsed = now.saturating_duration_since(opened_at);
		if elapsed >= self.cooldown {
			debug!(failures = self.failures, "Delivery cool-down elapsed, resuming");
			self.failures = 0;
			self.opened_at = None;
			return None;
		}
		Some(self.cooldown - elapsed)
	}

	fn record_failure(&mut self, now: Instant) {
		self.failures = self.failures.saturating_add(1);
		if self.failures >= self.max_failures && self.opened_at.is_none() {
			self.opened_at = Some(now);
		}
	}

	fn record_success(&mut self) {
		self.failures = 0;
		self.opened_at = None;
	}
}

#[derive(Debug, Default)]
struct QueueState {
	/// Records handed to the transport by the current attempt.
	in_flight: Vec<EventRecord>,
	pending: VecDeque<EventRecord>,
}

impl QueueState {
	fn len(&self) -> usize {
		self.in_flight.len() + self.pending.len()
	}

	fn records(&self) -> Vec<&EventRecord> {
		self.in_flight.iter().chain(self.pending.iter()).collect()
	}

	fn requeue_in_flight(&mut self) {
		for record in self.in_flight.drain(..).rev() {
			self.pending.push_front(record);
		}
	}
}

/// Durable FIFO of event records and the only component that talks to the
/// transport for events.
pub struct DeliveryEngine {
	config: DeliveryConfig,
	api_key: Option<String>,
	location_enrichment: bool,
	transport: Arc<dyn Transport>,
	network: Arc<dyn NetworkMonitor>,
	store: Arc<dyn DurableStore>,
	state: Mutex<QueueState>,
	delivery: Mutex<()>,
	breaker: Mutex<CircuitBreaker>,
	cancel: CancellationToken,
}

impl DeliveryEngine {
	pub fn new(
		config: DeliveryConfig,
		api_key: Option<String>,
		location_enrichment: bool,
		transport: Arc<dyn Transport>,
		network: Arc<dyn NetworkMonitor>,
		store: Arc<dyn DurableStore>,
	) -> Self {
		let breaker = CircuitBreaker::new(config.max_consecutive_failures, config.failure_cooldown);
		Self {
			config,
			api_key,
			location_enrichment,
			transport,
			network,
			store,
			state: Mutex::new(QueueState::default()),
			delivery: Mutex::new(()),
			breaker: Mutex::new(breaker),
			cancel: CancellationToken::new(),
		}
	}

	pub fn config(&self) -> &DeliveryConfig {
		&self.config
	}

	/// Token cancelled by [`shutdown`](Self::shutdown). Background tasks tied
	/// to this engine stop when it fires.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Loads the persisted queue. A malformed snapshot is discarded.
	pub async fn restore(&self) -> Result<usize> {
		let Some(raw) = self.store.get(keys::EVENT_QUEUE).await? else {
			return Ok(0);
		};

		let records: Vec<EventRecord> = match serde_json::from_str(&raw) {
			Ok(records) => records,
			Err(e) => {
				warn!(error = %e, "Discarding malformed persisted queue");
				self.store.remove(keys::EVENT_QUEUE).await?;
				return Ok(0);
			}
		};

		let count = records.len();
		let mut state = self.state.lock().await;
		state.pending = records.into();
		if count > 0 {
			info!(count, "Restored queued events");
		}
		Ok(count)
	}

	/// Appends a record and persists the queue before returning. Returns the
	/// new queue length.
	///
	/// A storage failure is returned but the record stays queued in memory.
	pub async fn enqueue(&self, record: EventRecord) -> Result<usize> {
		let mut state = self.state.lock().await;
		state.pending.push_back(record);
		let len = state.len();
		self.persist(&state).await?;
		Ok(len)
	}

	/// Flushes when the queue has reached the batch threshold, or when
	/// `force` is set and the queue is non-empty.
	pub async fn maybe_flush(self: &Arc<Self>, force: bool) -> FlushOutcome {
		let len = self.state.lock().await.pending.len();
		if len >= self.config.batch_threshold || (force && len > 0) {
			self.flush_now().await
		} else {
			FlushOutcome::NothingToSend
		}
	}

	/// Attempts to deliver up to one batch of the oldest records.
	pub async fn flush_now(self: &Arc<Self>) -> FlushOutcome {
		let _attempt = self.delivery.lock().await;

		let Some(api_key) = self.api_key.as_deref() else {
			warn!("API key not provided, skipping delivery");
			return FlushOutcome::MissingApiKey;
		};

		if !self.network.is_connected().await {
			debug!("No network connection, keeping events queued");
			return FlushOutcome::Offline;
		}

		if let Some(resume_in) = self.breaker.lock().await.check(Instant::now()) {
			debug!(resume_in_ms = resume_in.as_millis() as u64, "Delivery suspended");
			return FlushOutcome::CircuitOpen { resume_in };
		}

		let batch = {
			let mut state = self.state.lock().await;
			if state.pending.is_empty() {
				return FlushOutcome::NothingToSend;
			}
			let count = state.pending.len().min(self.config.batch_threshold);
			let batch: Vec<EventRecord> = state.pending.drain(..count).collect();
			state.in_flight = batch.clone();
			batch
		};
		let count = batch.len();

		debug!(count, "Sending event batch");
		let result = match DeliveryRequest::event_batch(&batch, self.location_enrichment) {
			Ok(request) => self.transport.send(api_key, &request).await,
			Err(e) => Err(e),
		};

		let outcome = {
			let mut state = self.state.lock().await;
			match result {
				Ok(()) => {
					state.in_flight.clear();
					self.breaker.lock().await.record_success();
					info!(count, remaining = state.pending.len(), "Delivered event batch");
					self.persist_logged(&state).await;
					FlushOutcome::Delivered(count)
				}
				Err(error) => {
					state.requeue_in_flight();
					if error.counts_as_failure() {
						let mut breaker = self.breaker.lock().await;
						breaker.record_failure(Instant::now());
						warn!(
							count,
							failures = breaker.failures,
							error = %error,
							"Failed to deliver event batch"
						);
					} else {
						warn!(
							count,
							kind = ?error.kind(),
							error = %error,
							"Failed to deliver event batch"
						);
					}
					self.persist_logged(&state).await;
					FlushOutcome::Failed { count, error }
				}
			}
		};

		if !self.state.lock().await.pending.is_empty() {
			self.schedule_retry();
		}

		outcome
	}

	/// Drops every queued record and the persisted snapshot. Waits for an
	/// in-flight attempt to finish first.
	pub async fn clear(&self) -> Result<()> {
		let _attempt = self.delivery.lock().await;
		let mut state = self.state.lock().await;
		let dropped = state.len();
		*state = QueueState::default();
		self.store.remove(keys::EVENT_QUEUE).await?;
		if dropped > 0 {
			info!(count = dropped, "Cleared event queue");
		}
		Ok(())
	}

	/// Number of records not yet confirmed by the transport.
	pub async fn queue_len(&self) -> usize {
		self.state.lock().await.len()
	}

	/// Records not yet confirmed, oldest first.
	pub async fn snapshot(&self) -> Vec<EventRecord> {
		let state = self.state.lock().await;
		state.records().into_iter().cloned().collect()
	}

	pub async fn consecutive_failures(&self) -> u32 {
		self.breaker.lock().await.failures
	}

	/// Cancels the retry timer and any task holding this engine's token.
	/// Queued records stay persisted.
	pub fn shutdown(&self) {
		self.cancel.cancel();
	}

	pub fn is_shutdown(&self) -> bool {
		self.cancel.is_cancelled()
	}

	fn schedule_retry(self: &Arc<Self>) {
		if self.cancel.is_cancelled() {
			return;
		}
		let engine: Weak<Self> = Arc::downgrade(self);
		let delay = self.config.retry_delay;
		let cancel = self.cancel.clone();

		debug!(delay_ms = delay.as_millis() as u64, "Scheduling delivery of remaining events");
		tokio::spawn(async move {
			tokio::select! {
				_ = cancel.cancelled() => {}
				_ = tokio::time::sleep(delay) => {
					if let Some(engine) = engine.upgrade() {
						engine.maybe_flush(true).await;
					}
				}
			}
		});
	}

	async fn persist(&self, state: &QueueState) -> Result<()> {
		let raw = serde_json::to_string(&state.records())?;
		self.store.set(keys::EVENT_QUEUE, &raw).await
	}

	async fn persist_logged(&self, state: &QueueState) {
		if let Err(e) = self.persist(state).await {
			warn!(error = %e, "Failed to persist event queue");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::network::SharedNetworkStatus;
	use crate::store::MemoryStore;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use tokio::sync::{Notify, Semaphore};

	struct MockTransport {
		calls: AtomicUsize,
		sent: Mutex<Vec<Vec<String>>>,
		should_fail: AtomicBool,
	}

	impl MockTransport {
		fn new() -> Self {
			Self {
				calls: AtomicUsize::new(0),
				sent: Mutex::new(Vec::new()),
				should_fail: AtomicBool::new(false),
			}
		}

		fn set_should_fail(&self, fail: bool) {
			self.should_fail.store(fail, Ordering::SeqCst);
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		async fn sent_batches(&self) -> Vec<Vec<String>> {
			self.sent.lock().await.clone()
		}
	}

	fn names(request: &DeliveryRequest) -> Vec<String> {
		request.body["events"]
			.as_array()
			.map(|events| {
				events
					.iter()
					.filter_map(|e| e["name"].as_str().map(str::to_string))
					.collect()
			})
			.unwrap_or_default()
	}

	#[async_trait::async_trait]
	impl Transport for MockTransport {
		async fn send(&self, _api_key: &str, request: &DeliveryRequest) -> Result<()> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.should_fail.load(Ordering::SeqCst) {
				return Err(TallyError::ServerError {
					status: 500,
					message: "mock failure".to_string(),
				});
			}
			self.sent.lock().await.push(names(request));
			Ok(())
		}
	}

	/// Transport that parks every send until a permit is released.
	struct GatedTransport {
		started: Notify,
		gate: Semaphore,
		should_fail: AtomicBool,
	}

	#[async_trait::async_trait]
	impl Transport for GatedTransport {
		async fn send(&self, _api_key: &str, _request: &DeliveryRequest) -> Result<()> {
			self.started.notify_one();
			let permit = self
				.gate
				.acquire()
				.await
				.map_err(|e| TallyError::Storage(e.to_string()))?;
			permit.forget();
			if self.should_fail.load(Ordering::SeqCst) {
				return Err(TallyError::ServerError {
					status: 502,
					message: "bad gateway".to_string(),
				});
			}
			Ok(())
		}
	}

	struct Harness {
		engine: Arc<DeliveryEngine>,
		store: Arc<MemoryStore>,
		network: Arc<SharedNetworkStatus>,
	}

	fn harness_with(transport: Arc<dyn Transport>, api_key: Option<&str>) -> Harness {
		let store = Arc::new(MemoryStore::new());
		let network = Arc::new(SharedNetworkStatus::default());
		let engine = Arc::new(DeliveryEngine::new(
			DeliveryConfig::default(),
			api_key.map(str::to_string),
			true,
			transport,
			network.clone(),
			store.clone(),
		));
		Harness {
			engine,
			store,
			network,
		}
	}

	fn harness(transport: Arc<MockTransport>) -> Harness {
		harness_with(transport, Some("test-key"))
	}

	fn record(name: &str) -> EventRecord {
		EventRecord::new(1_700_000_000_000, name, "anon-1")
	}

	async fn persisted_names(store: &MemoryStore) -> Vec<String> {
		let raw = store.get(keys::EVENT_QUEUE).await.unwrap().unwrap_or_default();
		if raw.is_empty() {
			return Vec::new();
		}
		let records: Vec<EventRecord> = serde_json::from_str(&raw).unwrap();
		records.into_iter().map(|r| r.name).collect()
	}

	#[tokio::test]
	async fn test_enqueue_persists_before_returning() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());

		let len = h.engine.enqueue(record("e1")).await.unwrap();

		assert_eq!(len, 1);
		assert_eq!(persisted_names(&h.store).await, vec!["e1"]);
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn test_threshold_triggers_single_batch() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());

		for i in 0..9 {
			h.engine.enqueue(record(&format!("e{i}"))).await.unwrap();
			assert!(matches!(
				h.engine.maybe_flush(false).await,
				FlushOutcome::NothingToSend
			));
		}
		assert_eq!(transport.calls(), 0);

		h.engine.enqueue(record("e9")).await.unwrap();
		let outcome = h.engine.maybe_flush(false).await;

		assert_eq!(outcome.delivered(), 10);
		assert_eq!(transport.calls(), 1);
		assert_eq!(transport.sent_batches().await[0].len(), 10);
		assert_eq!(h.engine.queue_len().await, 0);
		assert!(persisted_names(&h.store).await.is_empty());
	}

	#[tokio::test]
	async fn test_force_flushes_partial_queue() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		h.engine.enqueue(record("e1")).await.unwrap();

		assert_eq!(h.engine.maybe_flush(true).await.delivered(), 1);
		assert!(matches!(
			h.engine.maybe_flush(true).await,
			FlushOutcome::NothingToSend
		));
	}

	#[tokio::test]
	async fn test_failure_keeps_records_durable() {
		let transport = Arc::new(MockTransport::new());
		transport.set_should_fail(true);
		let h = harness(transport.clone());
		h.engine.shutdown();

		for name in ["e1", "e2", "e3"] {
			h.engine.enqueue(record(name)).await.unwrap();
		}

		let outcome = h.engine.flush_now().await;

		assert!(matches!(outcome, FlushOutcome::Failed { count: 3, .. }));
		assert_eq!(persisted_names(&h.store).await, vec!["e1", "e2", "e3"]);
		assert_eq!(h.engine.consecutive_failures().await, 1);
	}

	#[tokio::test]
	async fn test_fail_once_then_succeed_resets_counter() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		h.engine.shutdown();
		h.engine.enqueue(record("e1")).await.unwrap();

		transport.set_should_fail(true);
		h.engine.maybe_flush(true).await;
		assert_eq!(h.engine.consecutive_failures().await, 1);

		transport.set_should_fail(false);
		h.engine.maybe_flush(true).await;

		assert_eq!(h.engine.queue_len().await, 0);
		assert_eq!(h.engine.consecutive_failures().await, 0);
	}

	#[tokio::test]
	async fn test_failed_batch_returns_ahead_of_new_records() {
		let transport = Arc::new(GatedTransport {
			started: Notify::new(),
			gate: Semaphore::new(0),
			should_fail: AtomicBool::new(true),
		});
		let h = harness_with(transport.clone(), Some("test-key"));
		h.engine.shutdown();

		h.engine.enqueue(record("a")).await.unwrap();
		h.engine.enqueue(record("b")).await.unwrap();

		let engine = h.engine.clone();
		let attempt = tokio::spawn(async move { engine.flush_now().await });
		transport.started.notified().await;

		h.engine.enqueue(record("c")).await.unwrap();
		assert_eq!(persisted_names(&h.store).await, vec!["a", "b", "c"]);

		transport.gate.add_permits(1);
		let outcome = attempt.await.unwrap();

		assert!(matches!(outcome, FlushOutcome::Failed { count: 2, .. }));
		let order: Vec<String> = h
			.engine
			.snapshot()
			.await
			.into_iter()
			.map(|r| r.name)
			.collect();
		assert_eq!(order, vec!["a", "b", "c"]);
		assert_eq!(persisted_names(&h.store).await, vec!["a", "b", "c"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_circuit_opens_after_three_failures_and_recovers() {
		let transport = Arc::new(MockTransport::new());
		transport.set_should_fail(true);
		let h = harness(transport.clone());
		h.engine.shutdown();
		h.engine.enqueue(record("e1")).await.unwrap();

		for _ in 0..3 {
			h.engine.flush_now().await;
		}
		assert_eq!(transport.calls(), 3);

		let outcome = h.engine.flush_now().await;
		assert!(matches!(outcome, FlushOutcome::CircuitOpen { .. }));
		assert_eq!(transport.calls(), 3);

		tokio::time::advance(Duration::from_secs(59)).await;
		assert!(matches!(
			h.engine.flush_now().await,
			FlushOutcome::CircuitOpen { .. }
		));
		assert_eq!(transport.calls(), 3);

		tokio::time::advance(Duration::from_secs(1)).await;
		transport.set_should_fail(false);
		assert_eq!(h.engine.flush_now().await.delivered(), 1);
		assert_eq!(transport.calls(), 4);
		assert_eq!(h.engine.consecutive_failures().await, 0);
	}

	#[tokio::test]
	async fn test_offline_skips_without_counting_failure() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		h.engine.enqueue(record("e1")).await.unwrap();
		h.network.set_connected(false);

		assert!(matches!(h.engine.flush_now().await, FlushOutcome::Offline));
		assert_eq!(transport.calls(), 0);
		assert_eq!(h.engine.queue_len().await, 1);
		assert_eq!(h.engine.consecutive_failures().await, 0);
	}

	#[tokio::test]
	async fn test_missing_api_key_is_a_no_op() {
		let transport = Arc::new(MockTransport::new());
		let h = harness_with(transport.clone(), None);
		h.engine.enqueue(record("e1")).await.unwrap();

		assert!(matches!(
			h.engine.flush_now().await,
			FlushOutcome::MissingApiKey
		));
		assert_eq!(transport.calls(), 0);
		assert_eq!(h.engine.queue_len().await, 1);
		assert_eq!(h.engine.consecutive_failures().await, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_remaining_records_drain_after_retry_delay() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		for i in 0..25 {
			h.engine.enqueue(record(&format!("e{i}"))).await.unwrap();
		}

		assert_eq!(h.engine.flush_now().await.delivered(), 10);
		assert_eq!(transport.calls(), 1);

		tokio::time::sleep(Duration::from_millis(3_500)).await;

		let batches = transport.sent_batches().await;
		assert_eq!(batches.len(), 3);
		assert_eq!(batches[2].len(), 5);
		assert_eq!(batches[0][0], "e0");
		assert_eq!(batches[2][4], "e24");
		assert_eq!(h.engine.queue_len().await, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_cancels_pending_retry() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		for i in 0..15 {
			h.engine.enqueue(record(&format!("e{i}"))).await.unwrap();
		}

		h.engine.flush_now().await;
		h.engine.shutdown();
		tokio::time::sleep(Duration::from_secs(5)).await;

		assert_eq!(transport.calls(), 1);
		assert_eq!(h.engine.queue_len().await, 5);
		assert_eq!(persisted_names(&h.store).await.len(), 5);
	}

	#[tokio::test]
	async fn test_restore_loads_persisted_queue() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		let raw = serde_json::to_string(&vec![record("old1"), record("old2")]).unwrap();
		h.store.set(keys::EVENT_QUEUE, &raw).await.unwrap();

		assert_eq!(h.engine.restore().await.unwrap(), 2);
		h.engine.enqueue(record("new")).await.unwrap();

		assert_eq!(persisted_names(&h.store).await, vec!["old1", "old2", "new"]);
	}

	#[tokio::test]
	async fn test_restore_discards_malformed_queue() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		h.store.set(keys::EVENT_QUEUE, "{not json").await.unwrap();

		assert_eq!(h.engine.restore().await.unwrap(), 0);
		assert_eq!(h.store.get(keys::EVENT_QUEUE).await.unwrap(), None);
		assert_eq!(h.engine.queue_len().await, 0);
	}

	#[tokio::test]
	async fn test_clear_drops_records_and_snapshot() {
		let transport = Arc::new(MockTransport::new());
		let h = harness(transport.clone());
		h.engine.enqueue(record("e1")).await.unwrap();

		h.engine.clear().await.unwrap();

		assert_eq!(h.engine.queue_len().await, 0);
		assert_eq!(h.store.get(keys::EVENT_QUEUE).await.unwrap(), None);
	}

	#[test]
	fn test_breaker_counts_to_threshold() {
		let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
		let now = Instant::now();
		assert!(breaker.check(now).is_none());

		breaker.record_failure(now);
		breaker.record_failure(now);
		assert!(breaker.check(now).is_none());

		breaker.record_failure(now);
		assert_eq!(breaker.check(now), Some(Duration::from_secs(60)));

		breaker.record_success();
		assert!(breaker.check(now).is_none());
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry client: tracking, identification and lifecycle wiring.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tally_core::{
	apply_default_properties, lifecycle_events, validate_event_name, EventRecord, ProfilePayload,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{DeliveryConfig, TallyOptions};
use crate::enrichment::{device_properties, SharedEnrichmentProvider, SystemEnrichment};
use crate::error::{Result, TallyError};
use crate::identity::IdentityResolver;
use crate::lifecycle::{self, LifecycleHandle, LifecycleListener};
use crate::network::{NetworkMonitor, SharedNetworkStatus};
use crate::properties::Properties;
use crate::queue::{DeliveryEngine, FlushOutcome};
use crate::session::SessionManager;
use crate::store::{DurableStore, FileStore};
use crate::transport::{DeliveryRequest, HttpTransport, Transport};

/// Parameters of a [`Tally::track`] call.
#[derive(Debug, Clone)]
pub struct TrackParams {
	event: String,
	properties: Option<Value>,
	user_id: Option<String>,
	external_id: Option<String>,
	enrich_device_data: bool,
	send_immediately: bool,
}

impl TrackParams {
	pub fn new(event: impl Into<String>) -> Self {
		Self {
			event: event.into(),
			properties: None,
			user_id: None,
			external_id: None,
			enrich_device_data: true,
			send_immediately: false,
		}
	}

	/// Event properties. Must be a JSON object.
	pub fn properties(mut self, properties: impl Into<Value>) -> Self {
		self.properties = Some(properties.into());
		self
	}

	/// Overrides the stored user id for this and later calls.
	pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	/// Overrides the stored external id for this and later calls.
	pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
		self.external_id = Some(external_id.into());
		self
	}

	pub fn enrich_device_data(mut self, enabled: bool) -> Self {
		self.enrich_device_data = enabled;
		self
	}

	/// Forces a flush after the event is queued instead of waiting for the
	/// batch threshold.
	pub fn send_immediately(mut self) -> Self {
		self.send_immediately = true;
		self
	}

	pub fn event(&self) -> &str {
		&self.event
	}
}

/// Parameters of a [`Tally::identify`] call.
#[derive(Debug, Clone)]
pub struct IdentifyParams {
	user_id: Option<String>,
	external_id: Option<String>,
	properties: Option<Value>,
	enrich_device_data: bool,
	enrich_location_data: bool,
}

impl IdentifyParams {
	pub fn new() -> Self {
		Self {
			user_id: None,
			external_id: None,
			properties: None,
			enrich_device_data: true,
			enrich_location_data: true,
		}
	}

	pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
		self.external_id = Some(external_id.into());
		self
	}

	/// Profile properties. Must be a JSON object.
	pub fn properties(mut self, properties: impl Into<Value>) -> Self {
		self.properties = Some(properties.into());
		self
	}

	pub fn enrich_device_data(mut self, enabled: bool) -> Self {
		self.enrich_device_data = enabled;
		self
	}

	pub fn enrich_location_data(mut self, enabled: bool) -> Self {
		self.enrich_location_data = enabled;
		self
	}
}

impl Default for IdentifyParams {
	fn default() -> Self {
		Self::new()
	}
}

/// Builder for constructing a [`Tally`] client.
pub struct TallyBuilder {
	api_key: Option<String>,
	base_url: Option<String>,
	options: TallyOptions,
	delivery: DeliveryConfig,
	store: Option<Arc<dyn DurableStore>>,
	transport: Option<Arc<dyn Transport>>,
	enrichment: Option<SharedEnrichmentProvider>,
	network: Option<Arc<dyn NetworkMonitor>>,
	clock: Option<Arc<dyn Clock>>,
}

impl TallyBuilder {
	pub fn new() -> Self {
		Self {
			api_key: None,
			base_url: None,
			options: TallyOptions::default(),
			delivery: DeliveryConfig::default(),
			store: None,
			transport: None,
			enrichment: None,
			network: None,
			clock: None,
		}
	}

	/// Sets the API key sent as a bearer token.
	///
	/// Without a key the client still builds, but every tracking call is a
	/// logged no-op.
	pub fn api_key(mut self, key: impl Into<String>) -> Self {
		self.api_key = Some(key.into());
		self
	}

	/// Sets the ingestion base URL, e.g. `https://ingest.example.com`.
	/// Required unless a custom transport is supplied.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	pub fn options(mut self, options: TallyOptions) -> Self {
		self.options = options;
		self
	}

	pub fn delivery_config(mut self, config: DeliveryConfig) -> Self {
		self.delivery = config;
		self
	}

	/// Durable store for identity and the queue. Defaults to a [`FileStore`]
	/// under [`FileStore::default_dir`].
	pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Replaces the HTTP transport.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn enrichment(mut self, provider: SharedEnrichmentProvider) -> Self {
		self.enrichment = Some(provider);
		self
	}

	pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
		self.network = Some(monitor);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Builds the client, restores persisted state and starts the lifecycle
	/// task. Must be called inside a tokio runtime.
	pub async fn build(self) -> Result<Tally> {
		let api_key = self.api_key.filter(|k| !k.trim().is_empty());
		if api_key.is_none() {
			warn!("API key not provided, tracking calls will be ignored");
		}

		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => {
				let base_url = self.base_url.ok_or(TallyError::InvalidBaseUrl)?;
				Arc::new(HttpTransport::new(base_url, self.delivery.request_timeout)?)
			}
		};

		let store: Arc<dyn DurableStore> = match self.store {
			Some(store) => store,
			None => {
				let dir = FileStore::default_dir()
					.ok_or_else(|| TallyError::Storage("no data directory available".to_string()))?;
				Arc::new(FileStore::open(dir).await?)
			}
		};

		let options = self.options;
		let enrichment: SharedEnrichmentProvider = match self.enrichment {
			Some(provider) => provider,
			None => Arc::new(SystemEnrichment::new()),
		};
		let network: Arc<dyn NetworkMonitor> = match self.network {
			Some(monitor) => monitor,
			None => Arc::new(SharedNetworkStatus::default()),
		};
		let clock: Arc<dyn Clock> = match self.clock {
			Some(clock) => clock,
			None => Arc::new(SystemClock),
		};

		if options.block_common_bots && enrichment.is_emulator().await {
			warn!("Running on an emulator or simulator, events are still tracked");
		}

		let identity = IdentityResolver::new(store.clone(), !options.disable_user_id_storage);
		if let Err(e) = identity.restore().await {
			warn!(error = %e, "Failed to restore stored identity");
			identity.get_or_create_anonymous_id().await;
		}

		let engine = Arc::new(DeliveryEngine::new(
			self.delivery,
			api_key.clone(),
			options.auto_enrich,
			transport.clone(),
			network.clone(),
			store,
		));
		if let Err(e) = engine.restore().await {
			warn!(error = %e, "Failed to restore queued events");
		}

		let session = SessionManager::new(options.track_session, options.session_timeout, clock.clone());
		session.start_session().await;

		let (lifecycle, signals) = lifecycle::channel();
		let inner = Arc::new(ClientInner {
			api_key,
			default_properties: RwLock::new(options.default_tracking_properties.clone()),
			options,
			identity,
			session,
			engine,
			transport,
			enrichment,
			network,
			clock,
			current_screen: Mutex::new(None),
			lifecycle,
		});

		let weak: Weak<ClientInner> = Arc::downgrade(&inner);
		let listener: Weak<dyn LifecycleListener> = weak;
		lifecycle::spawn_coordinator(
			signals,
			listener,
			inner.engine.config().flush_interval,
			inner.engine.cancellation_token(),
		);

		info!(
			auto_enrich = inner.options.auto_enrich,
			track_session = inner.options.track_session,
			"Telemetry client initialized"
		);

		let client = Tally { inner };
		client.run_auto_capture().await;
		Ok(client)
	}
}

impl Default for TallyBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Clone)]
struct ScreenState {
	name: String,
	started_at: i64,
}

struct ClientInner {
	api_key: Option<String>,
	options: TallyOptions,
	default_properties: RwLock<Map<String, Value>>,
	identity: IdentityResolver,
	session: SessionManager,
	engine: Arc<DeliveryEngine>,
	transport: Arc<dyn Transport>,
	enrichment: SharedEnrichmentProvider,
	network: Arc<dyn NetworkMonitor>,
	clock: Arc<dyn Clock>,
	current_screen: Mutex<Option<ScreenState>>,
	lifecycle: LifecycleHandle,
}

impl ClientInner {
	fn require_api_key(&self, action: &str) -> Result<&str> {
		self.api_key.as_deref().ok_or_else(|| {
			warn!(action, "API key not provided");
			TallyError::MissingApiKey
		})
	}

	fn log_event(&self, event_name: &str, message: &str) {
		if self.options.debug_mode {
			info!(event_name, "{}", message);
		} else {
			debug!(event_name, "{}", message);
		}
	}

	async fn track(&self, params: TrackParams) -> Result<FlushOutcome> {
		self.require_api_key("track")?;

		if !validate_event_name(&params.event) {
			warn!(event_name = %params.event, "Rejected event with blank name");
			return Err(TallyError::ValidationFailed(
				"event name must not be blank".to_string(),
			));
		}

		let properties = object_or_empty(params.properties).inspect_err(|_| {
			warn!(event_name = %params.event, "Rejected event with non-object properties");
		})?;

		let user_id = self.identity.resolve_user_id(params.user_id.as_deref()).await;
		let external_id = self
			.identity
			.resolve_external_id(params.external_id.as_deref())
			.await;

		let device_data = if params.enrich_device_data && self.options.auto_enrich {
			Some(device_properties(self.enrichment.as_ref()).await)
		} else {
			None
		};

		let properties = {
			let defaults = self.default_properties.read().await;
			apply_default_properties(properties, &defaults)
		};

		let anonymous_id = self.identity.get_or_create_anonymous_id().await;
		let record = EventRecord::new(self.clock.now_millis(), params.event, anonymous_id)
			.with_properties(properties)
			.with_user_id(user_id)
			.with_external_id(external_id)
			.with_session_id(self.session.session_id().await)
			.with_device_data(device_data);

		let event_name = record.name.clone();
		if let Err(e) = self.engine.enqueue(record).await {
			warn!(event_name = %event_name, error = %e, "Queued event could not be persisted");
		}
		self.log_event(&event_name, "Queued event");

		Ok(self.engine.maybe_flush(params.send_immediately).await)
	}

	async fn track_batch(&self, events: Vec<TrackParams>) -> Result<FlushOutcome> {
		self.require_api_key("track_batch")?;

		let total = events.len();
		let mut rejected = 0usize;
		for mut params in events {
			params.send_immediately = false;
			if self.track(params).await.is_err() {
				rejected += 1;
			}
		}
		debug!(total, rejected, "Queued event batch");

		Ok(self.engine.maybe_flush(true).await)
	}

	async fn identify(&self, params: IdentifyParams) -> Result<bool> {
		let api_key = self.require_api_key("identify")?;

		let properties = object_or_empty(params.properties).inspect_err(|_| {
			warn!("Rejected identify call with non-object properties");
		})?;

		let user_id = self.identity.resolve_user_id(params.user_id.as_deref()).await;
		let external_id = self
			.identity
			.resolve_external_id(params.external_id.as_deref())
			.await;

		let device_data = if params.enrich_device_data && self.options.auto_enrich {
			Some(device_properties(self.enrichment.as_ref()).await)
		} else {
			None
		};
		let location_enrichment = params.enrich_location_data && self.options.auto_enrich;

		let payload = ProfilePayload::new(self.identity.get_or_create_anonymous_id().await)
			.with_user_id(user_id)
			.with_external_id(external_id)
			.with_properties(properties)
			.with_device_data(device_data);
		let request = DeliveryRequest::profile(&payload, location_enrichment)?;

		match self.transport.send(api_key, &request).await {
			Ok(()) => {
				self.log_event("identify", "Profile sent");
				Ok(true)
			}
			Err(e) => {
				warn!(error = %e, "Failed to send profile");
				Ok(false)
			}
		}
	}

	async fn track_screen_view(&self, screen_name: &str, properties: Option<Value>) -> Result<FlushOutcome> {
		let extra = object_or_empty(properties)?;

		let now = self.clock.now_millis();
		let previous = self.current_screen.lock().await.replace(ScreenState {
			name: screen_name.to_string(),
			started_at: now,
		});

		let mut props = Properties::new()
			.insert("screenName", screen_name)
			.insert_opt("previousScreen", previous.as_ref().map(|p| p.name.clone()))
			.merge(extra);
		if let Some(previous) = previous {
			props = props.insert(
				"previousScreenTime",
				round_secs(now - previous.started_at),
			);
		}

		self
			.track(
				TrackParams::new(lifecycle_events::SCREEN_VIEW)
					.properties(props)
					.send_immediately(),
			)
			.await
	}

	async fn track_app_open(&self, deep_link: Option<String>) -> Result<FlushOutcome> {
		let mut props = Properties::new().insert_opt("deepLink", deep_link);
		if self.options.auto_enrich {
			props = props.with_device(&device_properties(self.enrichment.as_ref()).await);
		}

		self
			.track(
				TrackParams::new(lifecycle_events::APP_OPEN)
					.properties(props)
					.send_immediately(),
			)
			.await
	}

	async fn track_app_background(&self) -> Result<FlushOutcome> {
		let props =
			Properties::new().insert_opt("sessionDuration", self.session.session_duration_secs().await);

		self
			.track(TrackParams::new(lifecycle_events::APP_BACKGROUND).properties(props))
			.await
	}

	async fn reset(&self) -> Result<()> {
		let outcome = self.engine.maybe_flush(true).await;
		debug!(outcome = ?outcome, "Flushed before reset");

		self.engine.clear().await?;
		self.session.clear().await;
		let anonymous_id = self.identity.reset().await?;
		*self.current_screen.lock().await = None;
		if self.session.is_enabled() {
			self.session.start_session().await;
		}

		info!(anonymous_id = %anonymous_id, "Client state reset");
		Ok(())
	}
}

#[async_trait::async_trait]
impl LifecycleListener for ClientInner {
	async fn on_foreground(&self) {
		if self.session.on_foreground().await {
			debug!("Session rotated on foreground");
		}
		if let Err(e) = self.track_app_open(None).await {
			warn!(kind = ?e.kind(), error = %e, "Failed to track app open");
		}
	}

	async fn on_background(&self) {
		if let Err(e) = self.track_app_background().await {
			warn!(kind = ?e.kind(), error = %e, "Failed to track app background");
		}
		self.engine.maybe_flush(true).await;
	}

	async fn on_connectivity(&self, connected: bool) {
		self.network.observe(connected);
		if connected && self.engine.queue_len().await > 0 {
			debug!("Connectivity restored, flushing queued events");
			self.engine.maybe_flush(true).await;
		}
	}

	async fn on_tick(&self) {
		self.engine.maybe_flush(true).await;
	}
}

fn object_or_empty(properties: Option<Value>) -> Result<Value> {
	match properties {
		None | Some(Value::Null) => Ok(Value::Object(Map::new())),
		Some(value @ Value::Object(_)) => Ok(value),
		Some(_) => Err(TallyError::ValidationFailed(
			"properties must be a JSON object".to_string(),
		)),
	}
}

fn round_secs(millis: i64) -> i64 {
	(millis as f64 / 1000.0).round() as i64
}

/// Client for tracking events and identifying users.
///
/// Cloning is cheap; all clones share one queue, identity and session.
///
/// # Example
///
/// ```ignore
/// use tally::{Tally, TrackParams, Properties};
///
/// let client = Tally::builder()
///     .api_key("key_xxx")
///     .base_url("https://ingest.example.com")
///     .build()
///     .await?;
///
/// client
///     .track(TrackParams::new("checkout_started").properties(
///         Properties::new().insert("cart_value", 42.5),
///     ))
///     .await?;
///
/// client.flush().await;
/// client.cleanup();
/// ```
#[derive(Clone)]
pub struct Tally {
	inner: Arc<ClientInner>,
}

impl Tally {
	pub fn builder() -> TallyBuilder {
		TallyBuilder::new()
	}

	async fn run_auto_capture(&self) {
		if self.inner.options.captures_screen_views() {
			info!("Screen view capture enabled, call track_screen_view when the visible screen changes");
		}
		if self.inner.options.captures_app_opens() {
			if let Err(e) = self.inner.track_app_open(None).await {
				warn!(kind = ?e.kind(), error = %e, "Failed to track app open");
			}
		}
	}

	/// Queues an event.
	///
	/// Returns an error only for configuration and validation problems. The
	/// returned [`FlushOutcome`] describes the delivery attempt this call
	/// triggered, if any.
	pub async fn track(&self, params: TrackParams) -> Result<FlushOutcome> {
		self.inner.track(params).await
	}

	/// Queues every event without flushing in between, then forces a flush.
	/// Invalid events are logged and skipped.
	pub async fn track_batch(&self, events: Vec<TrackParams>) -> Result<FlushOutcome> {
		self.inner.track_batch(events).await
	}

	/// Sends a profile update directly to the profile endpoint. Returns
	/// whether the server accepted it; profiles are not queued.
	pub async fn identify(&self, params: IdentifyParams) -> Result<bool> {
		self.inner.identify(params).await
	}

	/// Records a screen view with the previous screen and the whole seconds
	/// spent on it.
	pub async fn track_screen_view(
		&self,
		screen_name: &str,
		properties: Option<Value>,
	) -> Result<FlushOutcome> {
		self.inner.track_screen_view(screen_name, properties).await
	}

	pub async fn track_app_open(&self, deep_link: Option<String>) -> Result<FlushOutcome> {
		self.inner.track_app_open(deep_link).await
	}

	pub async fn track_app_background(&self) -> Result<FlushOutcome> {
		self.inner.track_app_background().await
	}

	/// Forces a delivery attempt.
	pub async fn flush(&self) -> FlushOutcome {
		self.inner.engine.maybe_flush(true).await
	}

	/// Flushes, then drops queued events and all identity and starts over
	/// with a fresh anonymous id and session.
	pub async fn reset(&self) -> Result<()> {
		self.inner.reset().await
	}

	/// Stops the lifecycle task and pending retries. Queued events stay
	/// persisted for the next start; in-flight requests complete.
	pub fn cleanup(&self) {
		self.inner.engine.shutdown();
		info!("Telemetry client stopped");
	}

	pub async fn set_user_id(&self, user_id: Option<String>) -> Result<()> {
		self.inner.identity.set_user_id(user_id).await
	}

	pub async fn set_external_id(&self, external_id: Option<String>) -> Result<()> {
		self.inner.identity.set_external_id(external_id).await
	}

	pub async fn user_id(&self) -> Option<String> {
		self.inner.identity.user_id().await
	}

	pub async fn external_id(&self) -> Option<String> {
		self.inner.identity.external_id().await
	}

	pub async fn anonymous_id(&self) -> String {
		self.inner.identity.get_or_create_anonymous_id().await
	}

	/// Current session id. Counts as activity and may rotate an expired
	/// session.
	pub async fn session_id(&self) -> Option<String> {
		self.inner.session.session_id().await
	}

	/// Replaces the default tracking properties. Must be a JSON object.
	pub async fn update_default_tracking_properties(&self, properties: impl Into<Value>) -> Result<()> {
		match properties.into() {
			Value::Object(map) => {
				*self.inner.default_properties.write().await = map;
				Ok(())
			}
			_ => {
				warn!("Default tracking properties must be an object");
				Err(TallyError::ValidationFailed(
					"default tracking properties must be a JSON object".to_string(),
				))
			}
		}
	}

	pub async fn queue_len(&self) -> usize {
		self.inner.engine.queue_len().await
	}

	/// Queued events not yet confirmed, oldest first.
	pub async fn queued_events(&self) -> Vec<EventRecord> {
		self.inner.engine.snapshot().await
	}

	pub async fn consecutive_failures(&self) -> u32 {
		self.inner.engine.consecutive_failures().await
	}

	/// Handle for forwarding app-state and connectivity changes.
	pub fn lifecycle(&self) -> LifecycleHandle {
		self.inner.lifecycle.clone()
	}

	pub fn options(&self) -> &TallyOptions {
		&self.inner.options
	}

	pub fn has_api_key(&self) -> bool {
		self.inner.api_key.is_some()
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client options and delivery tuning.
//!
//! [`TallyOptions`] is the host-facing option surface and deserializes from
//! JSON or TOML with every field optional. [`DeliveryConfig`] holds the timing
//! constants of the delivery engine.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default inactivity window after which a session rotates.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Events the SDK captures on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCapture {
	/// Screen views. The host still reports screen changes through
	/// `track_screen_view`.
	ScreenViews,
	/// `app_open` on start and foreground, `app_background` on background.
	AppOpens,
	/// Everything above.
	All,
}

/// Options recognized by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TallyOptions {
	pub auto_capture: BTreeSet<AutoCapture>,
	/// Toggles device and location enrichment together.
	pub auto_enrich: bool,
	/// Merged into every event; these values win on key collision.
	pub default_tracking_properties: Map<String, Value>,
	pub track_session: bool,
	/// Keep the user id in memory only.
	pub disable_user_id_storage: bool,
	/// Advisory: emulator detection is logged, events are not blocked.
	pub block_common_bots: bool,
	/// Raises per-event logs from `debug` to `info`.
	pub debug_mode: bool,
	#[serde(with = "duration_ms")]
	pub session_timeout: Duration,
}

impl Default for TallyOptions {
	fn default() -> Self {
		Self {
			auto_capture: BTreeSet::new(),
			auto_enrich: true,
			default_tracking_properties: Map::new(),
			track_session: true,
			disable_user_id_storage: false,
			block_common_bots: true,
			debug_mode: false,
			session_timeout: DEFAULT_SESSION_TIMEOUT,
		}
	}
}

impl TallyOptions {
	pub fn captures_screen_views(&self) -> bool {
		self.auto_capture.contains(&AutoCapture::ScreenViews)
			|| self.auto_capture.contains(&AutoCapture::All)
	}

	pub fn captures_app_opens(&self) -> bool {
		self.auto_capture.contains(&AutoCapture::AppOpens)
			|| self.auto_capture.contains(&AutoCapture::All)
	}
}

/// Timing and sizing of the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
	/// Maximum records per delivery attempt; also the queue length that
	/// triggers a flush without forcing.
	pub batch_threshold: usize,
	/// Period of the background forced flush.
	pub flush_interval: Duration,
	/// Delay before draining the remainder of a non-empty queue.
	pub retry_delay: Duration,
	/// Consecutive failures that suspend delivery.
	pub max_consecutive_failures: u32,
	/// How long delivery stays suspended.
	pub failure_cooldown: Duration,
	/// Timeout applied by the HTTP transport.
	pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			batch_threshold: 10,
			flush_interval: Duration::from_millis(1500),
			retry_delay: Duration::from_millis(1000),
			max_consecutive_failures: 3,
			failure_cooldown: Duration::from_secs(60),
			request_timeout: Duration::from_secs(10),
		}
	}
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

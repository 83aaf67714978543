// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event records queued for delivery.
//!
//! An [`EventRecord`] is created once at enqueue time and never edited
//! afterwards: only its position in the queue changes while it waits for a
//! successful send.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::DeviceProperties;
use crate::identity::is_blank_identity;

/// A single tracked event together with the identity snapshot taken when it
/// was enqueued.
///
/// Absent identity fields serialize as `null`, matching what the ingestion
/// endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	/// Creation time in epoch milliseconds.
	pub timestamp: i64,
	pub name: String,
	#[serde(default = "empty_object")]
	pub properties: Value,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub external_id: Option<String>,
	pub anonymous_id: String,
	#[serde(default)]
	pub session_id: Option<String>,
	#[serde(default)]
	pub device_data: Option<DeviceProperties>,
}

fn empty_object() -> Value {
	Value::Object(Map::new())
}

impl EventRecord {
	/// Creates a record with empty properties and no user, session or device data.
	pub fn new(timestamp: i64, name: impl Into<String>, anonymous_id: impl Into<String>) -> Self {
		Self {
			timestamp,
			name: name.into(),
			properties: empty_object(),
			user_id: None,
			external_id: None,
			anonymous_id: anonymous_id.into(),
			session_id: None,
			device_data: None,
		}
	}

	pub fn with_properties(mut self, properties: Value) -> Self {
		self.properties = properties;
		self
	}

	pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
		self.user_id = user_id;
		self
	}

	pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
		self.external_id = external_id;
		self
	}

	pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
		self.session_id = session_id;
		self
	}

	pub fn with_device_data(mut self, device_data: Option<DeviceProperties>) -> Self {
		self.device_data = device_data;
		self
	}
}

/// Body of a batch ingest request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
	pub events: Vec<EventRecord>,
}

/// Validates an event name.
///
/// A name is rejected when it is empty, whitespace-only, or one of the
/// placeholder strings `"null"` / `"undefined"` that hosts pass by accident.
pub fn validate_event_name(name: &str) -> bool {
	!is_blank_identity(name)
}

/// Merges the configured default properties into event properties.
///
/// Defaults are applied last, so a default wins over an event property with
/// the same key. Non-object inputs are treated as empty.
pub fn apply_default_properties(properties: Value, defaults: &Map<String, Value>) -> Value {
	let mut merged = match properties {
		Value::Object(map) => map,
		_ => Map::new(),
	};
	for (key, value) in defaults {
		merged.insert(key.clone(), value.clone());
	}
	Value::Object(merged)
}

/// Event names emitted by the SDK itself.
pub mod lifecycle_events {
	/// The app was opened or returned to the foreground.
	pub const APP_OPEN: &str = "app_open";
	/// The app moved to the background.
	pub const APP_BACKGROUND: &str = "app_background";
	/// The host reported a screen change.
	pub const SCREEN_VIEW: &str = "screen_view";
}

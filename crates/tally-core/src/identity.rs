// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity normalization and the identify payload.
//!
//! Hosts frequently pass identity values straight from UI state, so empty
//! strings and the literal strings `"null"` / `"undefined"` show up where no
//! identity is meant. Every identity value goes through [`normalize_identity`]
//! before it is stored or stamped onto an event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceProperties;

/// Returns true when a value must be treated as "no identity".
pub fn is_blank_identity(value: &str) -> bool {
	let trimmed = value.trim();
	trimmed.is_empty() || trimmed == "null" || trimmed == "undefined"
}

/// Normalizes an optional identity value, mapping blank placeholders to `None`.
pub fn normalize_identity(value: Option<&str>) -> Option<String> {
	match value {
		Some(v) if !is_blank_identity(v) => Some(v.to_string()),
		_ => None,
	}
}

/// Generates a random version-4 UUID string, used for anonymous and session ids.
pub fn generate_id() -> String {
	Uuid::new_v4().to_string()
}

/// Body of a profile (identify) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
	pub user_id: Option<String>,
	pub external_id: Option<String>,
	pub anonymous_id: String,
	#[serde(default)]
	pub properties: serde_json::Value,
	#[serde(default)]
	pub device_data: Option<DeviceProperties>,
}

impl ProfilePayload {
	/// Creates a payload for the given anonymous id with empty properties.
	pub fn new(anonymous_id: impl Into<String>) -> Self {
		Self {
			user_id: None,
			external_id: None,
			anonymous_id: anonymous_id.into(),
			properties: serde_json::json!({}),
			device_data: None,
		}
	}

	pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
		self.user_id = user_id;
		self
	}

	pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
		self.external_id = external_id;
		self
	}

	pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
		self.properties = properties;
		self
	}

	pub fn with_device_data(mut self, device_data: Option<DeviceProperties>) -> Self {
		self.device_data = device_data;
		self
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device enrichment snapshot.

use serde::{Deserialize, Serialize};

/// Device and environment context attached to events and profiles.
///
/// Every field is optional; unknown values are omitted from the serialized
/// object instead of being sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProperties {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub platform_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_brand: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_manufacturer: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_build_number: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bundle_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_tablet: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub screen_width: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub screen_height: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub screen_scale: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timezone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub locale: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub country: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unique_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub carrier: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_memory: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_disk_capacity: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_emulator: Option<bool>,
}

impl DeviceProperties {
	/// Keeps only the fields that are cheap and always available: platform and
	/// screen geometry. Used when a full collection fails part way.
	pub fn minimal(&self) -> Self {
		Self {
			platform: self.platform.clone(),
			platform_version: self.platform_version.clone(),
			screen_width: self.screen_width,
			screen_height: self.screen_height,
			..Self::default()
		}
	}
}

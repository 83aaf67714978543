// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device enrichment.
//!
//! Collection is delegated to an [`EnrichmentProvider`]. A provider that fails
//! part way still yields its [`minimal`](EnrichmentProvider::minimal) snapshot,
//! so enrichment never blocks an event.

use std::sync::Arc;

use tally_core::DeviceProperties;
use tracing::warn;

use crate::error::Result;

/// Supplies device context for events and profiles.
#[async_trait::async_trait]
pub trait EnrichmentProvider: Send + Sync {
	/// Collects the full device snapshot.
	async fn collect(&self) -> Result<DeviceProperties>;

	/// Snapshot used when [`collect`](Self::collect) fails.
	fn minimal(&self) -> DeviceProperties;

	/// Whether the process runs on an emulator or simulator.
	async fn is_emulator(&self) -> bool {
		false
	}
}

/// Shared provider handle.
pub type SharedEnrichmentProvider = Arc<dyn EnrichmentProvider>;

/// Collects device properties, falling back to the minimal snapshot.
pub async fn device_properties(provider: &dyn EnrichmentProvider) -> DeviceProperties {
	match provider.collect().await {
		Ok(props) => props,
		Err(e) => {
			warn!(error = %e, "Failed to collect device properties, using minimal set");
			provider.minimal()
		}
	}
}

/// Provider describing the host process from the standard library and
/// environment alone.
#[derive(Debug, Clone, Default)]
pub struct SystemEnrichment {
	app_version: Option<String>,
	bundle_id: Option<String>,
}

impl SystemEnrichment {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the host application version reported as `appVersion`.
	pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
		self.app_version = Some(version.into());
		self
	}

	/// Sets the host application identifier reported as `bundleId`.
	pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
		self.bundle_id = Some(bundle_id.into());
		self
	}
}

#[async_trait::async_trait]
impl EnrichmentProvider for SystemEnrichment {
	async fn collect(&self) -> Result<DeviceProperties> {
		let locale = std::env::var("LC_ALL")
			.or_else(|_| std::env::var("LANG"))
			.ok()
			.and_then(|l| l.split('.').next().map(str::to_string))
			.filter(|l| !l.is_empty());

		Ok(DeviceProperties {
			system_name: Some(std::env::consts::FAMILY.to_string()),
			device_model: Some(std::env::consts::ARCH.to_string()),
			device_type: Some("Desktop".to_string()),
			app_version: self.app_version.clone(),
			bundle_id: self.bundle_id.clone(),
			timezone: Some(chrono::Local::now().offset().to_string()),
			locale,
			is_emulator: Some(false),
			..self.minimal()
		})
	}

	fn minimal(&self) -> DeviceProperties {
		DeviceProperties {
			platform: Some(std::env::consts::OS.to_string()),
			..Default::default()
		}
	}
}

/// Provider returning a fixed snapshot, for hosts that collect device data
/// once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticEnrichment {
	properties: DeviceProperties,
	emulator: bool,
}

impl StaticEnrichment {
	pub fn new(properties: DeviceProperties) -> Self {
		Self {
			emulator: properties.is_emulator.unwrap_or(false),
			properties,
		}
	}
}

#[async_trait::async_trait]
impl EnrichmentProvider for StaticEnrichment {
	async fn collect(&self) -> Result<DeviceProperties> {
		Ok(self.properties.clone())
	}

	fn minimal(&self) -> DeviceProperties {
		self.properties.minimal()
	}

	async fn is_emulator(&self) -> bool {
		self.emulator
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::TallyError;

	struct FailingProvider;

	#[async_trait::async_trait]
	impl EnrichmentProvider for FailingProvider {
		async fn collect(&self) -> Result<DeviceProperties> {
			Err(TallyError::Storage("carrier lookup failed".into()))
		}

		fn minimal(&self) -> DeviceProperties {
			DeviceProperties {
				platform: Some("android".to_string()),
				..Default::default()
			}
		}
	}

	#[tokio::test]
	async fn test_failure_falls_back_to_minimal() {
		let props = device_properties(&FailingProvider).await;
		assert_eq!(props.platform.as_deref(), Some("android"));
		assert!(props.device_model.is_none());
	}

	#[tokio::test]
	async fn test_system_enrichment_reports_platform() {
		let provider = SystemEnrichment::new().with_app_version("1.2.3");
		let props = device_properties(&provider).await;

		assert_eq!(props.platform.as_deref(), Some(std::env::consts::OS));
		assert_eq!(props.app_version.as_deref(), Some("1.2.3"));
		assert!(props.timezone.is_some());
		assert!(!provider.is_emulator().await);
	}

	#[tokio::test]
	async fn test_static_enrichment_reports_emulator() {
		let provider = StaticEnrichment::new(DeviceProperties {
			platform: Some("ios".to_string()),
			is_emulator: Some(true),
			..Default::default()
		});
		assert!(provider.is_emulator().await);
		assert_eq!(
			provider.collect().await.unwrap().platform.as_deref(),
			Some("ios")
		);
	}
}

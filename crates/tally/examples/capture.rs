// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Captures a handful of events against an ingestion endpoint.
//!
//! ```text
//! TALLY_API_KEY=key_xxx TALLY_BASE_URL=https://ingest.example.com \
//!     RUST_LOG=tally=debug cargo run -p tally --example capture
//! ```

use std::time::Duration;

use serde_json::json;
use tally::{
	AppState, AutoCapture, IdentifyParams, Properties, SystemEnrichment, Tally, TallyOptions,
	TrackParams,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let api_key = std::env::var("TALLY_API_KEY").unwrap_or_default();
	let base_url =
		std::env::var("TALLY_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

	let mut options = TallyOptions {
		auto_capture: [AutoCapture::All].into_iter().collect(),
		debug_mode: true,
		..Default::default()
	};
	options
		.default_tracking_properties
		.insert("source".to_string(), json!("capture-example"));

	let client = Tally::builder()
		.api_key(api_key)
		.base_url(base_url)
		.options(options)
		.enrichment(std::sync::Arc::new(
			SystemEnrichment::new().with_app_version(env!("CARGO_PKG_VERSION")),
		))
		.build()
		.await?;

	tracing::info!(anonymous_id = %client.anonymous_id().await, "Client ready");

	client
		.identify(
			IdentifyParams::new()
				.user_id("example_user")
				.properties(Properties::new().insert("plan", "trial")),
		)
		.await?;

	client.track_screen_view("Home", None).await?;
	for step in 1..=3 {
		client
			.track(
				TrackParams::new("onboarding_step")
					.properties(Properties::new().insert("step", step)),
			)
			.await?;
	}
	client.track_screen_view("Settings", Some(json!({"entry": "menu"}))).await?;

	let lifecycle = client.lifecycle();
	lifecycle.app_state_changed(AppState::Background).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;

	tracing::info!(queued = client.queue_len().await, "Shutting down");
	client.cleanup();
	Ok(())
}

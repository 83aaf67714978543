// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request execution against the ingestion API.
//!
//! A [`Transport`] performs exactly one request per call and reports success
//! or failure. It never retries; the delivery engine decides what happens to
//! a failed batch.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tally_core::{EventBatch, EventRecord, ProfilePayload};
use tracing::debug;

use crate::error::{Result, TallyError};

/// Ingestion endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
	/// `POST /event/ingest/batch`
	EventBatch,
	/// `POST /profile`
	Profile,
}

impl Endpoint {
	pub fn path(&self) -> &'static str {
		match self {
			Endpoint::EventBatch => "event/ingest/batch",
			Endpoint::Profile => "profile",
		}
	}
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
	pub endpoint: Endpoint,
	pub location_enrichment: bool,
	pub body: Value,
}

impl DeliveryRequest {
	/// Builds a batch ingest request carrying `events`.
	pub fn event_batch(events: &[EventRecord], location_enrichment: bool) -> Result<Self> {
		let body = serde_json::to_value(EventBatch {
			events: events.to_vec(),
		})?;
		Ok(Self {
			endpoint: Endpoint::EventBatch,
			location_enrichment,
			body,
		})
	}

	/// Builds a profile request.
	pub fn profile(payload: &ProfilePayload, location_enrichment: bool) -> Result<Self> {
		Ok(Self {
			endpoint: Endpoint::Profile,
			location_enrichment,
			body: serde_json::to_value(payload)?,
		})
	}

	/// Number of events carried by a batch request.
	pub fn event_count(&self) -> usize {
		self
			.body
			.get("events")
			.and_then(Value::as_array)
			.map_or(0, Vec::len)
	}
}

/// Executes requests against the ingestion API.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
	/// Sends one request. Any non-success outcome is an error.
	async fn send(&self, api_key: &str, request: &DeliveryRequest) -> Result<()>;
}

/// HTTP transport built on `reqwest`.
pub struct HttpTransport {
	http_client: Client,
	base_url: String,
}

impl HttpTransport {
	/// Creates a transport for `base_url` with the given request timeout.
	pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
		let base_url = base_url.into();
		let base_url = base_url.trim_end_matches('/').to_string();
		if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
			return Err(TallyError::InvalidBaseUrl);
		}

		let http_client = tally_common_http::new_client_with_timeout(request_timeout)
			.map_err(TallyError::RequestFailed)?;

		Ok(Self {
			http_client,
			base_url,
		})
	}

	/// Creates a transport around an existing client.
	pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
		Self {
			http_client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
		}
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	fn url_for(&self, request: &DeliveryRequest) -> String {
		format!(
			"{}/{}?locationEnrichment={}",
			self.base_url,
			request.endpoint.path(),
			request.location_enrichment
		)
	}
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
	async fn send(&self, api_key: &str, request: &DeliveryRequest) -> Result<()> {
		let url = self.url_for(request);
		debug!(url = %url, endpoint = ?request.endpoint, "Sending request");

		let response = self
			.http_client
			.post(&url)
			.header("Authorization", format!("Bearer {}", api_key))
			.json(&request.body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(TallyError::ServerError {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use wiremock::matchers::{body_partial_json, header, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn record(name: &str) -> EventRecord {
		EventRecord::new(1_700_000_000_000, name, "anon-1")
	}

	#[test]
	fn test_rejects_non_http_base_url() {
		let result = HttpTransport::new("ftp://example.com", Duration::from_secs(1));
		assert!(matches!(result, Err(TallyError::InvalidBaseUrl)));
	}

	#[test]
	fn test_trailing_slash_is_trimmed() {
		let transport = HttpTransport::new("https://example.com/", Duration::from_secs(1)).unwrap();
		assert_eq!(transport.base_url(), "https://example.com");

		let request = DeliveryRequest::event_batch(&[record("e1")], true).unwrap();
		assert_eq!(
			transport.url_for(&request),
			"https://example.com/event/ingest/batch?locationEnrichment=true"
		);
	}

	#[test]
	fn test_event_batch_body_shape() {
		let request = DeliveryRequest::event_batch(&[record("e1"), record("e2")], false).unwrap();
		assert_eq!(request.event_count(), 2);
		assert_eq!(request.body["events"][1]["name"], "e2");
		assert_eq!(request.body["events"][0]["anonymousId"], "anon-1");
	}

	#[tokio::test]
	async fn test_batch_is_posted_with_bearer_token() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/event/ingest/batch"))
			.and(query_param("locationEnrichment", "false"))
			.and(header("Authorization", "Bearer k1"))
			.and(body_partial_json(json!({"events": [{"name": "e1"}]})))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
		let request = DeliveryRequest::event_batch(&[record("e1")], false).unwrap();

		transport.send("k1", &request).await.unwrap();
	}

	#[tokio::test]
	async fn test_profile_is_posted_to_profile_endpoint() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/profile"))
			.and(query_param("locationEnrichment", "true"))
			.and(body_partial_json(json!({"userId": "user_1", "anonymousId": "anon-1"})))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
		let payload = ProfilePayload::new("anon-1").with_user_id(Some("user_1".to_string()));
		let request = DeliveryRequest::profile(&payload, true).unwrap();

		transport.send("k1", &request).await.unwrap();
	}

	#[tokio::test]
	async fn test_non_success_status_is_server_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
			.mount(&server)
			.await;

		let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
		let request = DeliveryRequest::event_batch(&[record("e1")], true).unwrap();

		let result = transport.send("k1", &request).await;
		match result {
			Err(TallyError::ServerError { status, message }) => {
				assert_eq!(status, 503);
				assert_eq!(message, "unavailable");
			}
			other => panic!("expected server error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_connection_failure_is_request_error() {
		let transport =
			HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
		let request = DeliveryRequest::event_batch(&[record("e1")], true).unwrap();

		let result = transport.send("k1", &request).await;
		assert!(matches!(result, Err(TallyError::RequestFailed(_))));
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side telemetry buffer.
//!
//! Tally accepts track and identify calls from a host application, stamps them
//! with identity and session context, and delivers them to an ingestion API in
//! batches. Events survive network failures, suspension and process restarts:
//! the queue is persisted on every change and a record only leaves it once the
//! server has accepted it.
//!
//! # Quick Start
//!
//! ```ignore
//! use tally::{Properties, Tally, TrackParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Tally::builder()
//!         .api_key("key_xxx")
//!         .base_url("https://ingest.example.com")
//!         .build()
//!         .await?;
//!
//!     client.track(TrackParams::new("button_clicked").properties(
//!         Properties::new()
//!             .insert("button_name", "checkout")
//!             .insert("page", "/cart"),
//!     )).await?;
//!
//!     client.cleanup();
//!     Ok(())
//! }
//! ```
//!
//! # Delivery
//!
//! Events are sent in batches of up to 10:
//!
//! - when 10 or more events are queued
//! - every 1.5 seconds while the client runs
//! - when a call asks for it with [`TrackParams::send_immediately`]
//! - when the app moves to the background or connectivity returns
//!
//! A failed batch is put back at the head of the queue. After 3 consecutive
//! failures delivery pauses for 60 seconds; the queue keeps accepting events
//! meanwhile.
//!
//! # Lifecycle
//!
//! Hosts forward app-state and connectivity changes through
//! [`Tally::lifecycle`]:
//!
//! ```ignore
//! use tally::AppState;
//!
//! let lifecycle = client.lifecycle();
//! lifecycle.app_state_changed(AppState::Background).await?;
//! lifecycle.connectivity_changed(true).await?;
//! ```
//!
//! # Error Handling
//!
//! Tracking calls return errors only for configuration and validation
//! problems. Delivery results are reported as a [`FlushOutcome`]:
//!
//! ```ignore
//! use tally::{FlushOutcome, TallyError};
//!
//! match client.track(TrackParams::new("signup")).await {
//!     Ok(FlushOutcome::Failed { error, .. }) => eprintln!("will retry: {error}"),
//!     Ok(_) => {}
//!     Err(TallyError::ValidationFailed(msg)) => eprintln!("invalid event: {msg}"),
//!     Err(e) => eprintln!("not tracked: {e}"),
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod network;
pub mod properties;
pub mod queue;
pub mod session;
pub mod store;
pub mod transport;

pub use client::{IdentifyParams, Tally, TallyBuilder, TrackParams};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AutoCapture, DeliveryConfig, TallyOptions, DEFAULT_SESSION_TIMEOUT};
pub use enrichment::{EnrichmentProvider, SharedEnrichmentProvider, StaticEnrichment, SystemEnrichment};
pub use error::{ErrorKind, Result, TallyError};
pub use identity::{IdentityResolver, IdentityState};
pub use lifecycle::{AppState, LifecycleHandle, LifecycleSignal};
pub use network::{NetworkMonitor, SharedNetworkStatus};
pub use properties::Properties;
pub use queue::{DeliveryEngine, FlushOutcome};
pub use session::{SessionManager, SessionState};
pub use store::{DurableStore, FileStore, MemoryStore};
pub use transport::{DeliveryRequest, Endpoint, HttpTransport, Transport};

pub use tally_core::{DeviceProperties, EventRecord, ProfilePayload};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Tally telemetry SDK.
//!
//! This crate holds the wire model shared by the queue, the transport and any
//! server-side consumer of the ingestion payloads:
//!
//! - [`EventRecord`]: one queued unit of work, serialized in camelCase
//! - [`ProfilePayload`]: the body of an identify call
//! - [`DeviceProperties`]: the optional enrichment snapshot
//! - identity normalization rules shared by `track` and `identify`
//!
//! # Example
//!
//! ```
//! use tally_core::{normalize_identity, EventRecord};
//!
//! let record = EventRecord::new(1_700_000_000_000, "checkout_completed", "anon-1")
//!     .with_user_id(normalize_identity(Some("user_123")))
//!     .with_properties(serde_json::json!({"total": 99.99}));
//!
//! assert_eq!(record.user_id.as_deref(), Some("user_123"));
//! assert_eq!(normalize_identity(Some("undefined")), None);
//! ```

pub mod device;
pub mod event;
pub mod identity;

pub use device::DeviceProperties;
pub use event::{
	apply_default_properties, lifecycle_events, validate_event_name, EventBatch, EventRecord,
};
pub use identity::{generate_id, is_blank_identity, normalize_identity, ProfilePayload};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Tally.
//!
//! Provides a pre-configured `reqwest` client builder with a consistent
//! User-Agent header. Requests built here are sent once; retry and backoff
//! belong to the delivery engine.

mod client;

pub use client::{builder, builder_with_user_agent, new_client_with_timeout, user_agent};

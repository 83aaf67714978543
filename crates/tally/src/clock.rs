// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wall-clock source for event timestamps and session expiry.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
	fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_millis(&self) -> i64 {
		Utc::now().timestamp_millis()
	}
}

/// A clock that only moves when told to. Useful for hosts testing their own
/// session handling.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn new(start_millis: i64) -> Self {
		Self {
			now: AtomicI64::new(start_millis),
		}
	}

	pub fn set(&self, millis: i64) {
		self.now.store(millis, Ordering::SeqCst);
	}

	pub fn advance(&self, millis: i64) {
		self.now.fetch_add(millis, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_millis(&self) -> i64 {
		self.now.load(Ordering::SeqCst)
	}
}

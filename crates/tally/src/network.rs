// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connectivity checks consulted before every delivery attempt.

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the device currently has network connectivity.
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
	async fn is_connected(&self) -> bool;

	/// Receives connectivity changes forwarded by the lifecycle coordinator.
	/// Monitors that query the platform directly can ignore these.
	fn observe(&self, _connected: bool) {}
}

/// Monitor driven entirely by the connectivity signals the host forwards.
/// Starts out connected.
#[derive(Debug)]
pub struct SharedNetworkStatus {
	connected: AtomicBool,
}

impl SharedNetworkStatus {
	pub fn new(connected: bool) -> Self {
		Self {
			connected: AtomicBool::new(connected),
		}
	}

	pub fn set_connected(&self, connected: bool) {
		self.connected.store(connected, Ordering::SeqCst);
	}
}

impl Default for SharedNetworkStatus {
	fn default() -> Self {
		Self::new(true)
	}
}

#[async_trait::async_trait]
impl NetworkMonitor for SharedNetworkStatus {
	async fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	fn observe(&self, connected: bool) {
		self.set_connected(connected);
	}
}

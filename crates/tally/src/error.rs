// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the telemetry SDK.

use thiserror::Error;

/// Broad category of a [`TallyError`], used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Missing API key or unusable client setup. Logged, never retried.
	Configuration,
	/// Bad event input. The event is dropped before it reaches the queue.
	Validation,
	/// Network failure or non-2xx response. Events stay queued.
	TransientDelivery,
	/// The durable store could not be read or written.
	Storage,
}

/// Telemetry SDK errors.
#[derive(Debug, Error)]
pub enum TallyError {
	/// No API key was configured.
	#[error("API key not provided")]
	MissingApiKey,

	/// Base URL is missing or invalid.
	#[error("invalid base URL")]
	InvalidBaseUrl,

	/// Event validation failed.
	#[error("event validation failed: {0}")]
	ValidationFailed(String),

	/// HTTP request failed before a response was received.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server returned a non-success response.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// The durable store failed.
	#[error("storage error: {0}")]
	Storage(String),

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// The client was cleaned up and no longer accepts lifecycle signals.
	#[error("client has been shut down")]
	ClientShutdown,
}

impl TallyError {
	/// Returns the handling category of this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			TallyError::MissingApiKey
			| TallyError::InvalidBaseUrl
			| TallyError::ClientShutdown => ErrorKind::Configuration,
			TallyError::ValidationFailed(_) => ErrorKind::Validation,
			TallyError::RequestFailed(_) | TallyError::ServerError { .. } => {
				ErrorKind::TransientDelivery
			}
			TallyError::Storage(_) | TallyError::Serialization(_) => ErrorKind::Storage,
		}
	}

	/// Returns true if this failure counts towards the consecutive-failure
	/// breaker.
	pub fn counts_as_failure(&self) -> bool {
		matches!(
			self,
			TallyError::RequestFailed(_) | TallyError::ServerError { .. }
		)
	}
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, TallyError>;

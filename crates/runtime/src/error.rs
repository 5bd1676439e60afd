//! Error types for the runtime layer.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by transports and push-channel sources.
///
/// These never escape [`RequestCoordinator`](crate::RequestCoordinator); it
/// folds them into a [`RequestFailure`](crate::RequestFailure).
#[derive(Debug, Error)]
pub enum RuntimeError {
	/// The HTTP client failed before a response arrived.
	#[error("transport error: {0}")]
	Transport(String),

	/// The server answered with a non-success status.
	#[error("HTTP {status}: {message}")]
	Status { status: u16, message: String },

	/// Endpoint could not be joined onto the base URL.
	#[error("invalid url: {0}")]
	InvalidUrl(String),

	/// A body could not be decoded.
	#[error("decode error: {0}")]
	Decode(#[from] serde_json::Error),

	/// The push channel closed or errored.
	#[error("stream closed: {0}")]
	StreamClosed(String),
}

impl From<reqwest::Error> for RuntimeError {
	fn from(err: reqwest::Error) -> Self {
		Self::Transport(err.to_string())
	}
}

impl From<url::ParseError> for RuntimeError {
	fn from(err: url::ParseError) -> Self {
		Self::InvalidUrl(err.to_string())
	}
}

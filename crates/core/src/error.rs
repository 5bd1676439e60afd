//! Error types for the discovery tracker.

use std::path::PathBuf;

use netscope_runtime::{RequestFailure, RuntimeError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
	/// An API call failed. The failure has already been pushed to the feedback sink.
	#[error(transparent)]
	Request(#[from] RequestFailure),

	#[error("unknown discovery session: {0}")]
	UnknownSession(String),

	#[error(transparent)]
	Runtime(#[from] RuntimeError),

	#[error("failed to read config {path}: {source}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

//! REST response envelope and request bodies.

use serde::{Deserialize, Serialize};

/// Envelope wrapping every REST response body.
///
/// ```json
/// { "success": true, "data": { "session_id": "s1", ... } }
/// { "success": false, "error": "Daemon is already running discovery" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
	pub fn ok(data: T) -> Self {
		Self {
			success: true,
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(error: impl Into<String>) -> Self {
		Self {
			success: false,
			data: None,
			error: Some(error.into()),
		}
	}
}

/// Body of `POST /discovery/initiate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitiateDiscoveryRequest {
	pub daemon_id: String,
}

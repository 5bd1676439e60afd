//! Discovery progress payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::DiscoveryPhase;

/// Snapshot of one discovery session.
///
/// Pushed once per event on `/discovery/stream`, returned in bulk by
/// `/discovery/active` and as the body of a successful initiate call:
///
/// ```json
/// {
///   "session_id": "s1",
///   "daemon_id": "daemon-1",
///   "phase": "Scanning",
///   "completed": 12,
///   "total": 254,
///   "discovered_count": 3
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryUpdatePayload {
	pub session_id: String,
	pub daemon_id: String,
	pub phase: DiscoveryPhase,
	/// Items processed so far.
	#[serde(default)]
	pub completed: u64,
	/// Expected items; zero until the daemon has sized the scan.
	#[serde(default)]
	pub total: u64,
	#[serde(default)]
	pub discovered_count: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub started_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub finished_at: Option<DateTime<Utc>>,
	/// Per-session monotonic counter, when the server provides one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sequence: Option<u64>,
}

impl DiscoveryUpdatePayload {
	/// Minimal payload for `session_id` on `daemon_id` in `phase`.
	pub fn new(session_id: impl Into<String>, daemon_id: impl Into<String>, phase: DiscoveryPhase) -> Self {
		Self {
			session_id: session_id.into(),
			daemon_id: daemon_id.into(),
			phase,
			completed: 0,
			total: 0,
			discovered_count: 0,
			error: None,
			started_at: None,
			finished_at: None,
			sequence: None,
		}
	}

	pub fn with_discovered(mut self, count: u64) -> Self {
		self.discovered_count = count;
		self
	}

	pub fn with_progress(mut self, completed: u64, total: u64) -> Self {
		self.completed = completed;
		self.total = total;
		self
	}

	pub fn with_error(mut self, error: impl Into<String>) -> Self {
		self.error = Some(error.into());
		self
	}

	pub fn with_sequence(mut self, sequence: u64) -> Self {
		self.sequence = Some(sequence);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_default_to_zero() {
		let payload: DiscoveryUpdatePayload =
			serde_json::from_str(r#"{"session_id": "s1", "daemon_id": "d1", "phase": "Initiated"}"#).unwrap();
		assert_eq!(payload, DiscoveryUpdatePayload::new("s1", "d1", DiscoveryPhase::Initiated));
	}

	#[test]
	fn failed_payload_carries_error_and_timestamps() {
		let payload: DiscoveryUpdatePayload = serde_json::from_str(
			r#"{
				"session_id": "s2",
				"daemon_id": "d1",
				"phase": "Failed",
				"completed": 10,
				"total": 254,
				"discovered_count": 1,
				"error": "interface down",
				"started_at": "2024-05-01T10:00:00Z",
				"finished_at": "2024-05-01T10:00:30Z"
			}"#,
		)
		.unwrap();
		assert_eq!(payload.phase, DiscoveryPhase::Failed);
		assert_eq!(payload.error.as_deref(), Some("interface down"));
		let elapsed = payload.finished_at.unwrap() - payload.started_at.unwrap();
		assert_eq!(elapsed.num_seconds(), 30);
	}
}

//! Client-side view of one discovery session.

use std::collections::{BTreeMap, BTreeSet};

use netscope_protocol::{DiscoveryPhase, DiscoveryUpdatePayload};
use serde::Serialize;

/// Latest known state of a discovery session.
///
/// Always built from a complete [`DiscoveryUpdatePayload`]; the tracker
/// replaces the whole value on every update and never merges fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverySession {
	pub session_id: String,
	pub daemon_id: String,
	pub phase: DiscoveryPhase,
	pub completed: u64,
	pub total: u64,
	pub discovered_count: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub started_at: Option<chrono::DateTime<chrono::Utc>>,
	pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DiscoverySession {
	pub fn is_active(&self) -> bool {
		self.phase.is_active()
	}

	pub fn is_terminal(&self) -> bool {
		self.phase.is_terminal()
	}

	/// Percentage of work done, once the daemon has sized the scan.
	pub fn progress(&self) -> Option<f64> {
		if self.total == 0 {
			return None;
		}
		Some((self.completed.min(self.total) as f64 / self.total as f64) * 100.0)
	}
}

impl From<DiscoveryUpdatePayload> for DiscoverySession {
	fn from(update: DiscoveryUpdatePayload) -> Self {
		Self {
			session_id: update.session_id,
			daemon_id: update.daemon_id,
			phase: update.phase,
			completed: update.completed,
			total: update.total,
			discovered_count: update.discovered_count,
			error: update.error,
			started_at: update.started_at,
			finished_at: update.finished_at,
		}
	}
}

/// Snapshot published to tracker subscribers on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
	/// Live sessions keyed by session id, terminal ones included until pruned.
	pub sessions: BTreeMap<String, DiscoverySession>,
	/// Sessions with a cancel request in flight or awaiting confirmation.
	pub cancelling: BTreeSet<String>,
	/// Session currently selected for display.
	pub displayed: Option<String>,
}

impl TrackerSnapshot {
	pub fn displayed_session(&self) -> Option<&DiscoverySession> {
		self.displayed.as_ref().and_then(|id| self.sessions.get(id))
	}

	pub fn active(&self) -> impl Iterator<Item = &DiscoverySession> {
		self.sessions.values().filter(|s| s.is_active())
	}
}

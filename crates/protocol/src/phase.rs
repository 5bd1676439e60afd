//! Discovery session phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a discovery session as reported by the server.
///
/// Serialized with exact casing (`"Scanning"`, `"Completed"`, ...). The server
/// emits `"Complete"` for finished sessions, which is accepted as an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryPhase {
	/// Session created in the server, daemon not yet acknowledged.
	Initiated,
	/// Daemon accepted the session.
	Started,
	/// Daemon is probing the network.
	Scanning,
	#[serde(alias = "Complete")]
	Completed,
	Cancelled,
	Failed,
}

impl DiscoveryPhase {
	/// `Initiated`, `Started` and `Scanning`.
	pub fn is_active(self) -> bool {
		matches!(self, Self::Initiated | Self::Started | Self::Scanning)
	}

	/// `Completed`, `Cancelled` and `Failed`. No transition leaves these.
	pub fn is_terminal(self) -> bool {
		!self.is_active()
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Initiated => "Initiated",
			Self::Started => "Started",
			Self::Scanning => "Scanning",
			Self::Completed => "Completed",
			Self::Cancelled => "Cancelled",
			Self::Failed => "Failed",
		}
	}
}

impl fmt::Display for DiscoveryPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

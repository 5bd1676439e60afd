//! Client configuration.
//!
//! Read from `<config dir>/netscope/config.json` unless a path is given. Every
//! field is optional; a missing file means defaults.
//!
//! ```json
//! {
//!   "serverUrl": "http://localhost:60072/api",
//!   "delivery": "polling",
//!   "pollIntervalMs": 2000
//! }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netscope_runtime::Backoff;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::tracker::{Delivery, TrackerConfig};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:60072/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// API root every endpoint is appended to.
	pub server_url: String,
	pub debounce_ms: u64,
	pub delivery: Delivery,
	pub poll_interval_ms: u64,
	pub node_refresh_interval_ms: u64,
	pub reconnect_base_ms: u64,
	pub max_reconnect_attempts: u32,
	pub completed_grace_ms: u64,
	pub cancelled_grace_ms: u64,
	pub failed_grace_ms: u64,
	/// Stop the stream or poller once no session is active.
	pub stop_when_idle: bool,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_url: DEFAULT_SERVER_URL.to_string(),
			debounce_ms: 250,
			delivery: Delivery::Stream,
			poll_interval_ms: 5_000,
			node_refresh_interval_ms: 30_000,
			reconnect_base_ms: 1_000,
			max_reconnect_attempts: 5,
			completed_grace_ms: 5_000,
			cancelled_grace_ms: 3_000,
			failed_grace_ms: 5_000,
			stop_when_idle: true,
		}
	}
}

impl ClientConfig {
	/// `<config dir>/netscope/config.json`, if the platform has a config dir.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("netscope").join("config.json"))
	}

	/// Reads `path`; the file must exist.
	pub fn load(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path).map_err(|source| TrackerError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&content).map_err(|source| TrackerError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads `path` (or the default path); a missing file yields defaults.
	pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => match Self::default_path() {
				Some(path) => path,
				None => return Ok(Self::default()),
			},
		};

		match Self::load(&path) {
			Err(TrackerError::ConfigRead { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(Self::default()),
			other => other,
		}
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn node_refresh_interval(&self) -> Duration {
		Duration::from_millis(self.node_refresh_interval_ms)
	}

	/// Reconnect policy for the push channel.
	pub fn stream_config(&self) -> Backoff {
		Backoff::new(Duration::from_millis(self.reconnect_base_ms), self.max_reconnect_attempts)
	}

	pub fn tracker_config(&self) -> TrackerConfig {
		TrackerConfig {
			delivery: self.delivery,
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			backoff: self.stream_config(),
			completed_grace: Duration::from_millis(self.completed_grace_ms),
			cancelled_grace: Duration::from_millis(self.cancelled_grace_ms),
			failed_grace: Duration::from_millis(self.failed_grace_ms),
			stop_when_idle: self.stop_when_idle,
		}
	}
}

//! REST and push-channel paths, relative to the API root.

pub const INITIATE: &str = "/discovery/initiate";
pub const ACTIVE: &str = "/discovery/active";
pub const STREAM: &str = "/discovery/stream";

pub const HOSTS: &str = "/hosts";
pub const SERVICES: &str = "/services";
pub const SUBNETS: &str = "/subnets";

/// Path used to cancel the session `session_id`.
pub fn cancel(session_id: &str) -> String {
	format!("/discovery/{session_id}/cancel")
}

/// Latest known state of `session_id`, including finished sessions.
pub fn status(session_id: &str) -> String {
	format!("/discovery/{session_id}/status")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_paths_embed_session_id() {
		assert_eq!(cancel("s1"), "/discovery/s1/cancel");
		assert_eq!(status("s1"), "/discovery/s1/status");
	}
}

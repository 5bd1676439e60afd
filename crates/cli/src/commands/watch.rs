//! Live progress output.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use netscope::{DiscoverySession, TrackerSnapshot};

use crate::context::ClientContext;

const RECHECK: Duration = Duration::from_secs(1);

/// Prints session changes until delivery stops or Ctrl-C, then a collection summary.
pub async fn follow(ctx: &ClientContext) -> Result<()> {
	let mut rx = ctx.tracker.subscribe();
	let mut printed: HashMap<String, DiscoverySession> = HashMap::new();
	ctx.refresher.start_periodic();

	loop {
		let snapshot = rx.borrow_and_update().clone();
		print_changes(&snapshot, &mut printed);
		if !ctx.tracker.updates_running() {
			break;
		}

		tokio::select! {
			changed = rx.changed() => {
				if changed.is_err() {
					break;
				}
			}
			_ = tokio::time::sleep(RECHECK) => {}
			_ = tokio::signal::ctrl_c() => {
				ctx.tracker.stop_updates();
				break;
			}
		}
	}

	ctx.refresher.stop_periodic();
	ctx.refresher.refresh_all().await;
	let stores = ctx.refresher.stores();
	println!(
		"hosts: {}  services: {}  subnets: {}",
		stores.hosts.get().len(),
		stores.services.get().len(),
		stores.subnets.get().len()
	);
	Ok(())
}

fn print_changes(snapshot: &TrackerSnapshot, printed: &mut HashMap<String, DiscoverySession>) {
	for session in snapshot.sessions.values() {
		if printed.get(&session.session_id) == Some(session) {
			continue;
		}
		println!("{}", progress_line(session));
		printed.insert(session.session_id.clone(), session.clone());
	}
}

fn progress_line(session: &DiscoverySession) -> String {
	let progress = match session.progress() {
		Some(pct) => format!("{pct:.0}%"),
		None => "-".to_string(),
	};
	let mut line = format!(
		"{} {} {} {}/{} ({}) discovered={}",
		session.session_id, session.daemon_id, session.phase, session.completed, session.total, progress, session.discovered_count
	);
	if let Some(error) = &session.error {
		line.push_str(&format!(" error={error}"));
	}
	line
}

#[cfg(test)]
mod tests {
	use netscope_protocol::{DiscoveryPhase, DiscoveryUpdatePayload};

	use super::*;

	#[test]
	fn progress_line_shows_counts_and_error() {
		let session = DiscoverySession::from(
			DiscoveryUpdatePayload::new("s1", "daemon-1", DiscoveryPhase::Failed)
				.with_progress(10, 40)
				.with_discovered(2)
				.with_error("timeout"),
		);
		assert_eq!(progress_line(&session), "s1 daemon-1 Failed 10/40 (25%) discovered=2 error=timeout");
	}

	#[test]
	fn unchanged_sessions_are_not_reprinted() {
		let session = DiscoverySession::from(DiscoveryUpdatePayload::new("s1", "d1", DiscoveryPhase::Started));
		let snapshot = TrackerSnapshot {
			sessions: [("s1".to_string(), session)].into_iter().collect(),
			..TrackerSnapshot::default()
		};
		let mut printed = HashMap::new();

		print_changes(&snapshot, &mut printed);
		let before = printed.clone();
		print_changes(&snapshot, &mut printed);

		assert_eq!(printed, before);
		assert_eq!(printed.len(), 1);
	}
}

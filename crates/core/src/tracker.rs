//! Discovery session tracking.
//!
//! [`DiscoveryTracker`] owns the authoritative session map. Sessions enter it
//! from a successful initiate call, from `/discovery/active` on resume, or
//! from pushed updates, and change only by whole-value replacement when an
//! update arrives. Terminal phases are sticky: once a session has completed,
//! been cancelled or failed, later updates for it are ignored, even after the
//! entry has been pruned from the map.
//!
//! Updates are delivered over the SSE stream or, in polling mode, by
//! re-reading `/discovery/active` on an interval. Delivery is started on
//! demand and, unless configured otherwise, stopped once no session is active.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use netscope_protocol::{DiscoveryPhase, DiscoveryUpdatePayload, InitiateDiscoveryRequest, endpoints};
use futures_util::future::join_all;
use netscope_runtime::{
	Backoff, EventSource, Feedback, FeedbackSink, HttpRequest, OpenInfo, Poller, ReconnectingStream, RequestCoordinator, RequestFailure, Store, StreamError,
	StreamHandlers,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::refresh::{DataRefresher, should_refresh};
use crate::session::{DiscoverySession, TrackerSnapshot};

/// How session updates reach the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
	/// Server-Sent Events on `/discovery/stream`.
	#[default]
	Stream,
	/// Fixed-interval reads of `/discovery/active`.
	Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
	pub delivery: Delivery,
	pub poll_interval: Duration,
	pub backoff: Backoff,
	/// How long a terminal session stays visible before it is pruned.
	pub completed_grace: Duration,
	pub cancelled_grace: Duration,
	pub failed_grace: Duration,
	pub stop_when_idle: bool,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			delivery: Delivery::Stream,
			poll_interval: netscope_runtime::DISCOVERY_POLL_INTERVAL,
			backoff: Backoff::default(),
			completed_grace: Duration::from_secs(5),
			cancelled_grace: Duration::from_secs(3),
			failed_grace: Duration::from_secs(5),
			stop_when_idle: true,
		}
	}
}

impl TrackerConfig {
	fn grace_for(&self, phase: DiscoveryPhase) -> Option<Duration> {
		match phase {
			DiscoveryPhase::Completed => Some(self.completed_grace),
			DiscoveryPhase::Cancelled => Some(self.cancelled_grace),
			DiscoveryPhase::Failed => Some(self.failed_grace),
			_ => None,
		}
	}
}

/// What [`DiscoveryTracker::apply_update`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
	Applied,
	/// The session already reached a terminal phase.
	Retired,
	/// The update carried a sequence number at or below the last one seen.
	Stale,
}

/// Side effects of one applied update, run after the state lock is released.
#[derive(Default)]
struct Effects {
	refresh: bool,
	feedback: Option<Feedback>,
	prune: Option<(String, Duration)>,
	idle: bool,
}

#[derive(Default)]
struct SessionState {
	sessions: BTreeMap<String, DiscoverySession>,
	/// daemon id -> its active session id.
	by_daemon: HashMap<String, String>,
	last_discovered: HashMap<String, u64>,
	last_sequence: HashMap<String, u64>,
	/// Sessions that reached a terminal phase; never leaves.
	retired: HashSet<String>,
	cancelling: BTreeSet<String>,
	displayed: Option<String>,
}

impl SessionState {
	fn apply(&mut self, update: DiscoveryUpdatePayload, config: &TrackerConfig) -> std::result::Result<Effects, UpdateOutcome> {
		let id = update.session_id.clone();
		if self.retired.contains(&id) {
			return Err(UpdateOutcome::Retired);
		}
		if let Some(sequence) = update.sequence {
			if self.last_sequence.get(&id).is_some_and(|last| sequence <= *last) {
				return Err(UpdateOutcome::Stale);
			}
			self.last_sequence.insert(id.clone(), sequence);
		}

		let session = DiscoverySession::from(update);
		let previous = self.last_discovered.get(&id).copied().unwrap_or(0);
		let mut effects = Effects {
			refresh: should_refresh(previous, session.discovered_count),
			..Effects::default()
		};
		if effects.refresh {
			self.last_discovered.insert(id.clone(), session.discovered_count);
		}

		if session.is_active() {
			self.by_daemon.insert(session.daemon_id.clone(), id.clone());
		} else {
			if self.by_daemon.get(&session.daemon_id) == Some(&id) {
				self.by_daemon.remove(&session.daemon_id);
			}
			self.cancelling.remove(&id);
			self.last_discovered.remove(&id);
			self.last_sequence.remove(&id);
			self.retired.insert(id.clone());

			// Completed always gets one final refresh, folded into any count-driven one.
			effects.refresh |= session.phase == DiscoveryPhase::Completed;
			effects.feedback = Some(terminal_feedback(&session));
			effects.prune = config.grace_for(session.phase).map(|grace| (id.clone(), grace));
		}

		if self.displayed.is_none() {
			self.displayed = Some(id.clone());
		}
		self.sessions.insert(id, session);
		effects.idle = !self.has_active();
		Ok(effects)
	}

	/// Drops `id` and ignores any later update for it.
	fn retire(&mut self, id: &str) {
		self.forget(id);
		self.retired.insert(id.to_string());
	}

	/// Drops `id` without retiring it.
	fn forget(&mut self, id: &str) {
		if let Some(session) = self.sessions.remove(id) {
			if self.by_daemon.get(&session.daemon_id).is_some_and(|active| active == id) {
				self.by_daemon.remove(&session.daemon_id);
			}
		}
		self.last_discovered.remove(id);
		self.last_sequence.remove(id);
		self.cancelling.remove(id);
		self.repoint_display(id);
	}

	fn repoint_display(&mut self, removed: &str) {
		if self.displayed.as_deref() != Some(removed) {
			return;
		}
		self.displayed = self
			.sessions
			.values()
			.find(|s| s.is_active())
			.or_else(|| self.sessions.values().next())
			.map(|s| s.session_id.clone());
	}

	fn has_active(&self) -> bool {
		self.sessions.values().any(DiscoverySession::is_active)
	}

	fn active_count(&self) -> usize {
		self.sessions.values().filter(|s| s.is_active()).count()
	}

	fn snapshot(&self) -> TrackerSnapshot {
		TrackerSnapshot {
			sessions: self.sessions.clone(),
			cancelling: self.cancelling.clone(),
			displayed: self.displayed.clone(),
		}
	}
}

fn terminal_feedback(session: &DiscoverySession) -> Feedback {
	match session.phase {
		DiscoveryPhase::Completed => Feedback::success(format!("Discovery completed with {} hosts found", session.discovered_count)),
		DiscoveryPhase::Cancelled => Feedback::warning("Discovery cancelled"),
		_ => match &session.error {
			Some(error) => Feedback::error(format!("Discovery error: {error}")).sticky(),
			None => Feedback::error("Discovery failed").sticky(),
		},
	}
}

struct Inner {
	coordinator: Arc<RequestCoordinator>,
	refresher: Arc<dyn DataRefresher>,
	feedback: Arc<dyn FeedbackSink>,
	config: TrackerConfig,
	state: Mutex<SessionState>,
	snapshot: Store<TrackerSnapshot>,
	stream: ReconnectingStream<DiscoveryUpdatePayload>,
	poller: Poller,
}

/// Tracks discovery sessions across daemons. Cheap to clone.
#[derive(Clone)]
pub struct DiscoveryTracker {
	inner: Arc<Inner>,
}

impl DiscoveryTracker {
	pub fn new(coordinator: Arc<RequestCoordinator>, source: Arc<dyn EventSource>, refresher: Arc<dyn DataRefresher>, feedback: Arc<dyn FeedbackSink>) -> Self {
		Self::with_config(coordinator, source, refresher, feedback, TrackerConfig::default())
	}

	pub fn with_config(
		coordinator: Arc<RequestCoordinator>,
		source: Arc<dyn EventSource>,
		refresher: Arc<dyn DataRefresher>,
		feedback: Arc<dyn FeedbackSink>,
		config: TrackerConfig,
	) -> Self {
		let inner = Inner {
			coordinator,
			refresher,
			feedback,
			stream: ReconnectingStream::new(source, config.backoff),
			poller: Poller::new(config.poll_interval),
			config,
			state: Mutex::new(SessionState::default()),
			snapshot: Store::default(),
		};
		Self { inner: Arc::new(inner) }
	}

	pub fn config(&self) -> &TrackerConfig {
		&self.inner.config
	}

	/// Asks the server to start discovery on `daemon_id` and begins tracking the new session.
	pub async fn initiate_discovery(&self, daemon_id: &str) -> Result<DiscoverySession> {
		let request = HttpRequest::post(endpoints::INITIATE).json(&InitiateDiscoveryRequest {
			daemon_id: daemon_id.to_string(),
		})?;
		let payload: DiscoveryUpdatePayload = self.inner.coordinator.request(request).await?;
		info!(target = "netscope.tracker", session_id = %payload.session_id, daemon_id, "discovery initiated");

		let session = self.inner.register(payload);
		self.start_updates();
		Ok(session)
	}

	/// Requests cancellation. The session stays active until a `Cancelled` update arrives.
	pub async fn cancel_discovery(&self, session_id: &str) -> Result<()> {
		self.inner.with_state(|state| {
			state.cancelling.insert(session_id.to_string());
		});

		match self.inner.coordinator.request::<Value>(HttpRequest::post(endpoints::cancel(session_id))).await {
			Ok(_) => {
				info!(target = "netscope.tracker", session_id, "cancel requested");
				Ok(())
			}
			Err(failure) => {
				self.inner.with_state(|state| {
					state.cancelling.remove(session_id);
				});
				Err(failure.into())
			}
		}
	}

	/// Folds one pushed update into the session map.
	pub fn apply_update(&self, update: DiscoveryUpdatePayload) -> UpdateOutcome {
		self.inner.apply(update)
	}

	/// Re-reads `/discovery/active` and reconciles the session map with it.
	///
	/// Tracked sessions the server no longer lists as active have finished
	/// since the last update; their final state is read from
	/// `/discovery/{id}/status` and applied like any pushed update. A session
	/// whose status cannot be read is retired. Delivery is started when
	/// anything is active and stopped otherwise (with `stop_when_idle`).
	/// Returns the number of active sessions.
	pub async fn resume(&self) -> Result<usize> {
		let actives: Vec<DiscoveryUpdatePayload> = self.inner.coordinator.request(HttpRequest::get(endpoints::ACTIVE)).await?;
		let vanished = self.inner.reconcile(actives);

		// Fetch everything before applying: applying may stop the poller running this call.
		let statuses = join_all(vanished.iter().map(|id| self.inner.fetch_status(id))).await;
		for (id, status) in vanished.into_iter().zip(statuses) {
			self.inner.settle_vanished(id, status);
		}

		let active = self.inner.state.lock().active_count();
		debug!(target = "netscope.tracker", active, "active sessions reconciled");

		if active > 0 {
			self.start_updates();
		} else if self.inner.config.stop_when_idle {
			self.stop_updates();
		}
		Ok(active)
	}

	/// Starts update delivery if it is not already running.
	pub fn start_updates(&self) {
		self.inner.start_updates();
	}

	pub fn stop_updates(&self) {
		self.inner.stop_updates();
	}

	pub fn updates_running(&self) -> bool {
		self.inner.stream.is_running() || self.inner.poller.is_running()
	}

	pub fn stream_connected(&self) -> bool {
		self.inner.stream.is_connected()
	}

	/// `daemon_id` has an active session.
	pub fn is_discovering(&self, daemon_id: &str) -> bool {
		self.inner.state.lock().by_daemon.contains_key(daemon_id)
	}

	pub fn active_session_for(&self, daemon_id: &str) -> Option<DiscoverySession> {
		let state = self.inner.state.lock();
		state.by_daemon.get(daemon_id).and_then(|id| state.sessions.get(id)).cloned()
	}

	pub fn session(&self, session_id: &str) -> Option<DiscoverySession> {
		self.inner.state.lock().sessions.get(session_id).cloned()
	}

	/// Every live session, ordered by session id.
	pub fn sessions(&self) -> Vec<DiscoverySession> {
		self.inner.state.lock().sessions.values().cloned().collect()
	}

	pub fn is_cancelling(&self, session_id: &str) -> bool {
		self.inner.state.lock().cancelling.contains(session_id)
	}

	/// Selects `session_id` for display and returns its current state.
	pub fn display(&self, session_id: &str) -> Result<DiscoverySession> {
		self.inner.with_state(|state| {
			let session = state
				.sessions
				.get(session_id)
				.cloned()
				.ok_or_else(|| TrackerError::UnknownSession(session_id.to_string()))?;
			state.displayed = Some(session_id.to_string());
			Ok(session)
		})
	}

	pub fn displayed(&self) -> Option<DiscoverySession> {
		let state = self.inner.state.lock();
		state.displayed.as_ref().and_then(|id| state.sessions.get(id)).cloned()
	}

	pub fn snapshot(&self) -> TrackerSnapshot {
		self.inner.snapshot.get()
	}

	/// Receiver notified with a fresh snapshot on every change.
	pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
		self.inner.snapshot.subscribe()
	}
}

impl Inner {
	/// Runs `f` on the state under the lock and publishes the resulting snapshot.
	fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
		let mut state = self.state.lock();
		let result = f(&mut state);
		self.snapshot.update(|_| state.snapshot());
		result
	}

	fn apply(self: &Arc<Self>, update: DiscoveryUpdatePayload) -> UpdateOutcome {
		let session_id = update.session_id.clone();
		let phase = update.phase;
		match self.with_state(|state| state.apply(update, &self.config)) {
			Ok(effects) => {
				debug!(target = "netscope.tracker", %session_id, %phase, "update applied");
				self.run(effects);
				UpdateOutcome::Applied
			}
			Err(outcome) => {
				debug!(target = "netscope.tracker", %session_id, %phase, ?outcome, "update ignored");
				outcome
			}
		}
	}

	/// Inserts a freshly initiated session unless updates already moved it on.
	fn register(self: &Arc<Self>, payload: DiscoveryUpdatePayload) -> DiscoverySession {
		let id = payload.session_id.clone();
		let registered = self.with_state(|state| {
			if let Some(existing) = state.sessions.get(&id) {
				return (existing.clone(), None);
			}
			let fallback = DiscoverySession::from(payload.clone());
			match state.apply(payload, &self.config) {
				Ok(effects) => (state.sessions.get(&id).cloned().unwrap_or(fallback), Some(effects)),
				Err(_) => (fallback, None),
			}
		});

		let (session, effects) = registered;
		if let Some(effects) = effects {
			self.run(effects);
		}
		session
	}

	/// Applies the listed sessions and returns the tracked active ones the server left out.
	fn reconcile(self: &Arc<Self>, actives: Vec<DiscoveryUpdatePayload>) -> Vec<String> {
		let listed: HashSet<String> = actives.iter().map(|a| a.session_id.clone()).collect();
		let (effects, vanished) = self.with_state(|state| {
			let vanished: Vec<String> = state
				.sessions
				.values()
				.filter(|s| s.is_active() && !listed.contains(&s.session_id))
				.map(|s| s.session_id.clone())
				.collect();
			let effects: Vec<Effects> = actives.into_iter().filter_map(|update| state.apply(update, &self.config).ok()).collect();
			(effects, vanished)
		});

		for effects in effects {
			self.run(effects);
		}
		vanished
	}

	async fn fetch_status(&self, session_id: &str) -> std::result::Result<DiscoveryUpdatePayload, RequestFailure> {
		debug!(target = "netscope.tracker", session_id, "session no longer active on server; reading status");
		self.coordinator.request(HttpRequest::get(endpoints::status(session_id))).await
	}

	fn settle_vanished(self: &Arc<Self>, session_id: String, status: std::result::Result<DiscoveryUpdatePayload, RequestFailure>) {
		match status {
			Ok(payload) if payload.session_id == session_id => {
				self.apply(payload);
			}
			Ok(payload) => {
				warn!(target = "netscope.tracker", %session_id, reported = %payload.session_id, "status answered for another session; retiring");
				self.retire(&session_id);
			}
			Err(failure) => {
				warn!(target = "netscope.tracker", %session_id, error = %failure, "final status unavailable; retiring session");
				self.retire(&session_id);
			}
		}
	}

	fn retire(self: &Arc<Self>, session_id: &str) {
		let idle = self.with_state(|state| {
			state.retire(session_id);
			!state.has_active()
		});
		if idle && self.config.stop_when_idle {
			self.stop_updates();
		}
	}

	fn run(self: &Arc<Self>, effects: Effects) {
		if effects.refresh {
			tokio::spawn(self.refresher.refresh());
		}
		if let Some(feedback) = effects.feedback {
			self.feedback.push(feedback);
		}
		if let Some((session_id, grace)) = effects.prune {
			self.schedule_prune(session_id, grace);
		}
		if effects.idle && self.config.stop_when_idle {
			self.stop_updates();
		}
	}

	fn schedule_prune(self: &Arc<Self>, session_id: String, grace: Duration) {
		let inner = Arc::downgrade(self);
		tokio::spawn(async move {
			tokio::time::sleep(grace).await;
			if let Some(inner) = inner.upgrade() {
				inner.prune(&session_id);
			}
		});
	}

	fn prune(&self, session_id: &str) {
		self.with_state(|state| {
			if state.sessions.get(session_id).is_some_and(DiscoverySession::is_terminal) {
				state.sessions.remove(session_id);
				state.repoint_display(session_id);
				debug!(target = "netscope.tracker", session_id, "terminal session pruned");
			}
		});
	}

	fn start_updates(self: &Arc<Self>) {
		match self.config.delivery {
			Delivery::Stream if !self.stream.is_running() => self.start_stream(),
			Delivery::Polling if !self.poller.is_running() => self.start_polling(),
			_ => {}
		}
	}

	fn stop_updates(&self) {
		let running = self.stream.is_running() || self.poller.is_running();
		self.stream.stop();
		self.poller.stop();
		if running {
			info!(target = "netscope.tracker", "discovery updates stopped");
		}
	}

	fn start_stream(self: &Arc<Self>) {
		let on_message = Arc::downgrade(self);
		let on_error = Arc::downgrade(self);
		let on_open = Arc::downgrade(self);

		let handlers = StreamHandlers::new(move |update: DiscoveryUpdatePayload| {
			if let Some(inner) = on_message.upgrade() {
				inner.apply(update);
			}
		})
		.on_error(move |err| {
			if let Some(inner) = on_error.upgrade() {
				inner.stream_failed(err);
			}
		})
		.on_open(move |info: OpenInfo| {
			if info.reconnected {
				resync(&on_open);
			}
		});

		info!(target = "netscope.tracker", delivery = "stream", "discovery updates started");
		self.stream.start(handlers);
	}

	fn start_polling(self: &Arc<Self>) {
		let on_poll = Arc::downgrade(self);
		let on_error = Arc::downgrade(self);

		info!(target = "netscope.tracker", delivery = "polling", interval_ms = self.config.poll_interval.as_millis() as u64, "discovery updates started");
		self.poller.start(
			move || {
				let inner = on_poll.clone();
				async move {
					match inner.upgrade() {
						Some(inner) => DiscoveryTracker { inner }.resume().await.map(|_| ()),
						None => Ok::<(), TrackerError>(()),
					}
				}
			},
			move |err: TrackerError| {
				// The coordinator already surfaced the failure; stop until the next initiate.
				warn!(target = "netscope.tracker", error = %err, "discovery polling stopped");
				if let Some(inner) = on_error.upgrade() {
					inner.poller.stop();
				}
			},
		);
	}

	fn stream_failed(&self, err: StreamError) {
		match err {
			StreamError::Disconnected { attempt, .. } => {
				warn!(target = "netscope.tracker", attempt, "lost discovery updates; reconnecting");
				self.feedback.push(Feedback::warning("Lost connection to discovery updates, reconnecting"));
			}
			StreamError::Exhausted { attempts, .. } => {
				warn!(target = "netscope.tracker", attempts, "discovery updates unavailable");
				self.feedback.push(Feedback::error("Lost connection to discovery updates"));
			}
		}
	}
}

/// Catches up on updates missed while the stream was down.
fn resync(inner: &Weak<Inner>) {
	let Some(inner) = inner.upgrade() else {
		return;
	};
	tokio::spawn(async move {
		if let Err(err) = (DiscoveryTracker { inner }).resume().await {
			warn!(target = "netscope.tracker", error = %err, "resync after reconnect failed");
		}
	});
}

//! Request coalescing and short-term response caching.
//!
//! [`RequestCoordinator`] sits between callers and the [`HttpTransport`]:
//!
//! 1. Each request is keyed by method, endpoint and (for non-GET) body
//! 2. Entries older than the debounce window are purged before every lookup
//! 3. A completed entry inside the window answers immediately from the cache
//! 4. A pending entry is shared: every caller awaits the same network call
//! 5. Otherwise the call is spawned, cached as pending, and marked completed
//!    when it settles, whether it succeeded or failed
//!
//! Lookup and insertion happen under one lock with no suspension point in
//! between, so two concurrent callers can never both issue the same request.
//!
//! Failures never propagate as errors from the transport: they are pushed to
//! the [`FeedbackSink`] once per network call and returned to every caller as
//! a cloneable [`RequestFailure`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use netscope_protocol::ApiEnvelope;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::feedback::{Feedback, FeedbackSink};
use crate::store::Store;
use crate::transport::{HttpRequest, HttpTransport, Method};

/// Default window during which identical requests are coalesced.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	/// No response arrived.
	Transport,
	/// Non-2xx status.
	Status(u16),
	/// `success: false` envelope.
	Application,
	/// Body did not match the expected shape.
	Decode,
}

/// Failure returned to every caller sharing a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestFailure {
	pub kind: FailureKind,
	pub method: Method,
	pub endpoint: String,
	/// Human-readable cause, already pushed to the feedback sink.
	pub message: String,
}

type Outcome = Result<Arc<Value>, RequestFailure>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// Cache key: `METHOD:endpoint` for GET, `METHOD:endpoint:body` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
	pub fn for_request(request: &HttpRequest) -> Self {
		match request.method {
			Method::Get => Self(format!("GET:{}", request.endpoint)),
			method => Self(format!("{}:{}:{}", method, request.endpoint, request.body.as_deref().unwrap_or(""))),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

struct CacheEntry {
	id: u64,
	created: Instant,
	pending: SharedOutcome,
	/// Set once the network call settles.
	result: Option<Outcome>,
}

type Cache = Arc<Mutex<HashMap<RequestKey, CacheEntry>>>;

enum Lookup {
	Completed(Outcome),
	Pending(SharedOutcome),
	Issued(SharedOutcome),
}

/// De-duplicating front for an [`HttpTransport`].
pub struct RequestCoordinator {
	transport: Arc<dyn HttpTransport>,
	feedback: Arc<dyn FeedbackSink>,
	debounce: Mutex<Duration>,
	cache: Cache,
	next_id: AtomicU64,
}

impl RequestCoordinator {
	pub fn new(transport: Arc<dyn HttpTransport>, feedback: Arc<dyn FeedbackSink>) -> Self {
		Self::with_debounce(transport, feedback, DEFAULT_DEBOUNCE)
	}

	pub fn with_debounce(transport: Arc<dyn HttpTransport>, feedback: Arc<dyn FeedbackSink>, debounce: Duration) -> Self {
		Self {
			transport,
			feedback,
			debounce: Mutex::new(debounce),
			cache: Arc::new(Mutex::new(HashMap::new())),
			next_id: AtomicU64::new(0),
		}
	}

	pub fn debounce(&self) -> Duration {
		*self.debounce.lock()
	}

	pub fn set_debounce(&self, debounce: Duration) {
		*self.debounce.lock() = debounce;
	}

	/// Drops every cached entry; pending calls still complete for their awaiters.
	pub fn clear_cache(&self) {
		self.cache.lock().clear();
	}

	/// Keys currently cached, expired entries included until the next lookup.
	pub fn cached_keys(&self) -> Vec<RequestKey> {
		self.cache.lock().keys().cloned().collect()
	}

	/// Issues `request` (or joins an identical one) and decodes the envelope data as `T`.
	pub async fn request<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, RequestFailure> {
		let method = request.method;
		let endpoint = request.endpoint.clone();
		let (outcome, issued) = self.dispatch(request).await;
		self.decode(method, &endpoint, outcome?, issued)
	}

	/// Like [`request`](Self::request), and folds the data into `store` with `reducer`.
	///
	/// The reducer runs only for the caller whose call reached the network.
	/// Callers served from the cache, or joined onto an in-flight call, get the
	/// data back without touching the store, so non-idempotent reducers (list
	/// appends) are applied exactly once per network call.
	pub async fn request_into<T, S>(&self, request: HttpRequest, store: &Store<S>, reducer: impl FnOnce(&T, &S) -> S) -> Result<T, RequestFailure>
	where
		T: DeserializeOwned,
		S: Clone + PartialEq,
	{
		let method = request.method;
		let endpoint = request.endpoint.clone();
		let (outcome, issued) = self.dispatch(request).await;
		let data: T = self.decode(method, &endpoint, outcome?, issued)?;
		if issued {
			store.update(|current| reducer(&data, current));
		}
		Ok(data)
	}

	async fn dispatch(&self, request: HttpRequest) -> (Outcome, bool) {
		match self.lookup_or_issue(request) {
			Lookup::Completed(outcome) => (outcome, false),
			Lookup::Pending(shared) => (shared.await, false),
			Lookup::Issued(shared) => (shared.await, true),
		}
	}

	fn lookup_or_issue(&self, request: HttpRequest) -> Lookup {
		let key = RequestKey::for_request(&request);
		let debounce = self.debounce();
		let now = Instant::now();

		let mut cache = self.cache.lock();
		cache.retain(|_, entry| now.duration_since(entry.created) < debounce);

		if let Some(entry) = cache.get(&key) {
			debug!(target = "netscope.request", key = key.as_str(), completed = entry.result.is_some(), "request served from cache");
			return match &entry.result {
				Some(outcome) => Lookup::Completed(outcome.clone()),
				None => Lookup::Pending(entry.pending.clone()),
			};
		}

		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let task = tokio::spawn(settle(
			Arc::clone(&self.transport),
			Arc::clone(&self.feedback),
			Arc::clone(&self.cache),
			key.clone(),
			id,
			request.clone(),
		));

		let shared = async move {
			task.await.unwrap_or_else(|err| {
				Err(RequestFailure {
					kind: FailureKind::Transport,
					method: request.method,
					endpoint: request.endpoint.clone(),
					message: format!("request task ended unexpectedly: {err}"),
				})
			})
		}
		.boxed()
		.shared();

		cache.insert(
			key,
			CacheEntry {
				id,
				created: now,
				pending: shared.clone(),
				result: None,
			},
		);
		Lookup::Issued(shared)
	}

	/// Only the caller that `issued` the network call reports a decode failure.
	fn decode<T: DeserializeOwned>(&self, method: Method, endpoint: &str, data: Arc<Value>, issued: bool) -> Result<T, RequestFailure> {
		T::deserialize(data.as_ref()).map_err(|err| {
			let failure = RequestFailure {
				kind: FailureKind::Decode,
				method,
				endpoint: endpoint.to_string(),
				message: format!("Failed to {method} from {endpoint}: unexpected response shape: {err}"),
			};
			if issued {
				self.feedback.push(Feedback::error(failure.message.clone()).with_endpoint(endpoint));
			} else {
				debug!(target = "netscope.request", %method, %endpoint, "{}", failure.message);
			}
			failure
		})
	}
}

/// Runs one network call and records its outcome on the cache entry `id`.
async fn settle(transport: Arc<dyn HttpTransport>, feedback: Arc<dyn FeedbackSink>, cache: Cache, key: RequestKey, id: u64, request: HttpRequest) -> Outcome {
	let outcome = execute(transport.as_ref(), feedback.as_ref(), request).await;
	if let Some(entry) = cache.lock().get_mut(&key) {
		if entry.id == id {
			entry.result = Some(outcome.clone());
		}
	}
	outcome
}

async fn execute(transport: &dyn HttpTransport, feedback: &dyn FeedbackSink, request: HttpRequest) -> Outcome {
	let method = request.method;
	let endpoint = request.endpoint.clone();
	let fail = |kind: FailureKind, cause: String| RequestFailure {
		kind,
		method,
		endpoint: endpoint.clone(),
		message: format!("Failed to {method} from {endpoint}: {cause}"),
	};

	let failure = match transport.execute(request).await {
		Err(err) => fail(FailureKind::Transport, err.to_string()),
		Ok(response) if !response.is_success() => {
			let cause = envelope_error(&response.body).unwrap_or_else(|| format!("HTTP {}", response.status));
			fail(FailureKind::Status(response.status), cause)
		}
		Ok(response) => match serde_json::from_str::<ApiEnvelope<Value>>(&response.body) {
			Ok(envelope) if envelope.success => {
				debug!(target = "netscope.request", %method, %endpoint, "request succeeded");
				return Ok(Arc::new(envelope.data.unwrap_or(Value::Null)));
			}
			Ok(envelope) => fail(FailureKind::Application, envelope.error.unwrap_or_else(|| "Unknown error".to_string())),
			Err(err) => fail(FailureKind::Decode, format!("invalid response body: {err}")),
		},
	};

	warn!(target = "netscope.request", %method, %endpoint, kind = ?failure.kind, "{}", failure.message);
	feedback.push(Feedback::error(failure.message.clone()).with_endpoint(endpoint.as_str()));
	Err(failure)
}

fn envelope_error(body: &str) -> Option<String> {
	#[derive(Deserialize)]
	struct ErrorOnly {
		error: Option<String>,
	}
	serde_json::from_str::<ErrorOnly>(body).ok().and_then(|e| e.error)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::fake_transport::{FakeReply, FakeTransport};
	use crate::feedback::{RecordingFeedback, Tone};

	fn coordinator() -> (RequestCoordinator, Arc<FakeTransport>, RecordingFeedback) {
		let transport = Arc::new(FakeTransport::new());
		let feedback = RecordingFeedback::new();
		let coordinator = RequestCoordinator::new(transport.clone(), Arc::new(feedback.clone()));
		(coordinator, transport, feedback)
	}

	#[test]
	fn get_keys_ignore_body_other_methods_include_it() {
		let get = HttpRequest {
			method: Method::Get,
			endpoint: "/hosts".to_string(),
			body: Some("ignored".to_string()),
		};
		assert_eq!(RequestKey::for_request(&get).as_str(), "GET:/hosts");

		let post = HttpRequest::post("/discovery/initiate").json(&json!({"daemon_id": "d1"})).unwrap();
		assert_eq!(RequestKey::for_request(&post).as_str(), r#"POST:/discovery/initiate:{"daemon_id":"d1"}"#);
		assert_eq!(RequestKey::for_request(&HttpRequest::post("/x")).as_str(), "POST:/x:");
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_identical_requests_share_one_call() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!(["h1"])));
		transport.set_delay(Some(Duration::from_millis(100)));

		let (a, b) = tokio::join!(
			coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")),
			coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")),
		);

		assert_eq!(a.unwrap(), vec!["h1".to_string()]);
		assert_eq!(b.unwrap(), vec!["h1".to_string()]);
		assert_eq!(transport.call_count(Method::Get, "/hosts"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn completed_result_reused_inside_window_then_expires() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/subnets", FakeReply::ok(json!([])));

		coordinator.request::<Vec<Value>>(HttpRequest::get("/subnets")).await.unwrap();
		tokio::time::advance(Duration::from_millis(100)).await;
		coordinator.request::<Vec<Value>>(HttpRequest::get("/subnets")).await.unwrap();
		assert_eq!(transport.call_count(Method::Get, "/subnets"), 1);

		tokio::time::advance(Duration::from_millis(200)).await;
		coordinator.request::<Vec<Value>>(HttpRequest::get("/subnets")).await.unwrap();
		assert_eq!(transport.call_count(Method::Get, "/subnets"), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn different_post_bodies_are_distinct_requests() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Post, "/discovery/initiate", FakeReply::ok(json!({})));

		let first = HttpRequest::post("/discovery/initiate").json(&json!({"daemon_id": "d1"})).unwrap();
		let second = HttpRequest::post("/discovery/initiate").json(&json!({"daemon_id": "d2"})).unwrap();
		let _ = tokio::join!(coordinator.request::<Value>(first), coordinator.request::<Value>(second));

		assert_eq!(transport.call_count(Method::Post, "/discovery/initiate"), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn failure_is_cached_as_completed_and_reported_once() {
		let (coordinator, transport, feedback) = coordinator();
		transport.respond(Method::Get, "/services", FakeReply::refused());

		let first = coordinator.request::<Value>(HttpRequest::get("/services")).await.unwrap_err();
		let second = coordinator.request::<Value>(HttpRequest::get("/services")).await.unwrap_err();

		assert_eq!(first, second);
		assert_eq!(first.kind, FailureKind::Transport);
		assert_eq!(transport.call_count(Method::Get, "/services"), 1);
		assert_eq!(feedback.count(Tone::Error), 1);
		assert_eq!(feedback.entries()[0].endpoint.as_deref(), Some("/services"));
	}

	#[tokio::test(start_paused = true)]
	async fn application_error_carries_server_message() {
		let (coordinator, transport, feedback) = coordinator();
		transport.respond(Method::Post, "/discovery/d1/cancel", FakeReply::app_error("session not found"));

		let failure = coordinator.request::<Value>(HttpRequest::post("/discovery/d1/cancel")).await.unwrap_err();

		assert_eq!(failure.kind, FailureKind::Application);
		assert_eq!(failure.message, "Failed to POST from /discovery/d1/cancel: session not found");
		assert_eq!(feedback.entries()[0].message, failure.message);
	}

	#[tokio::test(start_paused = true)]
	async fn status_error_prefers_envelope_message() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::json(409, &ApiEnvelope::<Value>::failure("busy")));
		transport.respond(Method::Get, "/services", FakeReply::raw(502, "<html>bad gateway</html>"));

		let conflict = coordinator.request::<Value>(HttpRequest::get("/hosts")).await.unwrap_err();
		let gateway = coordinator.request::<Value>(HttpRequest::get("/services")).await.unwrap_err();

		assert_eq!(conflict.kind, FailureKind::Status(409));
		assert!(conflict.message.ends_with(": busy"));
		assert_eq!(gateway.kind, FailureKind::Status(502));
		assert!(gateway.message.ends_with(": HTTP 502"));
	}

	#[tokio::test(start_paused = true)]
	async fn decode_failure_is_reported() {
		let (coordinator, transport, feedback) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!({"not": "a list"})));

		let failure = coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")).await.unwrap_err();

		assert_eq!(failure.kind, FailureKind::Decode);
		assert_eq!(feedback.count(Tone::Error), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn decode_failure_reported_once_for_shared_call() {
		let (coordinator, transport, feedback) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!({"not": "a list"})));
		transport.set_delay(Some(Duration::from_millis(100)));

		let (a, b) = tokio::join!(
			coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")),
			coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")),
		);
		let cached = coordinator.request::<Vec<String>>(HttpRequest::get("/hosts")).await;

		assert!(a.is_err() && b.is_err() && cached.is_err());
		assert_eq!(transport.call_count(Method::Get, "/hosts"), 1);
		assert_eq!(feedback.count(Tone::Error), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn reducer_runs_once_per_network_call() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!(["h1"])));
		let store: Store<Vec<String>> = Store::default();
		let append = |data: &Vec<String>, current: &Vec<String>| {
			let mut next = current.clone();
			next.extend(data.iter().cloned());
			next
		};

		coordinator.request_into(HttpRequest::get("/hosts"), &store, append).await.unwrap();
		coordinator.request_into(HttpRequest::get("/hosts"), &store, append).await.unwrap();

		assert_eq!(store.get(), vec!["h1".to_string()]);
	}

	#[tokio::test(start_paused = true)]
	async fn pending_entry_older_than_window_is_reissued() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!([])));
		transport.set_delay(Some(Duration::from_secs(1)));

		let slow = coordinator.request::<Value>(HttpRequest::get("/hosts"));
		let late = async {
			tokio::time::sleep(Duration::from_millis(300)).await;
			coordinator.request::<Value>(HttpRequest::get("/hosts")).await
		};
		let (a, b) = tokio::join!(slow, late);

		assert!(a.is_ok() && b.is_ok());
		assert_eq!(transport.call_count(Method::Get, "/hosts"), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn clear_cache_forces_a_new_call() {
		let (coordinator, transport, _) = coordinator();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!([])));

		coordinator.request::<Value>(HttpRequest::get("/hosts")).await.unwrap();
		coordinator.clear_cache();
		assert!(coordinator.cached_keys().is_empty());
		coordinator.request::<Value>(HttpRequest::get("/hosts")).await.unwrap();

		assert_eq!(transport.call_count(Method::Get, "/hosts"), 2);
	}
}

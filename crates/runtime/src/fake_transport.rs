//! Fake HTTP transport for unit testing request coordination.
//!
//! Provides an in-memory [`HttpTransport`] that answers from scripted replies
//! and records every request it receives, so tests can assert how many
//! network calls a sequence of coordinator requests produced.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(FakeTransport::new());
//! transport.respond(Method::Get, "/hosts", FakeReply::ok(json!([])));
//!
//! let coordinator = RequestCoordinator::new(transport.clone(), feedback);
//! let _ = coordinator.request::<Value>(HttpRequest::get("/hosts")).await;
//! assert_eq!(transport.call_count(Method::Get, "/hosts"), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use netscope_protocol::ApiEnvelope;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum FakeReply {
	/// A response that arrived (any status).
	Response(HttpResponse),
	/// A transport-level failure.
	TransportError(String),
}

impl FakeReply {
	/// `200` with a successful envelope around `data`.
	pub fn ok(data: Value) -> Self {
		Self::json(200, &ApiEnvelope::ok(data))
	}

	/// `200` with `success: false` and `error`.
	pub fn app_error(error: &str) -> Self {
		Self::json(200, &ApiEnvelope::<Value>::failure(error))
	}

	/// Arbitrary status with a JSON body.
	pub fn json<B: serde::Serialize>(status: u16, body: &B) -> Self {
		Self::Response(HttpResponse {
			status,
			body: serde_json::to_string(body).unwrap_or_default(),
		})
	}

	/// Arbitrary status with a raw body.
	pub fn raw(status: u16, body: &str) -> Self {
		Self::Response(HttpResponse {
			status,
			body: body.to_string(),
		})
	}

	pub fn refused() -> Self {
		Self::TransportError("connection refused".to_string())
	}
}

type RouteKey = (Method, String);

#[derive(Default)]
struct Routes {
	once: HashMap<RouteKey, VecDeque<FakeReply>>,
	sticky: HashMap<RouteKey, FakeReply>,
}

/// Scripted in-memory transport.
///
/// Unscripted routes answer `404` with a failure envelope.
#[derive(Default)]
pub struct FakeTransport {
	routes: Mutex<Routes>,
	calls: Mutex<Vec<HttpRequest>>,
	delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Answers every call to `method endpoint` with `reply`.
	pub fn respond(&self, method: Method, endpoint: &str, reply: FakeReply) {
		self.routes.lock().sticky.insert((method, endpoint.to_string()), reply);
	}

	/// Queues `reply` for the next call only; queued replies win over sticky ones.
	pub fn respond_once(&self, method: Method, endpoint: &str, reply: FakeReply) {
		self.routes
			.lock()
			.once
			.entry((method, endpoint.to_string()))
			.or_default()
			.push_back(reply);
	}

	/// Holds every response for `delay` before answering (driven by tokio time).
	pub fn set_delay(&self, delay: Option<Duration>) {
		*self.delay.lock() = delay;
	}

	/// Every request received so far, in order.
	pub fn calls(&self) -> Vec<HttpRequest> {
		self.calls.lock().clone()
	}

	pub fn call_count(&self, method: Method, endpoint: &str) -> usize {
		self.calls
			.lock()
			.iter()
			.filter(|req| req.method == method && req.endpoint == endpoint)
			.count()
	}

	pub fn total_calls(&self) -> usize {
		self.calls.lock().len()
	}

	fn next_reply(&self, method: Method, endpoint: &str) -> FakeReply {
		let key = (method, endpoint.to_string());
		let mut routes = self.routes.lock();
		if let Some(reply) = routes.once.get_mut(&key).and_then(VecDeque::pop_front) {
			return reply;
		}
		routes
			.sticky
			.get(&key)
			.cloned()
			.unwrap_or_else(|| FakeReply::json(404, &ApiEnvelope::<Value>::failure(format!("no route for {method} {endpoint}"))))
	}
}

impl HttpTransport for FakeTransport {
	fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
		self.calls.lock().push(request.clone());
		let reply = self.next_reply(request.method, &request.endpoint);
		let delay = *self.delay.lock();

		Box::pin(async move {
			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}
			match reply {
				FakeReply::Response(response) => Ok(response),
				FakeReply::TransportError(message) => Err(RuntimeError::Transport(message)),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn once_replies_take_priority_then_fall_back_to_sticky() {
		let transport = FakeTransport::new();
		transport.respond(Method::Get, "/hosts", FakeReply::ok(json!(["sticky"])));
		transport.respond_once(Method::Get, "/hosts", FakeReply::ok(json!(["once"])));

		let first = transport.execute(HttpRequest::get("/hosts")).await.unwrap();
		let second = transport.execute(HttpRequest::get("/hosts")).await.unwrap();

		assert!(first.body.contains("once"));
		assert!(second.body.contains("sticky"));
		assert_eq!(transport.call_count(Method::Get, "/hosts"), 2);
	}

	#[tokio::test]
	async fn unscripted_route_is_not_found() {
		let transport = FakeTransport::new();
		let response = transport.execute(HttpRequest::get("/nowhere")).await.unwrap();
		assert_eq!(response.status, 404);
		assert!(response.body.contains("no route for GET /nowhere"));
	}

	#[tokio::test]
	async fn transport_errors_surface_as_err() {
		let transport = FakeTransport::new();
		transport.respond(Method::Post, "/discovery/initiate", FakeReply::refused());
		let result = transport.execute(HttpRequest::post("/discovery/initiate")).await;
		assert!(matches!(result, Err(RuntimeError::Transport(_))));
	}
}

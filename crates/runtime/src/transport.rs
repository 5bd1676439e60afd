//! HTTP transport abstraction.
//!
//! [`RequestCoordinator`](crate::RequestCoordinator) talks to the server only
//! through [`HttpTransport`], so tests can swap in
//! [`FakeTransport`](crate::fake_transport::FakeTransport) and count calls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::trace;
use url::Url;

use crate::error::{Result, RuntimeError};

/// HTTP method subset used by the discovery API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
	Get,
	Post,
	Put,
	Delete,
}

impl Method {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outbound request, addressed by endpoint path relative to the API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
	pub method: Method,
	pub endpoint: String,
	/// Pre-serialized JSON body.
	pub body: Option<String>,
}

impl HttpRequest {
	pub fn get(endpoint: impl Into<String>) -> Self {
		Self {
			method: Method::Get,
			endpoint: endpoint.into(),
			body: None,
		}
	}

	pub fn post(endpoint: impl Into<String>) -> Self {
		Self {
			method: Method::Post,
			endpoint: endpoint.into(),
			body: None,
		}
	}

	/// Attaches `body` serialized as JSON.
	pub fn json<B: serde::Serialize>(mut self, body: &B) -> Result<Self> {
		self.body = Some(serde_json::to_string(body)?);
		Ok(self)
	}
}

/// Raw response: status plus undecoded body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
	pub status: u16,
	pub body: String,
}

impl HttpResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Sends requests to the server.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; `Err` is reserved for transport failures (connection refused,
/// reset, client-side timeout).
pub trait HttpTransport: Send + Sync {
	fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
	api_root: String,
	http: reqwest::Client,
}

impl ReqwestTransport {
	/// Creates a transport rooted at `api_root` (for example `http://localhost:60072/api`).
	pub fn new(api_root: &str) -> Result<Self> {
		Self::with_client(api_root, reqwest::Client::new())
	}

	/// Creates a transport whose client applies `timeout` to every call.
	pub fn with_timeout(api_root: &str, timeout: Duration) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(timeout).build()?;
		Self::with_client(api_root, http)
	}

	pub fn with_client(api_root: &str, http: reqwest::Client) -> Result<Self> {
		let api_root = api_root.trim_end_matches('/').to_string();
		Url::parse(&api_root)?;
		Ok(Self { api_root, http })
	}

	/// Absolute URL for `endpoint`.
	pub fn url_for(&self, endpoint: &str) -> Result<Url> {
		Ok(Url::parse(&format!("{}{}", self.api_root, endpoint))?)
	}

	pub fn client(&self) -> &reqwest::Client {
		&self.http
	}
}

impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
		Box::pin(async move {
			let url = self.url_for(&request.endpoint)?;
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Delete => reqwest::Method::DELETE,
			};

			let mut builder = self.http.request(method, url).header(reqwest::header::CONTENT_TYPE, "application/json");
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status();
			let body = response.text().await.map_err(|e| RuntimeError::Transport(e.to_string()))?;
			trace!(target = "netscope.request", endpoint = %request.endpoint, status = status.as_u16(), "response received");

			Ok(HttpResponse {
				status: status.as_u16(),
				body,
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_for_keeps_api_prefix() {
		let transport = ReqwestTransport::new("http://localhost:60072/api/").unwrap();
		assert_eq!(transport.url_for("/hosts").unwrap().as_str(), "http://localhost:60072/api/hosts");
	}

	#[test]
	fn rejects_relative_api_root() {
		assert!(matches!(ReqwestTransport::new("/api"), Err(RuntimeError::InvalidUrl(_))));
	}

	#[test]
	fn json_body_is_serialized() {
		let request = HttpRequest::post("/discovery/initiate")
			.json(&serde_json::json!({"daemon_id": "d1"}))
			.unwrap();
		assert_eq!(request.body.as_deref(), Some(r#"{"daemon_id":"d1"}"#));
	}
}

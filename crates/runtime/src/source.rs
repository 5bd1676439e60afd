//! Push-channel sources.
//!
//! An [`EventSource`] opens one connection and hands back its raw byte stream;
//! [`ReconnectingStream`](crate::ReconnectingStream) owns decoding and the
//! reconnect policy, so a source never retries on its own.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::error::{Result, RuntimeError};
use crate::transport::ReqwestTransport;

/// Raw bytes of one open connection; ends on close, yields `Err` on failure.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens push-channel connections.
pub trait EventSource: Send + Sync {
	fn open(&self) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>>;
}

/// Server-Sent Events over `reqwest`.
///
/// Uses a client without a request timeout; the connection is expected to
/// stay open indefinitely.
#[derive(Debug, Clone)]
pub struct SseEventSource {
	url: Url,
	http: reqwest::Client,
}

impl SseEventSource {
	pub fn new(url: Url) -> Self {
		Self {
			url,
			http: reqwest::Client::new(),
		}
	}

	/// Source for `endpoint` under the transport's API root.
	pub fn for_endpoint(transport: &ReqwestTransport, endpoint: &str) -> Result<Self> {
		Ok(Self::new(transport.url_for(endpoint)?))
	}

	pub fn url(&self) -> &Url {
		&self.url
	}
}

impl EventSource for SseEventSource {
	fn open(&self) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>> {
		Box::pin(async move {
			let response = self
				.http
				.get(self.url.clone())
				.header(reqwest::header::ACCEPT, "text/event-stream")
				.header(reqwest::header::CACHE_CONTROL, "no-cache")
				.send()
				.await?;

			let status = response.status();
			if !status.is_success() {
				return Err(RuntimeError::Status {
					status: status.as_u16(),
					message: format!("event stream rejected by {}", self.url),
				});
			}

			let bytes = response.bytes_stream().map(|chunk| chunk.map_err(RuntimeError::from));
			Ok(Box::pin(bytes) as ByteStream)
		})
	}
}

/// Scripted outcome for one [`FakeEventSource::open`] call.
pub enum FakeConnection {
	/// `open` fails.
	Refused(String),
	/// Delivers `chunks`, then closes cleanly or with `error`.
	Chunks { chunks: Vec<Bytes>, error: Option<String> },
	/// Delivers whatever the paired [`LiveChannel`] sends; stays open until it is dropped.
	Live(mpsc::UnboundedReceiver<Result<Bytes>>),
}

impl FakeConnection {
	/// Connection carrying each `frame` as one `data:` event, then closing.
	pub fn frames<I, S>(frames: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self::Chunks {
			chunks: frames.into_iter().map(|f| sse_frame(f.as_ref())).collect(),
			error: None,
		}
	}

	/// Connection paired with a handle that feeds it.
	pub fn live() -> (Self, LiveChannel) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self::Live(rx), LiveChannel { tx })
	}
}

/// Sender side of a [`FakeConnection::Live`] connection.
#[derive(Debug, Clone)]
pub struct LiveChannel {
	tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl LiveChannel {
	/// Sends `data` as one event.
	pub fn send_data(&self, data: &str) {
		let _ = self.tx.send(Ok(sse_frame(data)));
	}

	/// Sends `value` serialized as one event.
	pub fn send_json<T: serde::Serialize>(&self, value: &T) {
		self.send_data(&serde_json::to_string(value).unwrap_or_default());
	}

	/// Sends raw bytes without framing.
	pub fn send_raw(&self, bytes: &'static [u8]) {
		let _ = self.tx.send(Ok(Bytes::from_static(bytes)));
	}

	/// Fails the connection.
	pub fn fail(&self, message: &str) {
		let _ = self.tx.send(Err(RuntimeError::StreamClosed(message.to_string())));
	}

	/// The reading side has been dropped.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Scripted [`EventSource`]; unscripted opens are refused.
#[derive(Default)]
pub struct FakeEventSource {
	script: Mutex<VecDeque<FakeConnection>>,
	opens: Mutex<Vec<Instant>>,
}

impl FakeEventSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, connection: FakeConnection) {
		self.script.lock().push_back(connection);
	}

	/// Instants (tokio clock) at which `open` was called.
	pub fn open_times(&self) -> Vec<Instant> {
		self.opens.lock().clone()
	}

	pub fn open_count(&self) -> usize {
		self.opens.lock().len()
	}
}

impl EventSource for FakeEventSource {
	fn open(&self) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>> {
		self.opens.lock().push(Instant::now());
		let next = self.script.lock().pop_front();

		Box::pin(async move {
			match next {
				None => Err(RuntimeError::StreamClosed("connection refused".to_string())),
				Some(FakeConnection::Refused(message)) => Err(RuntimeError::StreamClosed(message)),
				Some(FakeConnection::Chunks { chunks, error }) => {
					let tail = error.map(|message| Err(RuntimeError::StreamClosed(message)));
					let items = chunks.into_iter().map(Ok).chain(tail);
					Ok(Box::pin(stream::iter(items)) as ByteStream)
				}
				Some(FakeConnection::Live(rx)) => {
					let live = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
					Ok(Box::pin(live) as ByteStream)
				}
			}
		})
	}
}

fn sse_frame(data: &str) -> Bytes {
	Bytes::from(format!("data: {data}\n\n"))
}

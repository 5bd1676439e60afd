//! Push channel with exponential-backoff reconnection.
//!
//! A [`ReconnectingStream`] owns at most one background connection task. The
//! task opens the [`EventSource`], decodes SSE frames into `T`, and on any
//! channel failure (refused open, transport error, server close) waits
//! `base * 2^(attempt - 1)` before reopening. Once the attempt budget is spent
//! the stream stops itself and reports [`StreamError::Exhausted`] exactly once.
//! A successful open resets the attempt counter.
//!
//! Frames that fail to decode are logged at debug level and dropped; they
//! never close the connection.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::source::{ByteStream, EventSource};
use crate::sse::SseDecoder;

/// Channel-level failure reported to [`StreamHandlers::on_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
	/// The channel failed; reconnect `attempt` is scheduled after `delay`.
	#[error("event stream lost ({cause}); reconnect attempt {attempt} in {delay:?}")]
	Disconnected { attempt: u32, delay: Duration, cause: String },

	/// Every reconnect attempt failed; the stream has stopped.
	#[error("event stream gave up after {attempts} reconnect attempts: {cause}")]
	Exhausted { attempts: u32, cause: String },
}

impl StreamError {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Exhausted { .. })
	}
}

/// Passed to [`StreamHandlers::on_open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInfo {
	/// The open followed at least one failed connection.
	pub reconnected: bool,
}

type MessageFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(StreamError) + Send + Sync>;
type OpenFn = Arc<dyn Fn(OpenInfo) + Send + Sync>;

/// Callbacks invoked from the connection task, in frame order.
pub struct StreamHandlers<T> {
	on_message: MessageFn<T>,
	on_error: Option<ErrorFn>,
	on_open: Option<OpenFn>,
}

impl<T> StreamHandlers<T> {
	pub fn new(on_message: impl Fn(T) + Send + Sync + 'static) -> Self {
		Self {
			on_message: Arc::new(on_message),
			on_error: None,
			on_open: None,
		}
	}

	pub fn on_error(mut self, handler: impl Fn(StreamError) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(handler));
		self
	}

	pub fn on_open(mut self, handler: impl Fn(OpenInfo) + Send + Sync + 'static) -> Self {
		self.on_open = Some(Arc::new(handler));
		self
	}

	fn error(&self, err: StreamError) {
		if let Some(handler) = &self.on_error {
			handler(err);
		}
	}
}

#[derive(Default)]
struct StreamState {
	connected: AtomicBool,
	attempts: AtomicU32,
	generation: AtomicU64,
	task: Mutex<Option<JoinHandle<()>>>,
}

/// Self-healing SSE subscription decoding frames as `T`.
pub struct ReconnectingStream<T> {
	source: Arc<dyn EventSource>,
	backoff: Backoff,
	state: Arc<StreamState>,
	_frames: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> ReconnectingStream<T> {
	pub fn new(source: Arc<dyn EventSource>, backoff: Backoff) -> Self {
		Self {
			source,
			backoff,
			state: Arc::new(StreamState::default()),
			_frames: PhantomData,
		}
	}

	/// Tears down any previous connection and starts a new one.
	pub fn start(&self, handlers: StreamHandlers<T>) {
		self.stop();
		let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let task = tokio::spawn(run(Arc::clone(&self.source), self.backoff, Arc::clone(&self.state), handlers, generation));
		*self.state.task.lock() = Some(task);
	}

	/// Closes the connection and cancels pending reconnects. Safe to repeat.
	pub fn stop(&self) {
		if let Some(task) = self.state.task.lock().take() {
			task.abort();
			debug!(target = "netscope.stream", "event stream stopped");
		}
		self.state.connected.store(false, Ordering::SeqCst);
		self.state.attempts.store(0, Ordering::SeqCst);
	}

	/// A connection is currently open.
	pub fn is_connected(&self) -> bool {
		self.state.connected.load(Ordering::SeqCst)
	}

	/// Connected, connecting, or waiting to reconnect.
	pub fn is_running(&self) -> bool {
		self.state.task.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Consecutive failed connections since the last successful open.
	pub fn reconnect_attempts(&self) -> u32 {
		self.state.attempts.load(Ordering::SeqCst)
	}

	pub fn backoff(&self) -> Backoff {
		self.backoff
	}
}

impl<T> Drop for ReconnectingStream<T> {
	fn drop(&mut self) {
		if let Some(task) = self.state.task.lock().take() {
			task.abort();
		}
	}
}

async fn run<T: DeserializeOwned>(source: Arc<dyn EventSource>, backoff: Backoff, state: Arc<StreamState>, handlers: StreamHandlers<T>, generation: u64) {
	loop {
		let cause = match source.open().await {
			Ok(bytes) => {
				let reconnected = state.attempts.swap(0, Ordering::SeqCst) > 0;
				state.connected.store(true, Ordering::SeqCst);
				info!(target = "netscope.stream", reconnected, "event stream opened");
				if let Some(on_open) = &handlers.on_open {
					on_open(OpenInfo { reconnected });
				}

				let cause = pump(bytes, &handlers.on_message).await;
				state.connected.store(false, Ordering::SeqCst);
				cause
			}
			Err(err) => err.to_string(),
		};

		let attempt = state.attempts.load(Ordering::SeqCst) + 1;
		match backoff.delay_for(attempt) {
			Some(delay) => {
				state.attempts.store(attempt, Ordering::SeqCst);
				warn!(target = "netscope.stream", attempt, delay_ms = delay.as_millis() as u64, %cause, "event stream lost; reconnecting");
				handlers.error(StreamError::Disconnected { attempt, delay, cause });
				tokio::time::sleep(delay).await;
			}
			None => {
				let attempts = attempt - 1;
				error!(target = "netscope.stream", attempts, %cause, "max reconnection attempts reached");
				if state.generation.load(Ordering::SeqCst) == generation {
					// Release our own handle so the stream reads as stopped.
					drop(state.task.lock().take());
				}
				handlers.error(StreamError::Exhausted { attempts, cause });
				return;
			}
		}
	}
}

/// Feeds frames to `on_message` until the connection ends; returns the cause.
async fn pump<T: DeserializeOwned>(mut bytes: ByteStream, on_message: &MessageFn<T>) -> String {
	let mut decoder = SseDecoder::new();
	while let Some(chunk) = bytes.next().await {
		let chunk = match chunk {
			Ok(chunk) => chunk,
			Err(err) => return err.to_string(),
		};
		for event in decoder.push(&chunk) {
			match serde_json::from_str::<T>(&event.data) {
				Ok(message) => on_message(message),
				Err(err) => debug!(target = "netscope.stream", error = %err, data = %event.data, "dropping malformed frame"),
			}
		}
	}
	if decoder.finish() {
		debug!(target = "netscope.stream", "discarding unterminated frame");
	}
	"stream closed by server".to_string()
}

#[cfg(test)]
mod tests {
	use serde::Deserialize;
	use tokio::sync::mpsc;

	use super::*;
	use crate::source::{FakeConnection, FakeEventSource};

	#[derive(Debug, Deserialize, PartialEq)]
	struct Tick {
		n: u32,
	}

	fn stream(source: &Arc<FakeEventSource>, base_ms: u64, max: u32) -> ReconnectingStream<Tick> {
		ReconnectingStream::new(source.clone(), Backoff::new(Duration::from_millis(base_ms), max))
	}

	fn collecting() -> (StreamHandlers<Tick>, mpsc::UnboundedReceiver<Tick>, mpsc::UnboundedReceiver<StreamError>) {
		let (msg_tx, msg_rx) = mpsc::unbounded_channel();
		let (err_tx, err_rx) = mpsc::unbounded_channel();
		let handlers = StreamHandlers::new(move |tick| {
			let _ = msg_tx.send(tick);
		})
		.on_error(move |err| {
			let _ = err_tx.send(err);
		});
		(handlers, msg_rx, err_rx)
	}

	#[tokio::test(start_paused = true)]
	async fn backoff_doubles_then_stops_with_one_terminal_error() {
		let source = Arc::new(FakeEventSource::new());
		let stream = stream(&source, 100, 5);
		let (handlers, _msgs, mut errors) = collecting();

		stream.start(handlers);

		let mut seen = Vec::new();
		while let Some(err) = errors.recv().await {
			let terminal = err.is_terminal();
			seen.push(err);
			if terminal {
				break;
			}
		}

		let terminal: Vec<_> = seen.iter().filter(|e| e.is_terminal()).collect();
		assert_eq!(terminal.len(), 1);
		assert!(matches!(terminal[0], StreamError::Exhausted { attempts: 5, .. }));
		assert_eq!(seen.len(), 6);

		let opens = source.open_times();
		assert_eq!(opens.len(), 6);
		let gaps: Vec<u64> = opens.windows(2).map(|w| (w[1] - w[0]).as_millis() as u64).collect();
		assert_eq!(gaps, vec![100, 200, 400, 800, 1600]);

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(source.open_count(), 6);
		assert!(!stream.is_running());
		assert!(errors.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn malformed_frames_are_dropped_without_closing() {
		let source = Arc::new(FakeEventSource::new());
		let (connection, live) = FakeConnection::live();
		source.push(connection);
		let stream = stream(&source, 100, 5);
		let (handlers, mut msgs, mut errors) = collecting();

		stream.start(handlers);
		live.send_data("{not json");
		live.send_data(r#"{"n": 1}"#);
		live.send_raw(b"data: {\"n\":");
		live.send_raw(b" 2}\n\n");

		assert_eq!(msgs.recv().await.unwrap(), Tick { n: 1 });
		assert_eq!(msgs.recv().await.unwrap(), Tick { n: 2 });
		assert!(stream.is_connected());
		assert!(errors.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn successful_open_resets_attempts() {
		let source = Arc::new(FakeEventSource::new());
		source.push(FakeConnection::Refused("down".to_string()));
		source.push(FakeConnection::Refused("still down".to_string()));
		let (connection, live) = FakeConnection::live();
		source.push(connection);

		let stream = stream(&source, 50, 5);
		let (open_tx, mut opens) = mpsc::unbounded_channel();
		let (handlers, mut msgs, _errors) = collecting();
		stream.start(handlers.on_open(move |info| {
			let _ = open_tx.send(info);
		}));

		assert_eq!(opens.recv().await.unwrap(), OpenInfo { reconnected: true });
		assert_eq!(stream.reconnect_attempts(), 0);
		live.send_data(r#"{"n": 9}"#);
		assert_eq!(msgs.recv().await.unwrap(), Tick { n: 9 });
	}

	#[tokio::test(start_paused = true)]
	async fn server_close_triggers_reconnect() {
		let source = Arc::new(FakeEventSource::new());
		source.push(FakeConnection::frames([r#"{"n": 1}"#]));
		source.push(FakeConnection::frames([r#"{"n": 2}"#]));
		let stream = stream(&source, 10, 1);
		let (handlers, mut msgs, mut errors) = collecting();

		stream.start(handlers);

		assert_eq!(msgs.recv().await.unwrap(), Tick { n: 1 });
		assert!(matches!(errors.recv().await.unwrap(), StreamError::Disconnected { attempt: 1, .. }));
		assert_eq!(msgs.recv().await.unwrap(), Tick { n: 2 });
	}

	#[tokio::test(start_paused = true)]
	async fn restart_tears_down_previous_connection() {
		let source = Arc::new(FakeEventSource::new());
		let (first, first_live) = FakeConnection::live();
		let (second, _second_live) = FakeConnection::live();
		source.push(first);
		source.push(second);
		let stream = stream(&source, 100, 5);

		let (handlers, _msgs, _errors) = collecting();
		stream.start(handlers);
		tokio::time::sleep(Duration::from_millis(1)).await;
		let (handlers, _msgs2, _errors2) = collecting();
		stream.start(handlers);
		tokio::time::sleep(Duration::from_millis(1)).await;

		assert!(first_live.is_closed());
		assert_eq!(source.open_count(), 2);
		assert!(stream.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn stop_is_idempotent_and_safe_before_start() {
		let source = Arc::new(FakeEventSource::new());
		let (connection, live) = FakeConnection::live();
		source.push(connection);
		let stream = stream(&source, 100, 5);

		stream.stop();
		let (handlers, _msgs, _errors) = collecting();
		stream.start(handlers);
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert!(stream.is_connected());

		stream.stop();
		stream.stop();
		tokio::time::sleep(Duration::from_millis(1)).await;

		assert!(!stream.is_running());
		assert!(!stream.is_connected());
		assert!(live.is_closed());
	}
}

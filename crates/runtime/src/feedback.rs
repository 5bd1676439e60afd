//! User-visible notifications.
//!
//! The coordinator and the discovery tracker report outcomes through a
//! [`FeedbackSink`]; how they are shown (toast, log line, status bar) is up to
//! the embedding application.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
	Success,
	Info,
	Warning,
	Error,
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
	pub tone: Tone,
	pub message: String,
	/// Endpoint the notification refers to, for request outcomes.
	pub endpoint: Option<String>,
	/// Stays visible until dismissed instead of timing out.
	pub sticky: bool,
}

impl Feedback {
	pub fn new(tone: Tone, message: impl Into<String>) -> Self {
		Self {
			tone,
			message: message.into(),
			endpoint: None,
			sticky: false,
		}
	}

	pub fn success(message: impl Into<String>) -> Self {
		Self::new(Tone::Success, message)
	}

	pub fn warning(message: impl Into<String>) -> Self {
		Self::new(Tone::Warning, message)
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self::new(Tone::Error, message)
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = Some(endpoint.into());
		self
	}

	pub fn sticky(mut self) -> Self {
		self.sticky = true;
		self
	}
}

/// Push-only notification consumer.
pub trait FeedbackSink: Send + Sync {
	fn push(&self, feedback: Feedback);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
	fn push(&self, feedback: Feedback) {
		let endpoint = feedback.endpoint.as_deref().unwrap_or("-");
		match feedback.tone {
			Tone::Success | Tone::Info => info!(target = "netscope.feedback", endpoint, "{}", feedback.message),
			Tone::Warning => warn!(target = "netscope.feedback", endpoint, "{}", feedback.message),
			Tone::Error => error!(target = "netscope.feedback", endpoint, sticky = feedback.sticky, "{}", feedback.message),
		}
	}
}

/// Forwards notifications over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelFeedback {
	tx: mpsc::UnboundedSender<Feedback>,
}

impl ChannelFeedback {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<Feedback>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl FeedbackSink for ChannelFeedback {
	fn push(&self, feedback: Feedback) {
		// Receiver gone means nobody is displaying notifications any more.
		let _ = self.tx.send(feedback);
	}
}

/// Keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingFeedback {
	entries: Arc<Mutex<Vec<Feedback>>>,
}

impl RecordingFeedback {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> Vec<Feedback> {
		self.entries.lock().clone()
	}

	pub fn count(&self, tone: Tone) -> usize {
		self.entries.lock().iter().filter(|f| f.tone == tone).count()
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}

impl FeedbackSink for RecordingFeedback {
	fn push(&self, feedback: Feedback) {
		self.entries.lock().push(feedback);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recording_sink_counts_by_tone() {
		let sink = RecordingFeedback::new();
		sink.push(Feedback::success("done"));
		sink.push(Feedback::error("boom").with_endpoint("/hosts").sticky());
		sink.push(Feedback::error("again"));

		assert_eq!(sink.count(Tone::Error), 2);
		assert_eq!(sink.count(Tone::Warning), 0);
		let entries = sink.entries();
		assert_eq!(entries[1].endpoint.as_deref(), Some("/hosts"));
		assert!(entries[1].sticky);
	}

	#[tokio::test]
	async fn channel_sink_forwards_in_order() {
		let (sink, mut rx) = ChannelFeedback::new();
		sink.push(Feedback::warning("first"));
		sink.push(Feedback::success("second"));

		assert_eq!(rx.recv().await.unwrap().message, "first");
		assert_eq!(rx.recv().await.unwrap().message, "second");
	}
}

//! Wiring shared by every command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use netscope::{ClientConfig, CollectionRefresher, Delivery, DiscoveryTracker, EntityStores};
use netscope_protocol::endpoints;
use netscope_runtime::{ChannelFeedback, Feedback, FeedbackSink, ReqwestTransport, RequestCoordinator, SseEventSource, Tone};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cli::Cli;

const FEEDBACK_DRAIN: Duration = Duration::from_millis(250);

pub struct ClientContext {
	pub config: ClientConfig,
	pub tracker: DiscoveryTracker,
	pub refresher: Arc<CollectionRefresher>,
	printer: JoinHandle<()>,
}

impl ClientContext {
	/// Loads the config file and applies command-line overrides.
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		let mut config = ClientConfig::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;
		if let Some(server) = &cli.server {
			config.server_url = server.clone();
		}
		if cli.polling {
			config.delivery = Delivery::Polling;
		}
		Self::new(config)
	}

	pub fn new(config: ClientConfig) -> Result<Self> {
		let transport = Arc::new(ReqwestTransport::new(&config.server_url).with_context(|| format!("invalid server url {}", config.server_url))?);
		let source = Arc::new(SseEventSource::for_endpoint(&transport, endpoints::STREAM)?);

		let (sink, rx) = ChannelFeedback::new();
		let feedback: Arc<dyn FeedbackSink> = Arc::new(sink);
		let coordinator = Arc::new(RequestCoordinator::with_debounce(transport, Arc::clone(&feedback), config.debounce()));
		let refresher = Arc::new(CollectionRefresher::with_interval(
			Arc::clone(&coordinator),
			Arc::new(EntityStores::default()),
			config.node_refresh_interval(),
		));
		let tracker = DiscoveryTracker::with_config(coordinator, source, refresher.clone(), feedback, config.tracker_config());

		Ok(Self {
			config,
			tracker,
			refresher,
			printer: tokio::spawn(print_feedback(rx)),
		})
	}

	/// Stops background work and flushes pending notifications.
	pub async fn finish(self) {
		self.tracker.stop_updates();
		self.refresher.stop_periodic();
		drop(self.tracker);
		drop(self.refresher);
		// Detached request tasks may still hold a sender; don't wait on them forever.
		let _ = tokio::time::timeout(FEEDBACK_DRAIN, self.printer).await;
	}
}

async fn print_feedback(mut rx: mpsc::UnboundedReceiver<Feedback>) {
	while let Some(feedback) = rx.recv().await {
		eprintln!("{}", render_feedback(&feedback));
	}
}

fn render_feedback(feedback: &Feedback) -> String {
	let label = match feedback.tone {
		Tone::Success => "ok",
		Tone::Info => "info",
		Tone::Warning => "warning",
		Tone::Error => "error",
	};
	format!("{label}: {}", feedback.message)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn feedback_is_labelled_by_tone() {
		assert_eq!(render_feedback(&Feedback::warning("Discovery cancelled")), "warning: Discovery cancelled");
		assert_eq!(render_feedback(&Feedback::success("done")), "ok: done");
	}

	#[tokio::test]
	async fn rejects_unparseable_server_url() {
		let config = ClientConfig {
			server_url: "not a url".to_string(),
			..ClientConfig::default()
		};
		assert!(ClientContext::new(config).is_err());
	}
}

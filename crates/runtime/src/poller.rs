//! Fixed-interval polling.
//!
//! The first poll runs as soon as [`Poller::start`] is called, then once per
//! interval. A failing poll is routed to the error callback and does not stop
//! later ticks; the owner stops the poller if it wants to.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Poll cadence for discovery session state.
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Background refresh cadence for node data.
pub const NODE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const MIN_INTERVAL: Duration = Duration::from_millis(1);

type TickFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Poller {
	interval: Mutex<Duration>,
	tick: Mutex<Option<TickFn>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
	pub fn new(interval: Duration) -> Self {
		Self {
			interval: Mutex::new(interval),
			tick: Mutex::new(None),
			task: Mutex::new(None),
		}
	}

	/// Starts polling with `on_poll`, replacing any previous loop.
	pub fn start<F, Fut, E>(&self, on_poll: F, on_error: impl Fn(E) + Send + Sync + 'static)
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), E>> + Send + 'static,
		E: Display + Send + 'static,
	{
		let on_error = Arc::new(on_error);
		let tick: TickFn = Arc::new(move || {
			let poll = on_poll();
			let on_error = Arc::clone(&on_error);
			async move {
				if let Err(err) = poll.await {
					warn!(target = "netscope.poller", error = %err, "poll failed");
					on_error(err);
				}
			}
			.boxed()
		});

		*self.tick.lock() = Some(Arc::clone(&tick));
		self.spawn(tick);
	}

	/// Cancels the loop. Safe to call repeatedly, or from inside a poll callback.
	pub fn stop(&self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
			debug!(target = "netscope.poller", "poller stopped");
		}
	}

	pub fn is_running(&self) -> bool {
		self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	pub fn interval(&self) -> Duration {
		*self.interval.lock()
	}

	/// Runs the current callback once outside the schedule; `false` if never started.
	pub async fn poll_once(&self) -> bool {
		let tick = self.tick.lock().clone();
		match tick {
			Some(tick) => {
				tick().await;
				true
			}
			None => false,
		}
	}

	/// Changes the cadence; a running loop restarts with an immediate poll.
	pub fn update_interval(&self, interval: Duration) {
		*self.interval.lock() = interval;
		if !self.is_running() {
			return;
		}
		let tick = self.tick.lock().clone();
		if let Some(tick) = tick {
			self.spawn(tick);
		}
	}

	fn spawn(&self, tick: TickFn) {
		self.stop();
		let period = self.interval().max(MIN_INTERVAL);
		debug!(target = "netscope.poller", interval_ms = period.as_millis() as u64, "poller started");
		let task = tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				tick().await;
			}
		});
		*self.task.lock() = Some(task);
	}
}

impl Default for Poller {
	fn default() -> Self {
		Self::new(DISCOVERY_POLL_INTERVAL)
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		if let Some(task) = self.task.get_mut().take() {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn counter() -> Arc<AtomicUsize> {
		Arc::new(AtomicUsize::new(0))
	}

	fn counting(count: &Arc<AtomicUsize>) -> impl Fn() -> futures_util::future::Ready<Result<(), String>> + Send + Sync + 'static {
		let count = Arc::clone(count);
		move || {
			count.fetch_add(1, Ordering::SeqCst);
			futures_util::future::ready(Ok(()))
		}
	}

	async fn settle(ms: u64) {
		tokio::time::sleep(Duration::from_millis(ms)).await;
	}

	#[tokio::test(start_paused = true)]
	async fn polls_immediately_then_on_interval() {
		let poller = Poller::new(Duration::from_secs(5));
		let polls = counter();

		poller.start(counting(&polls), |_: String| {});
		settle(10).await;
		assert_eq!(polls.load(Ordering::SeqCst), 1);

		settle(5_000).await;
		assert_eq!(polls.load(Ordering::SeqCst), 2);
		settle(5_000).await;
		assert_eq!(polls.load(Ordering::SeqCst), 3);
		assert!(poller.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn failing_tick_does_not_stop_later_ticks() {
		let poller = Poller::new(Duration::from_secs(1));
		let errors = counter();
		let seen = Arc::clone(&errors);

		poller.start(|| async { Err::<(), _>("boom".to_string()) }, move |_| {
			seen.fetch_add(1, Ordering::SeqCst);
		});
		settle(2_500).await;

		assert_eq!(errors.load(Ordering::SeqCst), 3);
		assert!(poller.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn owner_can_stop_from_the_error_callback() {
		let poller = Arc::new(Poller::new(Duration::from_secs(1)));
		let errors = counter();
		let seen = Arc::clone(&errors);
		let handle = Arc::downgrade(&poller);

		poller.start(|| async { Err::<(), _>("down".to_string()) }, move |_| {
			seen.fetch_add(1, Ordering::SeqCst);
			if let Some(poller) = handle.upgrade() {
				poller.stop();
			}
		});
		settle(5_000).await;

		assert_eq!(errors.load(Ordering::SeqCst), 1);
		assert!(!poller.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn stop_is_idempotent() {
		let poller = Poller::new(Duration::from_secs(1));
		let polls = counter();
		poller.stop();

		poller.start(counting(&polls), |_: String| {});
		settle(10).await;
		poller.stop();
		poller.stop();
		settle(5_000).await;

		assert_eq!(polls.load(Ordering::SeqCst), 1);
		assert!(!poller.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn update_interval_restarts_running_loop() {
		let poller = Poller::new(Duration::from_secs(10));
		let polls = counter();

		poller.start(counting(&polls), |_: String| {});
		settle(10).await;
		poller.update_interval(Duration::from_secs(1));
		settle(2_100).await;

		// initial, immediate restart, then two 1s ticks
		assert_eq!(polls.load(Ordering::SeqCst), 4);
		assert_eq!(poller.interval(), Duration::from_secs(1));
	}

	#[tokio::test(start_paused = true)]
	async fn poll_once_runs_outside_schedule() {
		let poller = Poller::new(Duration::from_secs(60));
		let polls = counter();
		assert!(!poller.poll_once().await);

		poller.start(counting(&polls), |_: String| {});
		settle(10).await;
		assert!(poller.poll_once().await);

		assert_eq!(polls.load(Ordering::SeqCst), 2);
	}
}

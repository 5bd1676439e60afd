//! Exponential reconnect backoff.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// `delay = base * 2^(attempt - 1)` for attempts `1..=max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base: Duration,
	pub max_attempts: u32,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: DEFAULT_BASE_DELAY,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl Backoff {
	pub fn new(base: Duration, max_attempts: u32) -> Self {
		Self { base, max_attempts }
	}

	/// Delay before reconnect `attempt` (1-based), or `None` once the budget is spent.
	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if attempt == 0 || attempt > self.max_attempts {
			return None;
		}
		let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
		Some(self.base.saturating_mul(factor))
	}
}

//! Dependent-data refresh.
//!
//! Discovery progress makes the host, service and subnet collections stale.
//! The tracker decides *when* to refresh through [`should_refresh`]; a
//! [`DataRefresher`] decides *how*. Refreshes go through the
//! [`RequestCoordinator`], so sessions progressing at the same time collapse
//! onto one set of network calls.
//!
//! Refresh failures are reported by the coordinator and never feed back into
//! session state.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use netscope_protocol::endpoints;
use netscope_runtime::{HttpRequest, NODE_REFRESH_INTERVAL, Poller, RequestCoordinator, Store};
use serde_json::Value;
use tracing::{debug, warn};

/// Entity rows as returned by the server; their schema is not interpreted here.
pub type Collection = Vec<Value>;

/// `true` only for a strictly increasing discovered count.
pub fn should_refresh(previous: u64, current: u64) -> bool {
	current > previous
}

/// Re-fetches data that depends on discovery results.
pub trait DataRefresher: Send + Sync {
	/// Starts one refresh. The returned future owns everything it needs.
	fn refresh(&self) -> BoxFuture<'static, ()>;
}

/// Stores for the collections refreshed by [`CollectionRefresher`].
#[derive(Debug, Default)]
pub struct EntityStores {
	pub hosts: Store<Collection>,
	pub services: Store<Collection>,
	pub subnets: Store<Collection>,
}

/// Refreshes hosts, services and subnets into [`EntityStores`].
pub struct CollectionRefresher {
	coordinator: Arc<RequestCoordinator>,
	stores: Arc<EntityStores>,
	periodic: Poller,
}

impl CollectionRefresher {
	pub fn new(coordinator: Arc<RequestCoordinator>, stores: Arc<EntityStores>) -> Self {
		Self::with_interval(coordinator, stores, NODE_REFRESH_INTERVAL)
	}

	/// Like [`new`](Self::new) with a custom periodic refresh interval.
	pub fn with_interval(coordinator: Arc<RequestCoordinator>, stores: Arc<EntityStores>, interval: Duration) -> Self {
		Self {
			coordinator,
			stores,
			periodic: Poller::new(interval),
		}
	}

	pub fn stores(&self) -> &Arc<EntityStores> {
		&self.stores
	}

	/// Fetches all three collections; returns how many failed.
	pub async fn refresh_all(&self) -> usize {
		fetch_all(Arc::clone(&self.coordinator), Arc::clone(&self.stores)).await
	}

	/// Refreshes now and then on the periodic interval until stopped.
	pub fn start_periodic(&self) {
		let coordinator = Arc::clone(&self.coordinator);
		let stores = Arc::clone(&self.stores);
		self.periodic.start(
			move || {
				let coordinator = Arc::clone(&coordinator);
				let stores = Arc::clone(&stores);
				async move {
					fetch_all(coordinator, stores).await;
					Ok::<(), Infallible>(())
				}
			},
			|never: Infallible| match never {},
		);
	}

	pub fn stop_periodic(&self) {
		self.periodic.stop();
	}

	pub fn periodic_running(&self) -> bool {
		self.periodic.is_running()
	}
}

impl DataRefresher for CollectionRefresher {
	fn refresh(&self) -> BoxFuture<'static, ()> {
		let coordinator = Arc::clone(&self.coordinator);
		let stores = Arc::clone(&self.stores);
		async move {
			fetch_all(coordinator, stores).await;
		}
		.boxed()
	}
}

async fn fetch_all(coordinator: Arc<RequestCoordinator>, stores: Arc<EntityStores>) -> usize {
	let replace = |data: &Collection, _: &Collection| data.clone();
	let (hosts, services, subnets) = tokio::join!(
		coordinator.request_into(HttpRequest::get(endpoints::HOSTS), &stores.hosts, replace),
		coordinator.request_into(HttpRequest::get(endpoints::SERVICES), &stores.services, replace),
		coordinator.request_into(HttpRequest::get(endpoints::SUBNETS), &stores.subnets, replace),
	);

	let failed = [hosts.is_err(), services.is_err(), subnets.is_err()].into_iter().filter(|failed| *failed).count();
	if failed > 0 {
		warn!(target = "netscope.refresh", failed, "dependent data refresh incomplete");
	} else {
		debug!(target = "netscope.refresh", "dependent data refreshed");
	}
	failed
}

/// Counts refresh requests without doing any I/O.
#[derive(Debug, Default, Clone)]
pub struct CountingRefresher {
	count: Arc<AtomicUsize>,
}

impl CountingRefresher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn count(&self) -> usize {
		self.count.load(Ordering::SeqCst)
	}
}

impl DataRefresher for CountingRefresher {
	fn refresh(&self) -> BoxFuture<'static, ()> {
		self.count.fetch_add(1, Ordering::SeqCst);
		futures_util::future::ready(()).boxed()
	}
}

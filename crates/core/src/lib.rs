//! Discovery session tracking for netscope clients.
//!
//! [`DiscoveryTracker`] follows discovery sessions run by remote daemons:
//! it initiates and cancels sessions, folds pushed or polled updates into a
//! session map, reports terminal phases to a
//! [`FeedbackSink`](netscope_runtime::FeedbackSink), and refreshes dependent
//! collections through a [`DataRefresher`] as hosts are found.
//!
//! # Example
//!
//! ```ignore
//! let config = ClientConfig::load_or_default(None)?;
//! let transport = Arc::new(ReqwestTransport::new(&config.server_url)?);
//! let source = Arc::new(SseEventSource::for_endpoint(&transport, endpoints::STREAM)?);
//! let feedback: Arc<dyn FeedbackSink> = Arc::new(TracingFeedback);
//! let coordinator = Arc::new(RequestCoordinator::with_debounce(transport, feedback.clone(), config.debounce()));
//! let refresher = Arc::new(CollectionRefresher::new(coordinator.clone(), Arc::default()));
//!
//! let tracker = DiscoveryTracker::with_config(coordinator, source, refresher, feedback, config.tracker_config());
//! let session = tracker.initiate_discovery("daemon-1").await?;
//! ```

pub mod config;
pub mod error;
pub mod refresh;
pub mod session;
pub mod tracker;

pub use config::ClientConfig;
pub use error::{Result, TrackerError};
pub use refresh::{Collection, CollectionRefresher, CountingRefresher, DataRefresher, EntityStores, should_refresh};
pub use session::{DiscoverySession, TrackerSnapshot};
pub use tracker::{Delivery, DiscoveryTracker, TrackerConfig, UpdateOutcome};

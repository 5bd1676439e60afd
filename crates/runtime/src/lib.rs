//! Connection plumbing for netscope clients.
//!
//! - [`RequestCoordinator`] de-duplicates and briefly caches API calls made
//!   through an [`HttpTransport`], reporting failures to a [`FeedbackSink`]
//! - [`ReconnectingStream`] keeps an SSE subscription alive with exponential
//!   [`Backoff`]
//! - [`Poller`] is the fixed-interval fallback
//! - [`Store`] holds observable client state
//!
//! [`FakeTransport`] and [`FakeEventSource`] script the network side for tests.

pub mod backoff;
pub mod coordinator;
pub mod error;
pub mod fake_transport;
pub mod feedback;
pub mod poller;
pub mod source;
pub mod sse;
pub mod store;
pub mod stream;
pub mod transport;

pub use backoff::Backoff;
pub use coordinator::{FailureKind, RequestCoordinator, RequestFailure, RequestKey};
pub use error::{Result, RuntimeError};
pub use fake_transport::{FakeReply, FakeTransport};
pub use feedback::{ChannelFeedback, Feedback, FeedbackSink, RecordingFeedback, Tone, TracingFeedback};
pub use poller::{DISCOVERY_POLL_INTERVAL, NODE_REFRESH_INTERVAL, Poller};
pub use source::{ByteStream, EventSource, FakeConnection, FakeEventSource, LiveChannel, SseEventSource};
pub use sse::{SseDecoder, SseEvent};
pub use store::Store;
pub use stream::{OpenInfo, ReconnectingStream, StreamError, StreamHandlers};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

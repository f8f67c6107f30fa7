//! Transport layer: one lifecycle contract over four wire mechanisms
//!
//! Every transport - stdio child process, ssh-executed remote process,
//! container-exec process, HTTP - implements the same capability trait:
//!
//! - [`Transport::connect`] is idempotent: calling it while already
//!   Connected returns immediately with no side effects
//! - [`Transport::disconnect`] is safe to call repeatedly and always leaves
//!   the transport Disconnected
//! - [`Transport::send_request`] requires Connected and fails fast with
//!   [`TransportError::NotConnected`] otherwise, without touching the wire
//! - [`Transport::status`] and [`Transport::is_connected`] are pure reads
//!
//! # Status machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                    |  ^
//!                    v  | (retry)
//!                  Error
//! Connected -> Disconnected   (explicit disconnect or remote close)
//! ```
//!
//! Error is recoverable through retry, not terminal.
//!
//! # Events
//!
//! Lifecycle signals are delivered over a broadcast channel rather than
//! through callbacks; subscribe with [`Transport::subscribe`]. A `Status`
//! event fires exactly once per actual transition - setting the same status
//! twice emits nothing.

pub mod container;
pub mod http;
pub mod retry;
pub mod ssh;
pub mod stdio;
pub(crate) mod stream;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::TransportKind;
use crate::error::TransportError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

pub use container::ContainerTransport;
pub use http::HttpTransport;
pub use retry::{with_retry, RequestIdGenerator, RetryPolicy};
pub use ssh::SshTransport;
pub use stdio::StdioTransport;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// No connection; the idle resting state
    Disconnected,
    /// A connection attempt is in progress
    Connecting,
    /// Ready to serve requests
    Connected,
    /// The last connection attempt failed or the stream broke
    Error,
}

/// Lifecycle signals observable by the owning service
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport reached the Connected state
    Connected,
    /// The transport reached the Disconnected state
    Disconnected,
    /// A transport-level error occurred
    Error(String),
    /// The status changed to the carried value
    Status(TransportStatus),
}

/// Capability interface implemented by every transport kind
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish the connection, retrying per the configured policy
    ///
    /// Returns immediately if already Connected. On failure the error from
    /// the final attempt is propagated and the status is left at Error.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the connection down
    ///
    /// Rejects every request still pending on this transport with a
    /// "transport disconnected" error, releases the underlying resources and
    /// leaves the status Disconnected. Safe to call while not connected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one JSON-RPC request and await its correlated response
    ///
    /// Requires the Connected state. The response may itself carry a
    /// JSON-RPC `error` member; only transport-level failures return `Err`.
    async fn send_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Current connection status (pure read)
    fn status(&self) -> TransportStatus;

    /// Whether the transport is currently Connected
    fn is_connected(&self) -> bool {
        self.status() == TransportStatus::Connected
    }

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// The wire mechanism this transport uses
    fn kind(&self) -> TransportKind;

    /// Next request id from this instance's monotonic counter
    ///
    /// Ids start at 1, are never reused within the instance's lifetime and
    /// are scoped to the instance - correlation never crosses transports.
    fn next_request_id(&self) -> i64;
}

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;
const STATUS_ERROR: u8 = 3;

fn encode_status(status: TransportStatus) -> u8 {
    match status {
        TransportStatus::Disconnected => STATUS_DISCONNECTED,
        TransportStatus::Connecting => STATUS_CONNECTING,
        TransportStatus::Connected => STATUS_CONNECTED,
        TransportStatus::Error => STATUS_ERROR,
    }
}

fn decode_status(raw: u8) -> TransportStatus {
    match raw {
        STATUS_CONNECTING => TransportStatus::Connecting,
        STATUS_CONNECTED => TransportStatus::Connected,
        STATUS_ERROR => TransportStatus::Error,
        _ => TransportStatus::Disconnected,
    }
}

struct StatusInner {
    status: AtomicU8,
    events: broadcast::Sender<TransportEvent>,
}

/// Shared status holder with change-only event emission
///
/// Cheap to clone; all transports and their background tasks share one cell
/// per instance. `set` emits a `Status` event (plus the matching
/// `Connected`/`Disconnected` signal) only when the value actually changes,
/// so repeated identical transitions are silent.
#[derive(Clone)]
pub(crate) struct StatusCell {
    inner: Arc<StatusInner>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(StatusInner {
                status: AtomicU8::new(STATUS_DISCONNECTED),
                events,
            }),
        }
    }

    pub fn get(&self) -> TransportStatus {
        decode_status(self.inner.status.load(Ordering::SeqCst))
    }

    pub fn set(&self, next: TransportStatus) {
        let prev = decode_status(self.inner.status.swap(encode_status(next), Ordering::SeqCst));
        if prev == next {
            return;
        }
        // Send errors only mean nobody is subscribed
        let _ = self.inner.events.send(TransportEvent::Status(next));
        match next {
            TransportStatus::Connected => {
                let _ = self.inner.events.send(TransportEvent::Connected);
            }
            TransportStatus::Disconnected => {
                let _ = self.inner.events.send(TransportEvent::Disconnected);
            }
            _ => {}
        }
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let _ = self.inner.events.send(TransportEvent::Error(message.into()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

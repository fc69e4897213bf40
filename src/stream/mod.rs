//! Event stream access for the monitor.
//!
//! This module contains:
//! - The event record model and frame parsing
//! - Server-sent event framing
//! - Transports (HTTP, and a hand-driven one for tests)
//! - The connector that supervises a subscription

pub mod connector;
pub mod sse;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use connector::{ConnectionState, StreamConnector, StreamEvent, Subscription};
pub use sse::SseDecoder;
pub use transport::{
    HttpTransport, ManualFeed, ManualTransport, SharedTransport, Transport, TransportError,
    TransportEvent,
};
pub use types::{Analysis, EventRecord, FrameError, Payload, RecordId, Sentiment, UNKNOWN_SOURCE};

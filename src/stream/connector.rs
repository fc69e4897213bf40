//! Supervises one logical subscription to the event stream.
//!
//! A [`Subscription`] is a lazy, non-restartable sequence of
//! [`StreamEvent`]s. Transport failures never surface as errors: they end the
//! sequence with a [`ConnectionState`] transition. Malformed frames surface
//! as [`StreamEvent::ParseError`] and the subscription keeps going.

use crate::stream::sse::SseDecoder;
use crate::stream::transport::{SharedTransport, TransportEvent};
use crate::stream::types::EventRecord;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the channel between the transport and the pump.
const TRANSPORT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the channel between the pump and the subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state shown to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The attempt ended before the stream ever opened
    Failed,
}

impl ConnectionState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Output of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StateChange(ConnectionState),
    Record(EventRecord),
    ParseError(String),
}

/// Creates subscriptions against a transport.
pub struct StreamConnector {
    transport: SharedTransport,
    next_id: AtomicU64,
}

impl StreamConnector {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a fresh subscription.
    ///
    /// The first event is always `StateChange(Connecting)`; the last is a
    /// transition to `Disconnected` or `Failed` unless the subscription is
    /// cancelled first.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = self.transport.open(transport_tx);
        let pump = tokio::spawn(pump(id, transport_rx, events_tx));

        tracing::debug!(subscription = id, "subscribed to event stream");

        Subscription {
            id,
            events: events_rx,
            pump: Some(pump),
            transport: Some(transport),
        }
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    events: mpsc::Receiver<StreamEvent>,
    pump: Option<JoinHandle<()>>,
    transport: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the subscription has ended or
    /// been cancelled.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if !self.is_active() {
            return None;
        }
        self.events.recv().await
    }

    pub fn is_active(&self) -> bool {
        self.pump.is_some()
    }

    /// Cancel the subscription and release the transport.
    ///
    /// Idempotent. No event is delivered after this returns, including
    /// events that were already queued.
    pub fn unsubscribe(&mut self) {
        let (Some(pump), transport) = (self.pump.take(), self.transport.take()) else {
            return;
        };
        pump.abort();
        if let Some(transport) = transport {
            transport.abort();
        }
        self.events.close();
        tracing::debug!(subscription = self.id, "unsubscribed from event stream");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Turn transport events into stream events until the connection ends.
async fn pump(
    id: u64,
    mut transport: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<StreamEvent>,
) {
    if events
        .send(StreamEvent::StateChange(ConnectionState::Connecting))
        .await
        .is_err()
    {
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut opened = false;

    while let Some(event) = transport.recv().await {
        match event {
            TransportEvent::Open => {
                if !opened {
                    opened = true;
                    tracing::info!(subscription = id, "event stream connected");
                    if events
                        .send(StreamEvent::StateChange(ConnectionState::Connected))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            TransportEvent::Chunk(bytes) => {
                for data in decoder.feed(&bytes) {
                    let event = match EventRecord::parse(&data) {
                        Ok(record) => StreamEvent::Record(record),
                        Err(e) => {
                            tracing::warn!(
                                subscription = id,
                                error = %e,
                                "dropping malformed frame"
                            );
                            StreamEvent::ParseError(e.to_string())
                        }
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            TransportEvent::Closed => {
                tracing::info!(subscription = id, "event stream closed by server");
                break;
            }
            TransportEvent::Failed(e) => {
                tracing::warn!(subscription = id, error = %e, "event stream failed");
                break;
            }
        }
    }

    let ended = if opened {
        ConnectionState::Disconnected
    } else {
        ConnectionState::Failed
    };
    let _ = events.send(StreamEvent::StateChange(ended)).await;
}

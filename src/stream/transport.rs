//! Transports that carry the raw event stream.
//!
//! A transport only moves bytes: it reports when a connection opened, hands
//! over body chunks, and says how the connection ended. Framing and parsing
//! happen in the connector.

use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Something that happened on one transport connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server accepted the connection
    Open,
    /// A piece of the response body
    Chunk(Vec<u8>),
    /// The server ended the stream
    Closed,
    /// The connection failed
    Failed(TransportError),
}

/// Transport error types.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Client could not be configured
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server answered with a non-success status
    Status { status: u16 },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Config(msg) => write!(f, "Stream config error: {msg}"),
            TransportError::Network(msg) => write!(f, "Stream network error: {msg}"),
            TransportError::Status { status } => write!(f, "Stream endpoint returned {status}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Opens connections to the event stream.
pub trait Transport: Send + Sync + 'static {
    /// Open one connection. Events go into `sink` until the connection ends
    /// or the receiver is dropped. Aborting the returned task releases the
    /// connection.
    fn open(&self, sink: mpsc::Sender<TransportEvent>) -> JoinHandle<()>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Server-sent events over HTTP.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for `endpoint`.
    ///
    /// Only the connect phase is bounded by `connect_timeout`; the body is a
    /// long-lived stream and has no read timeout.
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn open(&self, sink: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let ending = stream_body(&client, &endpoint, &sink).await;
            let _ = sink.send(ending).await;
        })
    }
}

/// Pump one HTTP response into `sink`, returning how it ended.
async fn stream_body(
    client: &reqwest::Client,
    endpoint: &str,
    sink: &mpsc::Sender<TransportEvent>,
) -> TransportEvent {
    tracing::debug!(endpoint, "opening event stream");

    let mut response = match client
        .get(endpoint)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return TransportEvent::Failed(TransportError::Network(e.to_string())),
    };

    let status = response.status();
    if !status.is_success() {
        return TransportEvent::Failed(TransportError::Status {
            status: status.as_u16(),
        });
    }

    if sink.send(TransportEvent::Open).await.is_err() {
        return TransportEvent::Closed;
    }

    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                if sink.send(TransportEvent::Chunk(bytes.to_vec())).await.is_err() {
                    return TransportEvent::Closed;
                }
            }
            Ok(None) => return TransportEvent::Closed,
            Err(e) => return TransportEvent::Failed(TransportError::Network(e.to_string())),
        }
    }
}

/// Transport driven by hand, for tests and demos.
///
/// Every `open` becomes the current connection; the paired [`ManualFeed`]
/// pushes events into it.
pub struct ManualTransport {
    shared: Arc<ManualShared>,
}

#[derive(Default)]
struct ManualShared {
    current: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    opened: AtomicUsize,
    notify: Notify,
}

/// Control side of a [`ManualTransport`].
#[derive(Clone)]
pub struct ManualFeed {
    shared: Arc<ManualShared>,
}

impl ManualTransport {
    pub fn new() -> (Self, ManualFeed) {
        let shared = Arc::new(ManualShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            ManualFeed { shared },
        )
    }
}

impl Transport for ManualTransport {
    fn open(&self, sink: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
        let held = sink.clone();
        if let Ok(mut current) = self.shared.current.lock() {
            *current = Some(sink);
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();

        // Lives as long as the connection does.
        tokio::spawn(async move { held.closed().await })
    }
}

impl ManualFeed {
    /// Number of connections opened so far.
    pub fn open_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` connections have been opened.
    pub async fn wait_for_connections(&self, count: usize) {
        loop {
            let notified = self.shared.notify.notified();
            if self.open_count() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Push an event into the current connection. Returns false when there
    /// is no live connection to receive it.
    pub async fn send(&self, event: TransportEvent) -> bool {
        let sink = match self.shared.current.lock() {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn open(&self) -> bool {
        self.send(TransportEvent::Open).await
    }

    /// Send `data` as one server-sent event.
    pub async fn data(&self, data: &str) -> bool {
        self.send(TransportEvent::Chunk(format!("data: {data}\n\n").into_bytes()))
            .await
    }

    pub async fn close(&self) -> bool {
        self.send(TransportEvent::Closed).await
    }

    pub async fn fail(&self, message: &str) -> bool {
        self.send(TransportEvent::Failed(TransportError::Network(message.to_string())))
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::local_server::{serve_once, Ending, EVENT_STREAM_HEAD};
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for transport event")
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status { status: 503 };
        assert_eq!(err.to_string(), "Stream endpoint returned 503");
    }

    #[tokio::test]
    async fn test_http_transport_reports_refused_connection() {
        // Port 9 (discard) is not expected to be listening locally.
        let transport =
            HttpTransport::new("http://127.0.0.1:9/stream", Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _task = transport.open(tx);

        match rx.recv().await {
            Some(TransportEvent::Failed(TransportError::Network(_))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_transport_streams_body_until_server_closes() {
        let chunks = vec![
            "data: {\"source\":",
            "\"a\"}\n",
            "\ndata: {\"source\":\"b\"}\n\n",
        ];
        let (endpoint, server) = serve_once(EVENT_STREAM_HEAD, chunks.clone(), Ending::Close).await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _task = transport.open(tx);

        assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Open));

        let mut body = Vec::new();
        loop {
            match next_event(&mut rx).await {
                Some(TransportEvent::Chunk(bytes)) => body.extend(bytes),
                Some(TransportEvent::Closed) => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(String::from_utf8(body).unwrap(), chunks.concat());
        assert!(!server.await.unwrap());
    }

    #[tokio::test]
    async fn test_http_transport_reports_error_status() {
        let head = "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n";
        let (endpoint, _server) = serve_once(head, Vec::new(), Ending::Close).await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _task = transport.open(tx);

        assert_eq!(
            next_event(&mut rx).await,
            Some(TransportEvent::Failed(TransportError::Status { status: 503 }))
        );
    }

    #[tokio::test]
    async fn test_aborting_http_transport_releases_socket() {
        let (endpoint, server) =
            serve_once(EVENT_STREAM_HEAD, vec!["data: {}\n\n"], Ending::HoldOpen).await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let task = transport.open(tx);

        assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Open));
        assert!(matches!(
            next_event(&mut rx).await,
            Some(TransportEvent::Chunk(_))
        ));

        task.abort();
        let client_hung_up = tokio::time::timeout(WAIT, server)
            .await
            .expect("socket was never released")
            .unwrap();
        assert!(client_hung_up);
    }

    #[tokio::test]
    async fn test_manual_transport_delivers_to_latest_connection() {
        let (transport, feed) = ManualTransport::new();
        assert!(!feed.open().await);

        let (tx, mut rx) = mpsc::channel(8);
        let task = transport.open(tx);
        feed.wait_for_connections(1).await;

        assert!(feed.open().await);
        assert!(feed.data("{}").await);
        assert_eq!(rx.recv().await, Some(TransportEvent::Open));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Chunk(b"data: {}\n\n".to_vec()))
        );

        drop(rx);
        assert!(!feed.close().await);
        task.await.unwrap();
    }
}

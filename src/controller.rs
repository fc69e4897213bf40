//! Session-scoped ingestion.
//!
//! One [`IngestionController`] exists per signed-in session. It owns the
//! window, the pause gate and the stream subscription, and publishes a
//! [`DashboardSnapshot`] after every change. All mutation happens on a single
//! task fed by the subscription and a command channel, so the window never
//! has more than one writer.
//!
//! The subscription's lifetime is tied to the session only. Pausing never
//! touches it: records that arrive while paused are dropped at the gate.

use crate::config::Config;
use crate::core::buffer::{Admission, EventBuffer};
use crate::core::search::{DebouncedSearch, SearchIndex};
use crate::core::snapshot::DashboardSnapshot;
use crate::core::stats::StatsAggregator;
use crate::stream::connector::{ConnectionState, StreamConnector, StreamEvent, Subscription};
use crate::stream::transport::SharedTransport;
use crate::stream::types::EventRecord;
use crate::telemetry::{create_shared_log, SharedIngestLog};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

/// What the authentication boundary hands over.
#[derive(Debug, Clone)]
pub struct AuthSignal {
    pub authenticated: bool,
    pub operator: String,
}

impl AuthSignal {
    pub fn authenticated(operator: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            operator: operator.into(),
        }
    }
}

/// Why a session could not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NotAuthenticated,
    MissingOperator,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotAuthenticated => write!(f, "Session is not authenticated"),
            SessionError::MissingOperator => write!(f, "Operator name is empty"),
        }
    }
}

impl std::error::Error for SessionError {}

enum Command {
    PauseChanged,
    SignOut(oneshot::Sender<()>),
}

/// Handle to a running session.
pub struct IngestionController {
    operator: String,
    commands: mpsc::UnboundedSender<Command>,
    paused: Arc<AtomicBool>,
    snapshots: watch::Receiver<Arc<DashboardSnapshot>>,
    log: SharedIngestLog,
    search: SearchIndex,
    debounce: Duration,
    task: Option<JoinHandle<()>>,
}

impl IngestionController {
    /// Start a session: subscribe to the stream and begin publishing
    /// snapshots. Must be called within a tokio runtime.
    pub fn start(
        auth: AuthSignal,
        transport: SharedTransport,
        config: &Config,
    ) -> Result<Self, SessionError> {
        if !auth.authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        let operator = auth.operator.trim().to_string();
        if operator.is_empty() {
            return Err(SessionError::MissingOperator);
        }

        let paused = Arc::new(AtomicBool::new(config.paused));
        let log = create_shared_log();
        let (publisher, snapshots) = watch::channel(Arc::new(DashboardSnapshot {
            operator: Some(operator.clone()),
            paused: config.paused,
            lifetime: log.stats(),
            ..DashboardSnapshot::default()
        }));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let session = IngestSession {
            operator: operator.clone(),
            connector: StreamConnector::new(transport),
            buffer: EventBuffer::new(config.buffer_capacity),
            aggregator: StatsAggregator::new(config.timezone()),
            connection: ConnectionState::Disconnected,
            paused: paused.clone(),
            log: log.clone(),
            publisher,
            reconnect_delay: config.reconnect_delay,
        };

        tracing::info!(operator = %operator, paused = config.paused, "session started");
        let task = tokio::spawn(session.run(command_rx));

        Ok(Self {
            operator,
            commands,
            paused,
            snapshots,
            log,
            search: config.search_index(),
            debounce: config.search.debounce,
            task: Some(task),
        })
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Whether the session is still signed in.
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.snapshots.clone()
    }

    /// Live lifetime counters.
    pub fn log(&self) -> SharedIngestLog {
        self.log.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the pause gate. Takes effect for the next record that arrives.
    pub fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            self.pause_changed(paused);
        }
    }

    /// Flip the pause gate, returning the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        self.pause_changed(paused);
        paused
    }

    fn pause_changed(&self, paused: bool) {
        tracing::info!(paused, "pause gate changed");
        let _ = self.commands.send(Command::PauseChanged);
    }

    /// Immediate search over the current window.
    pub fn search(&self, query: &str) -> Vec<EventRecord> {
        self.snapshot().search(&self.search, query)
    }

    /// A debounced searcher reading this session's window.
    pub fn debounced_search(&self) -> DebouncedSearch {
        DebouncedSearch::new(self.search.clone(), self.debounce, self.watch())
    }

    /// End the session: unsubscribe, clear the window and publish the empty,
    /// disconnected snapshot in one step. Idempotent.
    pub async fn sign_out(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::SignOut(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "ingest task ended abnormally");
        }
    }
}

/// The connection half of the session loop.
enum Link {
    Active(Subscription),
    /// Waiting out a configured reconnect delay
    Waiting(Pin<Box<Sleep>>),
}

enum LinkEvent {
    Stream(StreamEvent),
    Ended,
    RetryDue,
}

impl Link {
    async fn next(&mut self) -> LinkEvent {
        match self {
            Link::Active(subscription) => match subscription.next().await {
                Some(event) => LinkEvent::Stream(event),
                None => LinkEvent::Ended,
            },
            Link::Waiting(delay) => {
                delay.as_mut().await;
                LinkEvent::RetryDue
            }
        }
    }
}

/// State owned by the ingest task.
struct IngestSession {
    operator: String,
    connector: StreamConnector,
    buffer: EventBuffer,
    aggregator: StatsAggregator,
    connection: ConnectionState,
    paused: Arc<AtomicBool>,
    log: SharedIngestLog,
    publisher: watch::Sender<Arc<DashboardSnapshot>>,
    reconnect_delay: Duration,
}

impl IngestSession {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut link = Link::Active(self.subscribe());

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::PauseChanged) => self.publish(),
                    Some(Command::SignOut(done)) => {
                        self.sign_out(link);
                        let _ = done.send(());
                        return;
                    }
                    // Controller dropped without signing out.
                    None => {
                        self.sign_out(link);
                        return;
                    }
                },
                event = link.next() => match event {
                    LinkEvent::Stream(event) => self.handle(event),
                    LinkEvent::Ended if self.reconnect_delay.is_zero() => {
                        tracing::info!("subscription ended, re-subscribing");
                        link = Link::Active(self.subscribe());
                    }
                    LinkEvent::Ended => {
                        tracing::info!(
                            delay_ms = self.reconnect_delay.as_millis() as u64,
                            "subscription ended, re-subscribing after delay"
                        );
                        let delay = tokio::time::sleep(self.reconnect_delay);
                        link = Link::Waiting(Box::pin(delay));
                    }
                    LinkEvent::RetryDue => link = Link::Active(self.subscribe()),
                },
            }
        }
    }

    fn subscribe(&mut self) -> Subscription {
        self.log.record_subscription();
        self.connector.subscribe()
    }

    fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::StateChange(state) => {
                if state != self.connection {
                    tracing::info!(
                        from = %self.connection,
                        to = %state,
                        "connection state changed"
                    );
                    self.connection = state;
                    self.publish();
                }
            }
            StreamEvent::Record(record) => self.admit(record),
            // Already logged by the connector.
            StreamEvent::ParseError(_) => self.log.record_parse_error(),
        }
    }

    /// Pass a record through the pause gate into the window.
    fn admit(&mut self, record: EventRecord) {
        self.log.record_received();

        if self.paused.load(Ordering::SeqCst) {
            self.log.record_dropped_paused();
            tracing::debug!(id = %record.id, "paused, dropping record");
            return;
        }

        match self.buffer.insert(record) {
            Admission::Duplicate => {
                self.log.record_duplicate();
            }
            // Sorted straight out of a full window; nothing changed.
            Admission::Inserted {
                retained: false, ..
            } => {
                self.log.record_too_old();
                tracing::debug!("record older than the full window, dropping");
            }
            Admission::Inserted { evicted, .. } => {
                self.log.record_admitted();
                if evicted > 0 {
                    self.log.record_evicted(evicted as u64);
                }
                self.publish();
            }
        }
    }

    /// Recompute derived data from the window and publish it.
    fn publish(&self) {
        let records = self.buffer.records().to_vec();
        let snapshot = DashboardSnapshot {
            operator: Some(self.operator.clone()),
            connection: self.connection,
            paused: self.paused.load(Ordering::SeqCst),
            stats: self.aggregator.compute(&records),
            series: self.aggregator.series(&records),
            records,
            lifetime: self.log.stats(),
        };
        self.publisher.send_replace(Arc::new(snapshot));
    }

    fn sign_out(&mut self, link: Link) {
        if let Link::Active(mut subscription) = link {
            subscription.unsubscribe();
        }
        self.buffer.clear();
        self.connection = ConnectionState::Disconnected;
        self.log.reset();
        self.publisher
            .send_replace(Arc::new(DashboardSnapshot::signed_out()));
        tracing::info!(operator = %self.operator, "session signed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::{ManualFeed, ManualTransport};

    const WAIT: Duration = Duration::from_secs(5);

    const SENSOR_FRAME: &str = r#"{"source":"sensor-7","timestamp":"2024-01-22T10:00:00Z","payload":{"text":"hello"}}"#;

    fn config() -> Config {
        Config::default()
    }

    async fn start() -> (IngestionController, ManualFeed) {
        let (transport, feed) = ManualTransport::new();
        let controller = IngestionController::start(
            AuthSignal::authenticated("admin"),
            Arc::new(transport),
            &config(),
        )
        .unwrap();
        feed.wait_for_connections(1).await;
        (controller, feed)
    }

    fn frame(source: &str, secs: u32, sentiment: &str, score: f64) -> String {
        format!(
            r#"{{"source":"{source}","timestamp":"2024-01-22T10:{:02}:{:02}Z","payload":{{"text":"event {secs}"}},"analysis":{{"sentiment":"{sentiment}","score":{score}}}}}"#,
            secs / 60,
            secs % 60
        )
    }

    async fn wait_for<F>(controller: &IngestionController, predicate: F) -> Arc<DashboardSnapshot>
    where
        F: FnMut(&Arc<DashboardSnapshot>) -> bool,
    {
        let mut rx = controller.watch();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("publisher closed");
        snapshot.clone()
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[test]
    fn test_requires_authentication() {
        let (transport, _feed) = ManualTransport::new();
        let transport: SharedTransport = Arc::new(transport);

        let denied = AuthSignal {
            authenticated: false,
            operator: "admin".to_string(),
        };
        assert_eq!(
            IngestionController::start(denied, transport.clone(), &config()).err(),
            Some(SessionError::NotAuthenticated)
        );
        assert_eq!(
            IngestionController::start(AuthSignal::authenticated("  "), transport, &config()).err(),
            Some(SessionError::MissingOperator)
        );
    }

    #[tokio::test]
    async fn test_records_flow_into_window_with_stats() {
        let (controller, feed) = start().await;

        feed.open().await;
        wait_for(&controller, |s| s.connection == ConnectionState::Connected).await;

        feed.data(&frame("b", 2, "Negative", -0.5)).await;
        feed.data(&frame("a", 1, "Positive", 0.5)).await;
        feed.data(&frame("c", 3, "Neutral", 0.0)).await;

        let snapshot = wait_for(&controller, |s| s.records.len() == 3).await;
        let sources: Vec<_> = snapshot.records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
        assert_eq!(snapshot.stats.total, 3);
        assert_eq!(snapshot.stats.avg_score, 0.0);
        assert_eq!(snapshot.stats.positive_count, 1);
        assert_eq!(snapshot.stats.negative_count, 1);
        assert_eq!(snapshot.series.len(), 3);
        assert_eq!(snapshot.series[0].time, "10:00:01");

        let feed_order: Vec<_> = snapshot.feed().map(|r| r.source.as_str()).collect();
        assert_eq!(feed_order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_pause_drops_records_without_resubscribing() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data(&frame("before", 1, "Positive", 0.1)).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        controller.set_paused(true);
        wait_for(&controller, |s| s.paused).await;
        for secs in 10..20 {
            feed.data(&frame("paused", secs, "Positive", 0.1)).await;
        }

        let log = controller.log();
        eventually(|| log.stats().dropped_paused == 10).await;
        assert_eq!(controller.snapshot().records.len(), 1);
        assert_eq!(feed.open_count(), 1);

        assert!(!controller.toggle_pause());
        feed.data(&frame("after", 30, "Negative", -0.1)).await;
        let snapshot = wait_for(&controller, |s| s.records.len() == 2).await;
        assert!(!snapshot.paused);
        assert!(snapshot.records.iter().all(|r| r.source != "paused"));
        assert_eq!(feed.open_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_terminal_failure_keeping_window() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data(&frame("a", 1, "Positive", 0.3)).await;
        feed.data(&frame("b", 2, "Positive", 0.3)).await;
        wait_for(&controller, |s| s.records.len() == 2).await;

        feed.close().await;
        tokio::time::timeout(WAIT, feed.wait_for_connections(2))
            .await
            .expect("no re-subscribe");

        feed.open().await;
        let snapshot = wait_for(&controller, |s| s.connection == ConnectionState::Connected).await;
        assert_eq!(snapshot.records.len(), 2);

        feed.data(&frame("c", 3, "Positive", 0.3)).await;
        let snapshot = wait_for(&controller, |s| s.records.len() == 3).await;
        assert_eq!(snapshot.lifetime.reconnects, 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_retried() {
        let (controller, feed) = start().await;

        feed.fail("connection refused").await;
        tokio::time::timeout(WAIT, feed.wait_for_connections(2))
            .await
            .expect("no retry after failed attempt");

        feed.open().await;
        let snapshot = wait_for(&controller, |s| s.connection == ConnectionState::Connected).await;
        assert_eq!(snapshot.lifetime.reconnects, 1);
    }

    #[tokio::test]
    async fn test_duplicates_after_reconnect_are_ignored() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data(&frame("a", 1, "Positive", 0.3)).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        feed.close().await;
        feed.wait_for_connections(2).await;
        feed.open().await;
        feed.data(&frame("a", 1, "Positive", 0.3)).await;
        feed.data(&frame("b", 2, "Positive", 0.3)).await;

        let snapshot = wait_for(&controller, |s| s.records.len() == 2).await;
        assert_eq!(snapshot.records[0].source, "a");
        assert_eq!(controller.log().stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_parse_errors_are_counted_not_fatal() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data("{broken").await;
        feed.data(&frame("ok", 1, "Neutral", 0.0)).await;

        let snapshot = wait_for(&controller, |s| s.records.len() == 1).await;
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert_eq!(snapshot.lifetime.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything_at_once() {
        let (mut controller, feed) = start().await;
        feed.open().await;
        feed.data(&frame("a", 1, "Positive", 0.3)).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        let mut observer = controller.watch();
        observer.borrow_and_update();

        controller.sign_out().await;
        controller.sign_out().await;
        assert!(!controller.is_active());

        assert!(observer.has_changed().unwrap_or(true));
        let seen = observer.borrow_and_update().clone();
        assert_eq!(*seen, DashboardSnapshot::signed_out());
        assert_eq!(seen.connection, ConnectionState::Disconnected);
        assert!(seen.records.is_empty());
        assert_eq!(seen.stats.total, 0);

        // No new subscription, and the old transport is released.
        eventually(|| feed.open_count() == 1).await;
        let mut released = false;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if !feed.data(&frame("late", 9, "Positive", 0.3)).await {
                released = true;
                break;
            }
        }
        assert!(released);
        assert!(controller.snapshot().records.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_controller_signs_out() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data(&frame("a", 1, "Positive", 0.3)).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        let mut observer = controller.watch();
        drop(controller);

        tokio::time::timeout(WAIT, observer.wait_for(|s| !s.is_signed_in()))
            .await
            .expect("session never signed out")
            .expect("publisher closed");
    }

    #[tokio::test]
    async fn test_debounced_search_reads_session_window() {
        let (controller, feed) = start().await;
        feed.open().await;
        feed.data(SENSOR_FRAME).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        assert_eq!(controller.search("SENSOR").len(), 1);
        assert!(controller.search("").is_empty());

        let mut search = controller.debounced_search();
        let mut results = search.results();
        search.set_query("sensor");
        tokio::time::timeout(WAIT, results.changed())
            .await
            .expect("search never fired")
            .unwrap();
        assert_eq!(results.borrow().matches.len(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_cancels_pending_search() {
        let (mut controller, feed) = start().await;
        feed.open().await;
        feed.data(SENSOR_FRAME).await;
        wait_for(&controller, |s| s.records.len() == 1).await;

        let mut search = controller.debounced_search();
        let results = search.results();
        search.set_query("sensor");
        assert!(search.is_pending());

        controller.sign_out().await;
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert!(!search.is_pending());
        assert!(!results.has_changed().unwrap());
        assert!(search.current().matches.is_empty());

        // Queries set after sign-out never run either.
        search.set_query("sensor");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(search.current().matches.is_empty());
    }

    #[tokio::test]
    async fn test_record_older_than_full_window_is_not_admitted() {
        let (transport, feed) = ManualTransport::new();
        let config = Config {
            buffer_capacity: 2,
            ..Config::default()
        };
        let controller = IngestionController::start(
            AuthSignal::authenticated("admin"),
            Arc::new(transport),
            &config,
        )
        .unwrap();
        feed.wait_for_connections(1).await;
        feed.open().await;

        feed.data(&frame("a", 10, "Positive", 0.1)).await;
        feed.data(&frame("b", 11, "Positive", 0.1)).await;
        wait_for(&controller, |s| s.records.len() == 2).await;

        feed.data(&frame("late", 1, "Negative", -0.9)).await;
        let log = controller.log();
        eventually(|| log.stats().too_old == 1).await;

        let stats = log.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.evicted, 0);
        let snapshot = controller.snapshot();
        let sources: Vec<_> = snapshot.records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);

        feed.data(&frame("c", 12, "Positive", 0.1)).await;
        let snapshot = wait_for(&controller, |s| s.lifetime.admitted == 3).await;
        assert_eq!(snapshot.records[0].source, "b");
        assert_eq!(snapshot.lifetime.evicted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delay_is_waited_out() {
        let (transport, feed) = ManualTransport::new();
        let config = Config {
            reconnect_delay: Duration::from_secs(30),
            ..Config::default()
        };
        let _controller = IngestionController::start(
            AuthSignal::authenticated("admin"),
            Arc::new(transport),
            &config,
        )
        .unwrap();
        feed.wait_for_connections(1).await;

        feed.open().await;
        feed.close().await;
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(feed.open_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        feed.wait_for_connections(2).await;
        assert_eq!(feed.open_count(), 2);
    }
}

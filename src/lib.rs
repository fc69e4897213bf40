//! Pulse Monitor - live sentiment monitor for a server-sent event stream.
//!
//! This library subscribes to a stream of analysed events, keeps the most
//! recent ones in a bounded, time-ordered window, and derives statistics,
//! a chart series and search results from that window.
//!
//! # Guarantees
//!
//! - **Bounded**: The window never holds more than its capacity
//! - **Ordered**: Records are kept by event timestamp, not arrival order
//! - **Pausable**: Pausing drops records at the gate; the connection stays up
//! - **Clean sign-out**: Ending a session unsubscribes and empties the window
//!   in one published step
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Pulse Monitor                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Transport  │──▶│  Connector  │──▶│ Controller  │        │
//! │  │ (HTTP SSE)  │   │ (framing)   │   │ (pause gate)│        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                                             │               │
//! │                         ┌───────────────────┤               │
//! │                         ▼                   ▼               │
//! │                  ┌─────────────┐     ┌─────────────┐        │
//! │                  │   Window    │────▶│  Snapshot   │        │
//! │                  │ (100 recs)  │     │ stats/search│        │
//! │                  └─────────────┘     └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pulse_monitor::{AuthSignal, Config, HttpTransport, IngestionController};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let transport = HttpTransport::new(&config.endpoint, config.connect_timeout)?;
//! let mut session = IngestionController::start(
//!     AuthSignal::authenticated("admin"),
//!     Arc::new(transport),
//!     &config,
//! )?;
//!
//! let snapshot = session.snapshot();
//! println!("{} records, avg {}", snapshot.stats.total, snapshot.stats.avg_score);
//!
//! session.sign_out().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod core;
pub mod stream;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, SearchConfig};
pub use controller::{AuthSignal, IngestionController, SessionError};
pub use core::{
    DashboardSnapshot, DebouncedSearch, DerivedStats, EventBuffer, SearchIndex, SearchResults,
    SeriesPoint, StatsAggregator,
};
pub use stream::{
    ConnectionState, EventRecord, HttpTransport, ManualTransport, Sentiment, SharedTransport,
    StreamConnector, StreamEvent,
};
pub use telemetry::{IngestLog, IngestStats, SharedIngestLog};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

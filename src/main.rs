//! Pulse Monitor CLI
//!
//! Live sentiment monitor for a server-sent event stream.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pulse_monitor::{
    AuthSignal, Config, ConnectionState, DashboardSnapshot, HttpTransport, IngestStats,
    IngestionController, SharedTransport, VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulse-monitor")]
#[command(version = VERSION)]
#[command(about = "Live sentiment monitor for a server-sent event stream", long_about = None)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "pulse_monitor=info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the stream and print the dashboard periodically
    Watch {
        /// Stream endpoint (defaults to the configured one)
        #[arg(long)]
        endpoint: Option<String>,

        /// Operator name for the session
        #[arg(long)]
        operator: Option<String>,

        /// Seconds between dashboard refreshes
        #[arg(long, default_value = "2")]
        interval: u64,

        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Serve the dashboard over a local HTTP API
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Stream endpoint (defaults to the configured one)
        #[arg(long)]
        endpoint: Option<String>,

        /// Sign in this operator at startup
        #[arg(long)]
        operator: Option<String>,
    },

    /// Collect a window for a while, then search it
    Search {
        /// Text to look for in source, text and meta
        query: String,

        /// Seconds to collect before searching
        #[arg(long, default_value = "5")]
        seconds: u64,

        /// Stream endpoint (defaults to the configured one)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Pause ingestion in a running monitor
    Pause,

    /// Resume ingestion in a running monitor
    Resume,

    /// Show configuration and the last session's counters
    Status,

    /// Show configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Watch {
            endpoint,
            operator,
            interval,
            json,
        } => block_on(cmd_watch(endpoint, operator, interval, json)),
        #[cfg(feature = "server")]
        Commands::Serve {
            port,
            endpoint,
            operator,
        } => block_on(cmd_serve(port, endpoint, operator)),
        Commands::Search {
            query,
            seconds,
            endpoint,
        } => block_on(cmd_search(query, seconds, endpoint)),
        Commands::Pause => cmd_set_paused(true),
        Commands::Resume => cmd_set_paused(false),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("pulse_monitor=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn block_on<F>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?
        .block_on(future)
}

/// Load configuration and open the HTTP transport for it.
fn connect(endpoint: Option<String>) -> anyhow::Result<(Config, SharedTransport)> {
    let mut config = Config::load().context("Failed to load config")?;
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    let transport = HttpTransport::new(&config.endpoint, config.connect_timeout)?;
    Ok((config, Arc::new(transport)))
}

fn operator_name(explicit: Option<String>, config: &Config) -> String {
    explicit
        .or_else(|| config.operator.clone())
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "operator".to_string())
}

async fn cmd_watch(
    endpoint: Option<String>,
    operator: Option<String>,
    interval: u64,
    json: bool,
) -> anyhow::Result<()> {
    let (config, transport) = connect(endpoint)?;
    let operator = operator_name(operator, &config);

    println!("Pulse Monitor v{VERSION}");
    println!();
    println!("  Endpoint: {}", config.endpoint);
    println!("  Operator: {operator}");
    println!("  Window: {} records", config.buffer_capacity);
    println!("  Timezone: {}", config.timezone());
    println!();
    if config.paused {
        println!("Ingestion is currently paused.");
        println!("Run `pulse-monitor resume` to start admitting records.");
        println!();
    }
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut session =
        IngestionController::start(AuthSignal::authenticated(operator), transport, &config)?;

    // Pause/resume arrive from other processes through the config file.
    let config_path = Config::config_path();
    let mut render = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut config_check = tokio::time::interval(Duration::from_secs(1));

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = render.tick() => print_snapshot(&session.snapshot(), json),
            _ = config_check.tick() => match Config::load_from(&config_path) {
                Ok(latest) if latest.paused != session.is_paused() => {
                    session.set_paused(latest.paused);
                    if latest.paused {
                        println!("Ingestion paused.");
                    } else {
                        println!("Ingestion resumed.");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "could not re-read config"),
            },
        }
    }

    println!();
    println!("Signing out...");
    let lifetime = session.log().stats();
    println!("{}", session.log().summary());
    session.sign_out().await;
    save_last_session(&lifetime);

    Ok(())
}

#[cfg(feature = "server")]
async fn cmd_serve(
    port: u16,
    endpoint: Option<String>,
    operator: Option<String>,
) -> anyhow::Result<()> {
    use pulse_monitor::server::{run, ServerConfig};

    let (config, transport) = connect(endpoint)?;
    let mut server_config = ServerConfig::new(port, config);
    if let Some(operator) = operator {
        server_config = server_config.with_operator(operator);
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let (addr, shutdown_tx) = run(server_config, transport).await?;
    println!("Pulse Monitor v{VERSION} serving on http://{addr}");
    println!("Press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let _ = shutdown_tx.send(());
    // Let the graceful shutdown sign the session out.
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn cmd_search(query: String, seconds: u64, endpoint: Option<String>) -> anyhow::Result<()> {
    let (config, transport) = connect(endpoint)?;
    let operator = operator_name(None, &config);

    let mut session =
        IngestionController::start(AuthSignal::authenticated(operator), transport, &config)?;

    println!("Collecting for {seconds}s from {}...", config.endpoint);
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let mut search = session.debounced_search();
    let mut results = search.results();
    search.set_query(query.as_str());
    if search.is_pending() {
        results.changed().await.context("Search was cancelled")?;
    }
    let found = results.borrow().clone();
    drop(search);

    let snapshot = session.snapshot();
    println!(
        "{} match(es) for {:?} in {} buffered record(s)",
        found.matches.len(),
        found.query,
        snapshot.records.len()
    );
    for record in &found.matches {
        println!(
            "  {} [{}] {}",
            record.timestamp.with_timezone(&config.timezone()).format("%H:%M:%S"),
            record.source,
            record.payload.text.as_deref().unwrap_or("")
        );
    }

    session.sign_out().await;
    Ok(())
}

fn cmd_set_paused(paused: bool) -> anyhow::Result<()> {
    let mut config = Config::load().context("Failed to load config")?;
    config.paused = paused;
    config.save().context("Failed to save config")?;

    if paused {
        println!("Ingestion paused. Use 'pulse-monitor resume' to continue.");
    } else {
        println!("Ingestion resumed.");
    }
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load config")?;

    println!("Pulse Monitor Status");
    println!("====================");
    println!();
    println!("Configuration:");
    println!("  Endpoint: {}", config.endpoint);
    println!("  Window: {} records", config.buffer_capacity);
    println!(
        "  Search: {} results, {}ms debounce",
        config.search.limit,
        config.search.debounce.as_millis()
    );
    println!("  Timezone: {}", config.timezone());
    println!("  Paused: {}", config.paused);
    println!();

    let path = Config::last_session_path();
    match std::fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str::<IngestStats>(&content).ok())
    {
        Some(stats) => {
            println!("Last Session:");
            println!("  Started: {}", stats.session_start.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Duration: {}s", stats.session_duration_secs);
            println!("  Records received: {}", stats.received);
            println!("  Records admitted: {}", stats.admitted);
            println!("  Dropped while paused: {}", stats.dropped_paused);
            println!("  Too old for window: {}", stats.too_old);
            println!("  Malformed frames: {}", stats.parse_errors);
            println!("  Reconnects: {}", stats.reconnects);
        }
        None => println!("No previous session data found."),
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load config")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_snapshot(snapshot: &DashboardSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "could not serialize snapshot"),
        }
        return;
    }

    let stats = &snapshot.stats;
    let marker = match snapshot.connection {
        ConnectionState::Connected => "●",
        ConnectionState::Connecting => "◌",
        ConnectionState::Disconnected | ConnectionState::Failed => "○",
    };
    println!(
        "{marker} {:<12} {:>3} records | avg {:>5.2} | +{}% -{}% | σ {:.2}{}",
        snapshot.connection.to_string(),
        stats.total,
        stats.avg_score,
        stats.positive_pct,
        stats.negative_pct,
        stats.score_std_dev,
        if snapshot.paused { " | PAUSED" } else { "" }
    );
    if let Some(latest) = snapshot.feed().next() {
        println!(
            "    latest: [{}] {}",
            latest.source,
            latest.payload.text.as_deref().unwrap_or("-")
        );
    }
}

fn save_last_session(stats: &IngestStats) {
    let path = Config::last_session_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let written = serde_json::to_string_pretty(stats)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "could not save session counters");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}

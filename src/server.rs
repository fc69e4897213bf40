//! Local HTTP API over a monitoring session.
//!
//! This module provides an HTTP server that:
//! - Starts and ends the ingestion session (sign-in / sign-out)
//! - Serves the latest dashboard snapshot and the newest-first feed
//! - Runs immediate searches over the window
//! - Toggles the pause gate
//!
//! # Architecture
//!
//! ```text
//! event stream ──→ IngestionController ──→ snapshot ──→ GET /api/dashboard
//!                          ↑
//!            POST /api/session, /api/pause, /api/signout
//! ```

use crate::config::Config;
use crate::controller::{AuthSignal, IngestionController, SessionError};
use crate::core::DashboardSnapshot;
use crate::stream::transport::SharedTransport;
use crate::stream::types::EventRecord;
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Monitor settings used for every session
    pub monitor: Config,
    /// Operator to sign in at startup, if any
    pub operator: Option<String>,
}

impl ServerConfig {
    pub fn new(port: u16, monitor: Config) -> Self {
        Self {
            port,
            monitor,
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

/// Shared server state
pub struct ServerState {
    monitor: Config,
    transport: SharedTransport,
    session: RwLock<Option<IngestionController>>,
}

impl ServerState {
    pub fn new(monitor: Config, transport: SharedTransport) -> Self {
        Self {
            monitor,
            transport,
            session: RwLock::new(None),
        }
    }

    /// Start a session for `operator`. Fails if one is already running.
    async fn sign_in(&self, operator: &str) -> Result<(), ApiError> {
        let mut session = self.session.write().await;
        if session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "SESSION_ACTIVE",
                "A session is already running",
            ));
        }

        let controller = IngestionController::start(
            AuthSignal::authenticated(operator),
            self.transport.clone(),
            &self.monitor,
        )?;
        *session = Some(controller);
        Ok(())
    }

    async fn sign_out(&self) {
        let mut session = self.session.write().await;
        if let Some(mut controller) = session.take() {
            tracing::info!("\n{}", controller.log().summary());
            controller.sign_out().await;
        }
    }

    async fn snapshot(&self) -> Arc<DashboardSnapshot> {
        match self.session.read().await.as_ref() {
            Some(controller) => controller.snapshot(),
            None => Arc::new(DashboardSnapshot::signed_out()),
        }
    }

    async fn set_paused(&self, paused: bool) -> Result<PauseResponse, ApiError> {
        let session = self.session.read().await;
        let controller = session.as_ref().ok_or_else(ApiError::not_signed_in)?;
        controller.set_paused(paused);
        Ok(PauseResponse {
            paused: controller.is_paused(),
        })
    }
}

/// Sign-in request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub operator: String,
}

/// Session status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Pause gate response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseResponse {
    pub paused: bool,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }

    fn not_signed_in() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "NOT_SIGNED_IN", "No session is running")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let code = match e {
            SessionError::NotAuthenticated => "NOT_AUTHENTICATED",
            SessionError::MissingOperator => "MISSING_OPERATOR",
        };
        ApiError::new(StatusCode::BAD_REQUEST, code, e.to_string())
    }
}

/// Query string for list endpoints
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// Query string for search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/session
async fn sign_in(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    state.sign_in(&request.operator).await?;
    Ok(Json(SessionResponse {
        status: "signed_in".to_string(),
        operator: Some(request.operator.trim().to_string()),
    }))
}

/// POST /api/signout
async fn sign_out(State(state): State<Arc<ServerState>>) -> Json<SessionResponse> {
    state.sign_out().await;
    Json(SessionResponse {
        status: "signed_out".to_string(),
        operator: None,
    })
}

/// GET /api/dashboard
async fn dashboard(State(state): State<Arc<ServerState>>) -> Json<DashboardSnapshot> {
    Json(state.snapshot().await.as_ref().clone())
}

/// GET /api/events
///
/// The window newest first.
async fn events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<FeedQuery>,
) -> Json<Vec<EventRecord>> {
    let snapshot = state.snapshot().await;
    let limit = query.limit.unwrap_or(usize::MAX);
    Json(snapshot.feed().take(limit).cloned().collect())
}

/// GET /api/search?q=
async fn search(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<EventRecord>> {
    let snapshot = state.snapshot().await;
    Json(snapshot.search(&state.monitor.search_index(), &query.q))
}

/// POST /api/pause
async fn pause(State(state): State<Arc<ServerState>>) -> Result<Json<PauseResponse>, ApiError> {
    state.set_paused(true).await.map(Json)
}

/// POST /api/resume
async fn resume(State(state): State<Arc<ServerState>>) -> Result<Json<PauseResponse>, ApiError> {
    state.set_paused(false).await.map(Json)
}

/// Run the HTTP server
///
/// The session, if any, is signed out when the shutdown signal fires.
pub async fn run(
    config: ServerConfig,
    transport: SharedTransport,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(config.monitor.clone(), transport));

    if let Some(operator) = &config.operator {
        state
            .sign_in(operator)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e.body.error))?;
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/session", post(sign_in))
        .route("/api/signout", post(sign_out))
        .route("/api/dashboard", get(dashboard))
        .route("/api/events", get(events))
        .route("/api/search", get(search))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Monitor server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
                state.sign_out().await;
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

//! Web server implementation

use crate::auth::{
    clear_session_cookie, optional_user, require_session, session_cookie, session_token,
    AuthenticatedUser,
};
use crate::config::{AppConfig, AuthMode};
use crate::pipeline::{
    protocol::RULESET_VERSION, resolve_credential, Pipeline, PipelineError, RunInput,
};
use autoqa_common::{Database, Error as StoreError, HistoryLedger, IdentityStore, ANONYMOUS_USER};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Web server state
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

pub struct AppState {
    pub cfg: AppConfig,
    pub identities: IdentityStore,
    pub ledger: HistoryLedger,
    pub pipeline: Arc<Pipeline>,
}

fn error_json(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": msg.into()}))).into_response()
}

fn internal_error(e: StoreError) -> Response {
    error!("Store error: {}", e);
    error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> Response {
    error!("Credential task failed: {}", e);
    error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

impl WebServer {
    /// Open the database and wire the production pipeline
    pub fn new(cfg: AppConfig) -> anyhow::Result<Self> {
        let db = Database::open(&cfg.database.path)?;
        let ledger = HistoryLedger::new(db.clone());
        let pipeline = Pipeline::from_config(&cfg, ledger.clone())?;
        info!(
            "Runner: {} (artifacts in {})",
            cfg.runner.runtime,
            pipeline.materializer().scratch_dir().display()
        );
        Ok(Self::from_parts(cfg, db, pipeline))
    }

    /// Assemble a server around an already built pipeline
    pub fn from_parts(cfg: AppConfig, db: Database, pipeline: Pipeline) -> Self {
        Self {
            state: Arc::new(AppState {
                cfg,
                identities: IdentityStore::new(db.clone()),
                ledger: HistoryLedger::new(db),
                pipeline: Arc::new(pipeline),
            }),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Create router
    pub fn router(&self) -> Router {
        let auth_layer =
            middleware::from_fn_with_state(self.state.identities.clone(), require_session);

        // Protected routes (require a session)
        let protected_routes = Router::new()
            .route("/api/history", get(list_history_handler))
            .route("/api/history/:id", delete(delete_history_handler))
            .layer(auth_layer)
            .with_state(self.state.clone());

        // Public routes. run-test authenticates per deployment mode itself.
        let router = Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/register", post(register_handler))
            .route("/api/login", post(login_handler))
            .route("/api/logout", post(logout_handler))
            .route("/api/user", get(user_handler))
            .route("/api/run-test", post(run_test_handler))
            .merge(protected_routes);

        let router = match &self.state.cfg.server.static_dir {
            Some(dir) => router.fallback_service(ServeDir::new(dir)),
            None => router.fallback(not_found_handler),
        };

        router
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("AutoQA starting on http://{}", addr);

        let identities = self.state.identities.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match identities.cleanup_expired_sessions() {
                    Ok(0) => {}
                    Ok(n) => info!("Removed {} expired sessions", n),
                    Err(e) => warn!("Session cleanup failed: {}", e),
                }
            }
        });

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Received shutdown signal");
            })
            .await?;

        sweeper.abort();
        Ok(())
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "autoqa-web",
        "version": autoqa_common::VERSION,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl CredentialsRequest {
    fn fields(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some((username, password))
    }
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Response {
    let (username, password) = match req.fields() {
        Some(f) => f,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing fields"),
    };
    let identities = state.identities.clone();
    let (username, password) = (username.to_string(), password.to_string());
    let registered =
        tokio::task::spawn_blocking(move || identities.register(&username, &password)).await;
    let registered = match registered {
        Ok(r) => r,
        Err(e) => return join_error(e),
    };
    match registered {
        Ok(_) => Json(serde_json::json!({"success": true})).into_response(),
        Err(StoreError::AlreadyExists { .. }) => {
            error_json(StatusCode::BAD_REQUEST, "Username taken")
        }
        Err(e) => internal_error(e),
    }
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Response {
    let (username, password) = match req.fields() {
        Some(f) => f,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing fields"),
    };
    // Argon2 verification stays off the async workers.
    let identities = state.identities.clone();
    let (username, password) = (username.to_string(), password.to_string());
    let verified =
        tokio::task::spawn_blocking(move || identities.verify_login(&username, &password)).await;
    let verified = match verified {
        Ok(v) => v,
        Err(e) => return join_error(e),
    };
    let user = match verified {
        Ok(u) => u,
        Err(StoreError::NotFound { .. }) => {
            return error_json(StatusCode::BAD_REQUEST, "User not found")
        }
        Err(StoreError::PermissionDenied(_)) => {
            return error_json(StatusCode::BAD_REQUEST, "Wrong password")
        }
        Err(e) => return internal_error(e),
    };

    let ttl = state.cfg.auth.session_ttl_secs;
    let (token, session) = match state.identities.create_session(&user.id, ttl) {
        Ok(v) => v,
        Err(e) => return internal_error(e),
    };
    info!("User {} logged in", user.username);

    (
        [(header::SET_COOKIE, session_cookie(&token, ttl))],
        Json(serde_json::json!({
            "success": true,
            "username": user.username,
            "token": token,
            "expiresAt": session.expires_at,
        })),
    )
        .into_response()
}

async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Err(e) = state.identities.revoke_session(&token) {
            return internal_error(e);
        }
    }
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(serde_json::json!({"success": true})),
    )
        .into_response()
}

async fn user_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match optional_user(&state.identities, &headers) {
        Ok(Some(user)) => {
            Json(serde_json::json!({"loggedIn": true, "username": user.username})).into_response()
        }
        Ok(None) => Json(serde_json::json!({"loggedIn": false})).into_response(),
        Err((status, msg)) => error_json(status, msg),
    }
}

// ============================================================================
// History
// ============================================================================

async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Response {
    match state.ledger.list_for_user(&user.id) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<i64>() else {
        return error_json(StatusCode::BAD_REQUEST, "Invalid history id");
    };
    match state.ledger.delete(id, &user.id) {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(StoreError::NotFound { .. }) => error_json(StatusCode::NOT_FOUND, "Record not found"),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Test runs
// ============================================================================

#[derive(Debug, Deserialize)]
struct RunTestRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default, rename = "apiKey")]
    api_key: Option<String>,
}

async fn run_test_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RunTestRequest>,
) -> Response {
    let user = match optional_user(&state.identities, &headers) {
        Ok(u) => u,
        Err((status, msg)) => return error_json(status, msg),
    };
    let mode = state.cfg.auth.mode;
    if mode == AuthMode::Session && user.is_none() {
        return PipelineError::Unauthorized("Please Login First!".to_string()).into_response();
    }

    let api_key = resolve_credential(
        mode,
        state.cfg.model.api_key.as_deref(),
        req.api_key.as_deref(),
        user.is_some(),
    );
    let input = RunInput {
        url: req.url,
        instruction: req.instruction,
        requester_id: user.map(|u| u.id).unwrap_or_else(|| ANONYMOUS_USER.to_string()),
        api_key,
    };

    // Detached so a client disconnect cannot cancel a run mid-execution.
    let pipeline = state.pipeline.clone();
    let handle = tokio::spawn(async move { pipeline.run(input).await });

    match handle.await {
        Ok(Ok(report)) => Json(serde_json::json!({
            "success": true,
            "output": report.logs,
            "status": report.status,
            "recordId": report.record_id,
            "rulesetVersion": RULESET_VERSION,
        }))
        .into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!("Pipeline task failed: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Test run crashed")
        }
    }
}

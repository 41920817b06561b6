//! # Clearance Admin Server
//!
//! HTTP surface for the authorization engine. The handler layer stays
//! thin: every rule lives in the engine, the server only maps transport.
//!
//! ## Endpoints
//!
//! - `POST /v1/overrides` - create a permission override
//! - `POST /v1/overrides/:id/revoke` - revoke an override
//! - `GET /v1/users/:id/permissions` - resolved effective permissions
//! - `GET /v1/users/:id/claims` - current claim payload
//! - `POST /v1/users/:id/role` - assign a role
//! - `GET /health` - health check
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `RUST_LOG` - log filter (default: info)
//! - `BOOTSTRAP_ADMIN` - id of the seeded admin user (default: "admin")

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clearance_engine::{
    AuthorizationEngine, EngineConfig, EngineDeps, EngineError, InMemoryAuditSink,
    InMemoryCounterStore, InMemoryIdentityProvider, InMemoryOverrideStore,
    InMemoryUserDirectory, NewOverride, PermissionCatalog, PermissionKey, Role, RoleHierarchy,
    UserDirectory, UserRecord,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<AuthorizationEngine>,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Rate-limit response body (429)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitResponse {
    limit: u64,
    window: String,
    retry_after_seconds: u64,
}

/// Application error wrapper mapping engine errors to HTTP statuses
struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0 {
            EngineError::RateLimitExceeded {
                window,
                limit,
                retry_after_seconds,
                ..
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RateLimitResponse {
                    limit,
                    window: window.to_string(),
                    retry_after_seconds,
                }),
            )
                .into_response(),
            err => {
                let (status, code) = match &err {
                    EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    EngineError::Authorization(_) => (StatusCode::FORBIDDEN, "not_authorized"),
                    EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    EngineError::PayloadTooLarge { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "payload_too_large")
                    }
                    EngineError::SyncFailed { .. } | EngineError::Provider(_) => {
                        (StatusCode::BAD_GATEWAY, "provider_error")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
                };
                (
                    status,
                    Json(ErrorResponse {
                        error: code.to_string(),
                        message: err.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Create-override request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOverrideRequest {
    actor_id: String,
    user_id: String,
    resource: String,
    action: String,
    granted: bool,
    reason: String,
}

/// Revoke request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevokeRequest {
    actor_id: String,
}

/// Role assignment request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRoleRequest {
    actor_id: String,
    role: Role,
}

/// Health response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
}

async fn create_override(
    State(state): State<AppState>,
    Json(req): Json<CreateOverrideRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .engine
        .create_override(
            &req.actor_id,
            NewOverride {
                user_id: req.user_id,
                key: PermissionKey::new(req.resource, req.action),
                granted: req.granted,
                reason: req.reason,
                created_by: req.actor_id.clone(),
            },
        )
        .await?;
    Ok(Json(record))
}

async fn revoke_override(
    State(state): State<AppState>,
    Path(override_id): Path<String>,
    Json(req): Json<RevokeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .engine
        .revoke_override(&req.actor_id, &override_id)
        .await?;
    Ok(Json(record))
}

async fn get_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.check_rate_limit(&user_id).await?;
    let set = state.engine.effective_permissions(&user_id).await?;
    Ok(Json(set))
}

async fn get_claims(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let payload = state.engine.claims(&user_id).await?;
    Ok(Json(payload))
}

async fn assign_role(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .engine
        .assign_role(&req.actor_id, &user_id, req.role)
        .await?;
    Ok(Json(user))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/overrides", post(create_override))
        .route("/v1/overrides/:id/revoke", post(revoke_override))
        .route("/v1/users/:id/permissions", get(get_permissions))
        .route("/v1/users/:id/claims", get(get_claims))
        .route("/v1/users/:id/role", post(assign_role))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install terminate handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// The business catalog and role defaults the server boots with
fn bootstrap() -> (PermissionCatalog, RoleHierarchy) {
    let catalog = PermissionCatalog::new([
        ("reports", vec!["read", "export"]),
        ("payroll", vec!["read", "write", "approve"]),
        ("invoices", vec!["read", "write"]),
        ("users", vec!["read", "write"]),
    ]);

    let hierarchy = RoleHierarchy::new(
        &catalog,
        [
            (Role::Viewer, vec![PermissionKey::new("reports", "read")]),
            (
                Role::Consultant,
                vec![
                    PermissionKey::new("reports", "read"),
                    PermissionKey::new("invoices", "read"),
                ],
            ),
            (
                Role::Manager,
                vec![
                    PermissionKey::new("reports", "*"),
                    PermissionKey::new("invoices", "*"),
                    PermissionKey::new("payroll", "read"),
                    PermissionKey::new("users", "read"),
                ],
            ),
            (Role::Admin, vec![PermissionKey::new("*", "*")]),
        ],
    )
    .expect("bootstrap hierarchy must be valid");

    (catalog, hierarchy)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let admin_id = std::env::var("BOOTSTRAP_ADMIN").unwrap_or_else(|_| "admin".to_string());

    let (catalog, hierarchy) = bootstrap();

    let directory = Arc::new(InMemoryUserDirectory::new());
    directory
        .upsert(UserRecord::new(admin_id.clone(), Role::Admin).staff())
        .await
        .map_err(|e| anyhow::anyhow!("failed to seed admin user: {e}"))?;
    info!(admin_id, "seeded bootstrap admin");

    let overrides = Arc::new(InMemoryOverrideStore::new(Arc::new(catalog.clone())));
    let engine = AuthorizationEngine::new(
        EngineConfig::default(),
        catalog,
        hierarchy,
        EngineDeps {
            directory,
            overrides,
            provider: Arc::new(InMemoryIdentityProvider::new()),
            counters: Arc::new(InMemoryCounterStore::new()),
            audit_sink: Arc::new(InMemoryAuditSink::new()),
        },
    );

    let state = AppState {
        engine: Arc::new(engine),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "clearance server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    Ok(())
}

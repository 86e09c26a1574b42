//! `abacus serve` command: the orchestrator's HTTP surface.
//!
//! Public API under `/api/v1` (registration, login, expression submission
//! and inspection) and the internal task surface under `/internal/task`
//! that agents poll. Every handler goes through the scheduler or the
//! authenticator; no state lives in this layer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use abacus_core::auth::{AuthError, Authenticator};
use abacus_core::config::OrchestratorConfig;
use abacus_core::expr;
use abacus_core::scheduler::{DispatchedTask, Scheduler, SchedulerError};
use abacus_db::models::{ExpressionRow, ExpressionStatus};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    fn unprocessable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }

    fn from_auth(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::MissingCredentials => Self::bad_request(message),
            AuthError::UserExists(_) => Self::conflict(message),
            AuthError::UnknownUser(_) => Self::not_found(message),
            AuthError::WrongPassword | AuthError::InvalidToken => Self::unauthorized(message),
            err @ (AuthError::Hash(_) | AuthError::Signing(_) | AuthError::Store(_)) => {
                Self::internal(anyhow::Error::new(err))
            }
        }
    }

    fn from_scheduler(err: SchedulerError) -> Self {
        let message = err.to_string();
        match err {
            SchedulerError::TaskNotFound(_) => Self::not_found(message),
            SchedulerError::Expr(_) => Self::unprocessable(message),
            err @ (SchedulerError::InvalidState(_) | SchedulerError::Store(_)) => {
                Self::internal(anyhow::Error::new(err))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State and auth extraction
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<Scheduler>,
    auth: Arc<Authenticator>,
}

/// Login of the bearer-authenticated caller.
struct AuthUser(String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;

        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("expected a bearer token"))?;

        let login = state
            .auth
            .verify(token)
            .map_err(|_| AppError::unauthorized("invalid or expired token"))?;
        Ok(Self(login))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    login: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CalculateRequest {
    expression: String,
}

#[derive(Debug, Serialize)]
struct IdResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ExpressionView {
    id: Uuid,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<f64>,
}

impl From<ExpressionRow> for ExpressionView {
    fn from(row: ExpressionRow) -> Self {
        let result = match row.status {
            ExpressionStatus::Done => row.result,
            _ => None,
        };
        Self {
            id: row.id,
            status: row.status.to_string(),
            result,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExpressionsListResponse {
    expressions: Vec<ExpressionView>,
}

#[derive(Debug, Serialize)]
struct ExpressionEnvelope {
    expression: ExpressionView,
}

#[derive(Debug, Serialize)]
struct TaskView {
    id: Uuid,
    arg1: String,
    arg2: String,
    operation: String,
    operation_time: u64,
}

impl From<DispatchedTask> for TaskView {
    fn from(task: DispatchedTask) -> Self {
        Self {
            id: task.id,
            arg1: task.arg1,
            arg2: task.arg2,
            operation: task.op.to_string(),
            operation_time: task.operation_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskEnvelope {
    task: TaskView,
}

/// Outcome of a dispatched step: exactly one of `result` and `error`.
#[derive(Debug, Deserialize)]
struct TaskResultRequest {
    id: Uuid,
    result: Option<f64>,
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(scheduler: Arc<Scheduler>, auth: Arc<Authenticator>) -> Router {
    let state = AppState { scheduler, auth };
    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/login", post(login))
        .route("/api/v1/calculate", post(calculate))
        .route("/api/v1/expressions", get(list_expressions))
        .route("/api/v1/expressions/{id}", get(get_expression))
        .route("/internal/task", get(next_task).post(submit_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(db: SqlitePool, config: OrchestratorConfig) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(db.clone(), config.delays).await?);
    let auth = Arc::new(Authenticator::new(db, &config.jwt_secret));

    let app = build_router(scheduler, auth);
    let addr: SocketAddr = config.bind_addr().parse()?;
    tracing::info!("orchestrator listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("orchestrator shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers: accounts
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(body) = body.map_err(|err| AppError::bad_request(err.to_string()))?;
    state
        .auth
        .register(&body.login, &body.password)
        .await
        .map_err(AppError::from_auth)?;
    Ok(StatusCode::CREATED)
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(body) = body.map_err(|err| AppError::bad_request(err.to_string()))?;
    let token = state
        .auth
        .login(&body.login, &body.password)
        .await
        .map_err(AppError::from_auth)?;
    Ok(Json(TokenResponse { token }))
}

// ---------------------------------------------------------------------------
// Handlers: expressions
// ---------------------------------------------------------------------------

async fn calculate(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    body: Result<Json<CalculateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IdResponse>), AppError> {
    let Json(body) = body.map_err(|err| AppError::unprocessable(err.to_string()))?;

    let tokens =
        expr::tokenize(&body.expression).map_err(|err| AppError::unprocessable(err.to_string()))?;

    let id = state
        .scheduler
        .add_expression(&owner, tokens)
        .await
        .map_err(AppError::from_scheduler)?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn list_expressions(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
) -> Result<Json<ExpressionsListResponse>, AppError> {
    let rows = state
        .scheduler
        .list_expressions(&owner)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(ExpressionsListResponse {
        expressions: rows.into_iter().map(ExpressionView::from).collect(),
    }))
}

async fn get_expression(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ExpressionEnvelope>, AppError> {
    let id: Uuid = id
        .parse()
        .map_err(|_| AppError::bad_request("invalid expression id"))?;

    let row = state
        .scheduler
        .get_expression(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found("expression not found"))?;

    // Expressions are only visible to their owner.
    if row.owner != owner {
        return Err(AppError::not_found("expression not found"));
    }

    Ok(Json(ExpressionEnvelope {
        expression: row.into(),
    }))
}

// ---------------------------------------------------------------------------
// Handlers: internal task surface
// ---------------------------------------------------------------------------

async fn next_task(State(state): State<AppState>) -> Result<Json<TaskEnvelope>, AppError> {
    match state.scheduler.next_task().await {
        Some(task) => Ok(Json(TaskEnvelope { task: task.into() })),
        None => Err(AppError::not_found("no task available")),
    }
}

async fn submit_task(
    State(state): State<AppState>,
    body: Result<Json<TaskResultRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(body) = body.map_err(|err| AppError::unprocessable(err.to_string()))?;

    let outcome = match (body.result, body.error) {
        (Some(value), None) => state.scheduler.complete_task(body.id, value).await,
        (None, Some(reason)) => state.scheduler.fail_task(body.id, &reason).await,
        _ => {
            return Err(AppError::unprocessable(
                "exactly one of result or error is required",
            ));
        }
    };

    outcome.map_err(AppError::from_scheduler)?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::auth::{auth_middleware, Claims, JwtHandler};
use crate::game::validation::parse_prediction;
use crate::game::{ErrorKind, GameError, GuessLifecycle};
use crate::middleware::request_logging;
use crate::models::{
    GuessHistoryResponse, LeaderboardResponse, MakeGuessResponse, ResolveGuessResponse,
};
use crate::tasks::ResolveTask;

pub const TASK_TOKEN_HEADER: &str = "x-task-token";

/// Per-request knobs taken from `Config` at startup.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub resolution_delay_secs: i64,
    pub leaderboard_limit: usize,
    pub history_page_size: usize,
    pub task_token: Option<String>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<GuessLifecycle>,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    pub fn new(lifecycle: Arc<GuessLifecycle>, settings: ApiSettings) -> Self {
        Self {
            lifecycle,
            settings: Arc::new(settings),
        }
    }
}

pub fn create_router(state: AppState, jwt_handler: Arc<JwtHandler>) -> Router {
    let player_routes = Router::new()
        .route("/api/guesses", post(make_guess).get(get_guess_history))
        .route_layer(middleware::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/internal/tasks/resolve-guess", post(resolve_guess))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(player_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn make_guess(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<MakeGuessRequest>, JsonRejection>,
) -> Result<Json<MakeGuessResponse>, ApiError> {
    let Json(body) = payload?;
    let prediction = parse_prediction(body.prediction.as_deref())?;

    let resp = state
        .lifecycle
        .make_guess(&claims.sub, prediction, state.settings.resolution_delay_secs)
        .await?;
    Ok(Json(resp))
}

async fn get_guess_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<GuessHistoryResponse>, ApiError> {
    let Query(params) = query?;
    let resp = state
        .lifecycle
        .get_guess_history(
            &claims.sub,
            params.last_key.as_deref(),
            state.settings.history_page_size,
        )
        .await?;
    Ok(Json(resp))
}

async fn get_leaderboard(
    State(state): State<AppState>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let Query(params) = query?;
    let limit = params.limit.unwrap_or(state.settings.leaderboard_limit);
    Ok(Json(state.lifecycle.get_leaderboard(limit).await?))
}

/// Callback for the task dispatcher. Routine no-ops come back as 200 with
/// `success: false`.
async fn resolve_guess(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ResolveTask>, JsonRejection>,
) -> Result<Json<ResolveGuessResponse>, ApiError> {
    if let Some(expected) = state.settings.task_token.as_deref() {
        let presented = headers
            .get(TASK_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            warn!("resolve-guess callback with missing or wrong task token");
            return Err(ApiError::Unauthorized("Invalid task token"));
        }
    }

    let Json(task) = payload?;
    let outcome = state
        .lifecycle
        .resolve_guess(&task.user_id, &task.guess_id)
        .await?;
    Ok(Json(outcome.into()))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
struct MakeGuessRequest {
    prediction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    last_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Game(GameError),
    BadRequest(String),
    Unauthorized(&'static str),
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        ApiError::Game(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.to_string()),
            ApiError::Game(err) => match err.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
                ErrorKind::Contention => (StatusCode::LOCKED, "contention", err.to_string()),
                ErrorKind::BusinessRule => (StatusCode::CONFLICT, "business_rule", err.to_string()),
                ErrorKind::Store => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "Database operation failed".to_string(),
                ),
                ErrorKind::Scheduling => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "scheduling_error",
                    "Failed to schedule task".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            if let ApiError::Game(err) = &self {
                error!(error = %err, "request failed");
            }
        }

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::tasks::SchedulingError;

    fn status_of(err: GameError) -> (StatusCode, String) {
        let (status, _, message) = ApiError::from(err).parts();
        (status, message)
    }

    #[test]
    fn test_game_error_mapping() {
        assert_eq!(
            status_of(GameError::validation("prediction", "Prediction is required")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(GameError::Contention {
                lock_key: "user-guess:a".to_string()
            })
            .0,
            StatusCode::LOCKED
        );
        assert_eq!(
            status_of(GameError::ActiveGuessExists {
                user_id: "a".to_string()
            })
            .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StoreError::new("getUser", "disk full").into()),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database operation failed".to_string()
            )
        );
        assert_eq!(
            status_of(SchedulingError::QueueClosed.into()),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to schedule task".to_string()
            )
        );
    }

    #[test]
    fn test_store_details_do_not_leak() {
        let (_, message) = status_of(StoreError::new("atomicUpdate", "secret path /var/db").into());
        assert!(!message.contains("/var/db"));
    }
}

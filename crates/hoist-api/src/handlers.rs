//! Management API handlers.
//!
//! Each handler validates the app name, delegates to the `Deployer`, and
//! wraps the outcome in the `{success, data | error}` envelope.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hoist_core::AppName;
use hoist_deploy::DeployError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Set when a failed deploy reinstated the previous release.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    rolled_back: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            rolled_back: false,
        })
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            rolled_back: false,
        }),
    )
}

pub fn deploy_error_status(error: &DeployError) -> StatusCode {
    match error {
        DeployError::Validation(_) => StatusCode::BAD_REQUEST,
        DeployError::NotFound(_) => StatusCode::NOT_FOUND,
        DeployError::Conflict(_) => StatusCode::CONFLICT,
        DeployError::Upstream { .. }
        | DeployError::State(_)
        | DeployError::Io(_)
        | DeployError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn deploy_error_response(error: DeployError) -> Response {
    let status = deploy_error_status(&error);
    if status.is_server_error() {
        warn!(error = %error, "request failed");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(error.to_string()),
            rolled_back: error.rolled_back(),
        }),
    )
        .into_response()
}

fn parse_app(raw: &str) -> Result<AppName, Response> {
    AppName::new(raw)
        .map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response())
}

/// Unwrap an app name or return its 400 response.
macro_rules! app_or_400 {
    ($raw:expr) => {
        match parse_app(&$raw) {
            Ok(app) => app,
            Err(resp) => return resp,
        }
    };
}

// ── Deploy & rollback ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    pub health_check: Option<String>,
}

/// POST /deploy/{app}?health_check=/path
pub async fn deploy(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Query(query): Query<DeployQuery>,
    body: Body,
) -> Response {
    let app = app_or_400!(app);
    info!(app = %app, health_check = ?query.health_check, "deploy requested");
    match state.deployer.deploy(app, query.health_check, body).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

/// POST /rollback/{app}
pub async fn rollback(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    let app = app_or_400!(app);
    match state.deployer.rollback(&app).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AppAction {
    app: AppName,
    action: &'static str,
}

/// POST /stop/{app}
pub async fn stop(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    let app = app_or_400!(app);
    match state.deployer.stop(&app).await {
        Ok(()) => ApiResponse::ok(AppAction { app, action: "stopped" }).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

/// POST /restart/{app}
pub async fn restart(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    let app = app_or_400!(app);
    match state.deployer.restart(&app).await {
        Ok(()) => ApiResponse::ok(AppAction { app, action: "restarted" }).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

/// POST /destroy/{app}
pub async fn destroy(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    let app = app_or_400!(app);
    match state.deployer.destroy(&app).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

/// GET /status/{app}
pub async fn status(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    let app = app_or_400!(app);
    match state.deployer.status(&app).await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => deploy_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogsBody {
    app: AppName,
    lines: u32,
    logs: String,
}

/// GET /logs/{app}?lines=n
pub async fn logs(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let app = app_or_400!(app);
    let lines = match query.lines.as_deref().map(str::parse::<u32>) {
        None => None,
        Some(Ok(n)) => Some(n),
        Some(Err(_)) => {
            return error_response("lines must be a positive integer", StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    match state.deployer.logs(&app, lines).await {
        Ok(logs) => ApiResponse::ok(LogsBody {
            app,
            lines: lines.unwrap_or(hoist_deploy::DEFAULT_LOG_LINES),
            logs,
        })
        .into_response(),
        Err(e) => deploy_error_response(e),
    }
}

// ── Registry ───────────────────────────────────────────────────

/// GET /apps
pub async fn list_apps(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.deployer.apps()).into_response()
}

#[derive(Debug, Serialize)]
struct Liveness {
    status: &'static str,
    apps: usize,
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(Liveness {
        status: "ok",
        apps: state.deployer.registry().len(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_deploy::Stage;

    #[test]
    fn error_statuses() {
        let cases = [
            (DeployError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (DeployError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (DeployError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                DeployError::upstream(Stage::Extract, "boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (DeployError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(deploy_error_status(&error), status, "{error}");
        }
    }

    #[test]
    fn envelope_shape() {
        let ok = serde_json::to_value(&ApiResponse::ok(1).0).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 1}));

        let rolled = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some("health check failed".into()),
            rolled_back: true,
        };
        let json = serde_json::to_value(&rolled).unwrap();
        assert_eq!(json["rolled_back"], true);
        assert_eq!(json["success"], false);
    }

    #[test]
    fn bad_app_name_is_400() {
        let resp = parse_app("../etc").unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

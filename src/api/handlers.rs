use crate::api::AppState;
use crate::models::{ReportRow, RunOutcome, RunSummary};
use crate::service::{ProgressSnapshot, RunRequest};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;

/// 响应体
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
    pub cancelled: bool,
    pub summary: Option<RunSummary>,
    pub report: Option<Vec<ReportRow>>,
    pub unified_output: Option<PathBuf>,
}

impl RunResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            cancelled: false,
            summary: None,
            report: None,
            unified_output: None,
        }
    }

    fn from_outcome(outcome: RunOutcome) -> Self {
        let s = &outcome.summary;
        let message = if outcome.cancelled {
            format!("Cancelled after {} of processing, {} documents done", outcome.elapsed_text(), s.success)
        } else {
            format!(
                "Processed {} groups in {}: {} success, {} failures",
                s.groups,
                outcome.elapsed_text(),
                s.success,
                s.failures()
            )
        };
        Self {
            success: true,
            message,
            cancelled: outcome.cancelled,
            summary: Some(outcome.summary),
            report: Some(outcome.report),
            unified_output: outcome.unified_output,
        }
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 运行一次分摊; 同时只允许一个运行
pub async fn run_rateio(State(state): State<AppState>, Json(req): Json<RunRequest>) -> Response {
    if !state.hooks.try_begin() {
        let response = RunResponse::failure("A run is already in progress");
        return (StatusCode::CONFLICT, Json(response)).into_response();
    }

    let pipeline = state.pipeline.clone();
    let hooks = state.hooks.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let result = pipeline.run(&req, hooks.as_ref());
        hooks.finish();
        result
    })
    .await;

    match joined {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(RunResponse::from_outcome(outcome))).into_response(),
        Ok(Err(e)) => {
            tracing::error!("Run rejected: {}", e);
            let response = RunResponse::failure(format!("Error: {}", e));
            (StatusCode::UNPROCESSABLE_ENTITY, Json(response)).into_response()
        }
        Err(e) => {
            state.hooks.finish();
            tracing::error!("Run worker failed: {}", e);
            let response = RunResponse::failure(format!("Error: {}", e));
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

/// 请求取消当前运行
pub async fn cancel_rateio(State(state): State<AppState>) -> Response {
    let running = state.hooks.snapshot().running;
    if running {
        state.hooks.cancel_flag().cancel();
        tracing::info!("Cancellation requested");
    }
    let message = if running {
        "Cancellation requested"
    } else {
        "No run in progress"
    };
    let response = RunResponse {
        success: running,
        ..RunResponse::failure(message)
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// 当前进度
pub async fn progress(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.hooks.snapshot())
}

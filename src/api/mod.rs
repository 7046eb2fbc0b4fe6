pub mod handlers;

pub use handlers::*;

use crate::service::{Pipeline, TracingHooks};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// 共享状态: 流水线 + 进度/取消
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub hooks: Arc<TracingHooks>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            hooks: Arc::new(TracingHooks::default()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rateio/run", post(run_rateio))
        .route("/api/rateio/cancel", post(cancel_rateio))
        .route("/api/rateio/progress", get(progress))
        .with_state(state)
}

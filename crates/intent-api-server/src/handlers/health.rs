use axum::{http::StatusCode, Extension, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::session::SessionStoreStats;
use crate::services::DispatchService;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    sessions: SessionStoreStats,
}

pub async fn health_check(
    Extension(dispatch): Extension<Arc<DispatchService>>,
) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sessions: dispatch.store().stats(),
        }),
    )
}

pub async fn readiness_check() -> StatusCode {
    StatusCode::OK
}

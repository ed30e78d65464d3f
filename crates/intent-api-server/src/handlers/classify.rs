use axum::{extract::rejection::JsonRejection, Extension, Json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::models::{ClassifyRequest, ClassifyResponse};
use crate::services::DispatchService;
use crate::utils::error::ApiError;

pub async fn classify_handler(
    Extension(dispatch): Extension<Arc<DispatchService>>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if request.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("sessionID must not be empty".to_string()));
    }
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        "Classify request: request_id={}, session={}, text_len={}",
        request_id,
        request.session_id,
        request.text.len()
    );

    // Cancelled when axum drops this future (client went away).
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let span = tracing::info_span!("classify", request_id = %request_id);
    let response = dispatch
        .dispatch(&request, &cancel)
        .instrument(span)
        .await?;

    Ok(Json(response))
}

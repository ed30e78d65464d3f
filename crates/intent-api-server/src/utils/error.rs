use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorEnvelope;
use crate::services::classifier_service::ClassifierError;
use crate::services::dispatch_service::DispatchError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(err) => match err {
                DispatchError::UnknownAction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::Classifier(ClassifierError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
                DispatchError::Classifier(_) => StatusCode::BAD_GATEWAY,
                DispatchError::ActionExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                DispatchError::SessionStoreExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Dispatch(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("{}: {}", code, message);
        } else {
            tracing::warn!("{}: {}", code, message);
        }

        let body = Json(ErrorEnvelope {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

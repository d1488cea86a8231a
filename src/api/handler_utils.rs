use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinError;
use tracing::error;

use crate::api::error::ErrorKind;
use crate::preview::PreviewError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    error_kind: ErrorKind,
    error_code: String,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            success: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn map_preview_error(error: PreviewError) -> ApiObject<Value> {
    match error {
        PreviewError::EmptyChain => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "empty_chain",
            error.to_string(),
        ),
        PreviewError::Codec(_) => {
            error!(error = %error, "preview request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "malformed_image",
                error.to_string(),
            )
        }
    }
}

pub fn map_body_rejection(rejection: BytesRejection) -> ApiObject<Value> {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return error_response(
            status,
            ErrorKind::Validation,
            "payload_too_large",
            rejection.body_text(),
        );
    }
    error_response(
        status,
        ErrorKind::Validation,
        "unreadable_body",
        rejection.body_text(),
    )
}

// Unparsable bodies share the 500 of any other processing failure.
pub fn map_json_error(error: serde_json::Error) -> ApiObject<Value> {
    error!(error = %error, "request body is not a valid preview request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "invalid_json",
        error.to_string(),
    )
}

pub fn map_join_error(context: &str, join_error: JoinError) -> ApiObject<Value> {
    if join_error.is_panic() {
        error!(context, "processing task panicked");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown,
            "task_panicked",
            "Internal server error",
        );
    }
    internal_error(format!("{context}: {join_error}"))
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(|error| {
        json!({
            "success": false,
            "error": format!("response serialization failed: {error}"),
            "error_kind": ErrorKind::Infra.as_str(),
            "error_code": "serialization_error",
        })
    }))
}

// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! API error mapping: every failure becomes a JSON envelope with
//! `success: false` and an `error` string; validation errors carry their
//! stable `code`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use ocmem_core::OcmemError;

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Wrapper turning [`OcmemError`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub OcmemError);

impl From<OcmemError> for ApiError {
    fn from(e: OcmemError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            OcmemError::Validation { code, .. } if code == "FEATURE_OFF" => {
                (StatusCode::FORBIDDEN, Some(code.clone()))
            }
            OcmemError::Validation { code, .. } => {
                (StatusCode::BAD_REQUEST, Some(code.clone()))
            }
            // Privacy rejects are client errors, same as validation.
            OcmemError::Blocked { code } => (StatusCode::BAD_REQUEST, Some(code.clone())),
            OcmemError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            success: false,
            error: self.0.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

/// Convenience alias used by every handler.
pub type ApiResult<T> = Result<T, ApiError>;

/// 404 fallback for unknown routes.
pub async fn not_found() -> Response {
    let body = ErrorBody {
        success: false,
        error: "route not found".to_string(),
        code: None,
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

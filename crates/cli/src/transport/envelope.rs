// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform response envelope for every external surface.
//!
//! Success: `{success: true, timestamp, request_id, ...payload}`.
//! Failure: `{success: false, timestamp, request_id, error, error_code}`
//! plus an optional `hint`. Array payload fields always serialize as
//! arrays — absent-as-null breaks strict clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::OpError;

/// Success envelope wrapping any serializable payload.
#[derive(Debug, Clone, Serialize)]
pub struct ApiOk<T: Serialize> {
    pub success: bool,
    pub timestamp: String,
    pub request_id: String,
    #[serde(flatten)]
    pub payload: T,
}

/// Failure envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub timestamp: String,
    pub request_id: String,
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Wrap a payload in the success envelope.
pub fn ok<T: Serialize>(payload: T) -> Json<ApiOk<T>> {
    Json(ApiOk {
        success: true,
        timestamp: rfc3339_now(),
        request_id: new_request_id(),
        payload,
    })
}

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        let request_id = new_request_id();
        tracing::debug!(request_id, code = self.code.as_str(), "request failed: {}", self.message);
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiError {
            success: false,
            timestamp: rfc3339_now(),
            request_id,
            error: self.message,
            error_code: self.code.as_str().to_owned(),
            hint: self.hint,
        };
        (status, Json(body)).into_response()
    }
}

/// A failure response with extra payload fields merged in (used by
/// reservation conflicts, which carry the contested set).
pub fn error_with<T: Serialize>(err: &OpError, extra: T) -> Response {
    #[derive(Serialize)]
    struct Merged<'a, T: Serialize> {
        success: bool,
        timestamp: String,
        request_id: String,
        error: &'a str,
        error_code: &'a str,
        #[serde(flatten)]
        extra: T,
    }
    let status = StatusCode::from_u16(err.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Merged {
        success: false,
        timestamp: rfc3339_now(),
        request_id: new_request_id(),
        error: &err.message,
        error_code: err.code.as_str(),
        extra,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

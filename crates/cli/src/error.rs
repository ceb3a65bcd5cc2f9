// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error codes shared across the HTTP and WebSocket transports.
///
/// The set is closed and stable: clients switch on these strings, so new
/// failure modes must map onto an existing code rather than invent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Forbidden,
    Conflict,
    ServiceUnavailable,
    DependencyMissing,
    Internal,
    ApprovalRequired,
    ScanInProgress,
    ReservationFailed,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Forbidden => 403,
            Self::Conflict => 409,
            Self::ServiceUnavailable => 503,
            Self::DependencyMissing => 424,
            Self::Internal => 500,
            Self::ApprovalRequired => 403,
            Self::ScanInProgress => 409,
            Self::ReservationFailed => 409,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::Internal => "INTERNAL_ERROR",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::ScanInProgress => "SCAN_IN_PROGRESS",
            Self::ReservationFailed => "RESERVATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorised operation failure: a code plus a human-readable message.
///
/// Subsystems return this; transport adapters translate it into the
/// response envelope and an HTTP status. The optional `hint` carries
/// actionable remediation (used with [`ErrorCode::DependencyMissing`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl OpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn dependency_missing(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorCode::DependencyMissing, message).with_hint(hint)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for OpError {}

impl From<std::io::Error> for OpError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}

/// Convenience alias used throughout the core subsystems.
pub type OpResult<T> = Result<T, OpError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

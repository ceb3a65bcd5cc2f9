// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    bad_request = { ErrorCode::BadRequest, 400, "BAD_REQUEST" },
    not_found = { ErrorCode::NotFound, 404, "NOT_FOUND" },
    forbidden = { ErrorCode::Forbidden, 403, "FORBIDDEN" },
    conflict = { ErrorCode::Conflict, 409, "CONFLICT" },
    unavailable = { ErrorCode::ServiceUnavailable, 503, "SERVICE_UNAVAILABLE" },
    dependency = { ErrorCode::DependencyMissing, 424, "DEPENDENCY_MISSING" },
    internal = { ErrorCode::Internal, 500, "INTERNAL_ERROR" },
    approval = { ErrorCode::ApprovalRequired, 403, "APPROVAL_REQUIRED" },
    scan = { ErrorCode::ScanInProgress, 409, "SCAN_IN_PROGRESS" },
    reservation = { ErrorCode::ReservationFailed, 409, "RESERVATION_FAILED" },
)]
fn code_mappings(code: ErrorCode, status: u16, name: &str) {
    assert_eq!(code.http_status(), status);
    assert_eq!(code.as_str(), name);
}

#[test]
fn op_error_display() {
    let e = OpError::not_found("no such checkpoint: nightly");
    assert_eq!(e.to_string(), "NOT_FOUND: no such checkpoint: nightly");
}

#[test]
fn hint_serializes_only_when_present() {
    let plain = serde_json::to_value(OpError::conflict("session exists")).unwrap();
    assert!(plain.get("hint").is_none());

    let hinted = serde_json::to_value(OpError::dependency_missing(
        "tmux not found",
        "install tmux 3.2+ (apt install tmux)",
    ))
    .unwrap();
    assert_eq!(hinted["hint"], "install tmux 3.2+ (apt install tmux)");
}

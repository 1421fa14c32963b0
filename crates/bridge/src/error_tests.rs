use super::*;

#[test]
fn http_status_matches_kind() {
    assert_eq!(BridgeError::Validation("x".into()).http_status(), 400);
    assert_eq!(BridgeError::Unauthenticated("x".into()).http_status(), 401);
    assert_eq!(BridgeError::Offline.http_status(), 503);
    assert_eq!(BridgeError::TransientRemote("x".into()).http_status(), 502);
    assert_eq!(BridgeError::PermanentRemote("x".into()).http_status(), 422);
    assert_eq!(BridgeError::Device("x".into()).http_status(), 502);
    assert_eq!(BridgeError::Storage("x".into()).http_status(), 500);
    assert_eq!(BridgeError::Cancelled.http_status(), 499);
    assert_eq!(BridgeError::Internal("x".into()).http_status(), 500);
}

#[test]
fn exit_code_matches_operator_surface_contract() {
    assert_eq!(BridgeError::Validation("x".into()).exit_code(), 2);
    assert_eq!(BridgeError::Unauthenticated("x".into()).exit_code(), 3);
    assert_eq!(BridgeError::Offline.exit_code(), 4);
    assert_eq!(BridgeError::TransientRemote("x".into()).exit_code(), 4);
    assert_eq!(BridgeError::Storage("x".into()).exit_code(), 1);
    assert_eq!(BridgeError::Internal("x".into()).exit_code(), 1);
}

#[test]
fn as_str_is_screaming_snake_case() {
    assert_eq!(BridgeError::Offline.as_str(), "OFFLINE");
    assert_eq!(BridgeError::TransientRemote("x".into()).as_str(), "TRANSIENT_REMOTE");
}

#[test]
fn display_includes_code_and_message() {
    let err = BridgeError::Validation("bad input".into());
    assert_eq!(err.to_string(), "VALIDATION: bad input");
}

#[test]
fn display_bare_for_unit_variants() {
    assert_eq!(BridgeError::Offline.to_string(), "OFFLINE");
    assert_eq!(BridgeError::Cancelled.to_string(), "CANCELLED");
}

#[test]
fn to_error_body_carries_code_and_message() {
    let body = BridgeError::Device("reader unresponsive".into()).to_error_body("reader unresponsive");
    assert_eq!(body.code, "DEVICE");
    assert_eq!(body.message, "reader unresponsive");
}

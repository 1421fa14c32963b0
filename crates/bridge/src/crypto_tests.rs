use super::*;

#[test]
fn encrypt_then_decrypt_roundtrips() -> anyhow::Result<()> {
    let key = RawDataKey::derive("test-device-key");
    let plaintext = br#"{"finger_index":3,"verify_mode":"fingerprint"}"#;
    let blob = key.encrypt(plaintext)?;
    let recovered = key.decrypt(&blob)?;
    assert_eq!(recovered, plaintext);
    Ok(())
}

#[test]
fn ciphertext_differs_from_plaintext() -> anyhow::Result<()> {
    let key = RawDataKey::derive("test-device-key");
    let plaintext = b"sensitive payload";
    let blob = key.encrypt(plaintext)?;
    assert_ne!(&blob[NONCE_LEN..], plaintext);
    Ok(())
}

#[test]
fn distinct_keys_fail_to_decrypt_each_other() {
    let a = RawDataKey::derive("device-a");
    let b = RawDataKey::derive("device-b");
    let blob = a.encrypt(b"payload").expect("encrypt with key a");
    assert!(b.decrypt(&blob).is_err());
}

#[test]
fn decrypt_rejects_short_blob() {
    let key = RawDataKey::derive("device-a");
    assert!(key.decrypt(&[0u8; 4]).is_err());
}

#[test]
fn sign_request_is_deterministic() {
    let a = sign_request("k", b"body", 1_700_000_000, "dev-1");
    let b = sign_request("k", b"body", 1_700_000_000, "dev-1");
    assert_eq!(a, b);
}

#[test]
fn sign_request_changes_with_any_input() {
    let base = sign_request("k", b"body", 1_700_000_000, "dev-1");
    assert_ne!(base, sign_request("k2", b"body", 1_700_000_000, "dev-1"));
    assert_ne!(base, sign_request("k", b"other", 1_700_000_000, "dev-1"));
    assert_ne!(base, sign_request("k", b"body", 1_700_000_001, "dev-1"));
    assert_ne!(base, sign_request("k", b"body", 1_700_000_000, "dev-2"));
}

#[test]
fn verify_signature_accepts_matching_signature() {
    let sig = sign_request("device-key", b"payload", 1_700_000_000, "dev-1");
    assert!(verify_signature("device-key", b"payload", 1_700_000_000, "dev-1", &sig));
}

#[test]
fn verify_signature_rejects_tampered_body() {
    let sig = sign_request("device-key", b"payload", 1_700_000_000, "dev-1");
    assert!(!verify_signature("device-key", b"tampered", 1_700_000_000, "dev-1", &sig));
}

#[test]
fn constant_time_eq_matches_equal_strings() {
    assert!(constant_time_eq("abcdef", "abcdef"));
}

#[test]
fn constant_time_eq_rejects_different_length() {
    assert!(!constant_time_eq("abc", "abcdef"));
}

#[test]
fn within_skew_tolerance_accepts_boundary() {
    assert!(within_skew_tolerance(1000, 1000 - SKEW_TOLERANCE_SECS));
    assert!(within_skew_tolerance(1000, 1000 + SKEW_TOLERANCE_SECS));
}

#[test]
fn within_skew_tolerance_rejects_beyond_boundary() {
    assert!(!within_skew_tolerance(1000, 1000 - SKEW_TOLERANCE_SECS - 1));
    assert!(!within_skew_tolerance(1000, 1000 + SKEW_TOLERANCE_SECS + 1));
}

use std::time::SystemTime;

use super::*;

fn sample_pairing() -> DevicePairing {
    DevicePairing { device_id: "device-1".into(), device_key: "super-secret-key".into() }
}

#[test]
fn build_auth_headers_signature_is_verifiable() {
    let pairing = sample_pairing();
    let now = SystemTime::now();
    let headers = build_auth_headers(&pairing, b"body", now);
    assert_eq!(headers.device_id, "device-1");
    assert!(crate::crypto::verify_signature(&pairing.device_key, b"body", headers.timestamp, &headers.device_id, &headers.signature));
}

#[test]
fn save_then_load_pairing_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = pairing_path(dir.path());
    let pairing = sample_pairing();
    save_pairing(&path, &pairing)?;
    let loaded = load_pairing(&path)?.expect("pairing file should exist after save");
    assert_eq!(loaded.device_id, pairing.device_id);
    assert_eq!(loaded.device_key, pairing.device_key);
    Ok(())
}

#[test]
fn load_pairing_returns_none_when_absent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = pairing_path(dir.path());
    assert!(load_pairing(&path)?.is_none());
    Ok(())
}

#[test]
fn clear_pairing_removes_the_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = pairing_path(dir.path());
    save_pairing(&path, &sample_pairing())?;
    clear_pairing(&path, false)?;
    assert!(load_pairing(&path)?.is_none());
    Ok(())
}

#[test]
fn clear_pairing_without_force_errors_when_absent() {
    let path = PathBuf::from("/nonexistent/pairing.json");
    assert!(clear_pairing(&path, false).is_err());
}

#[test]
fn clear_pairing_with_force_tolerates_absence() -> anyhow::Result<()> {
    let path = PathBuf::from("/nonexistent/pairing.json");
    clear_pairing(&path, true)
}

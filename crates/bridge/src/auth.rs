// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication: pairing persistence and HMAC request signing (§4.F).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::BridgeError;
use crate::event::DevicePairing;

/// Request body for `POST /api/v1/devices/pair`.
#[derive(Debug, Clone, Serialize)]
pub struct PairRequest {
    pub pair_code: String,
    pub device_info: DeviceInfo,
}

/// Descriptive install metadata sent with the pairing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub hostname: String,
    pub agent_version: String,
    pub tier: String,
}

/// Response body from a successful pairing exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct PairResponse {
    pub device_id: String,
    pub device_key: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Headers required on every authenticated request (§4.F).
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub device_id: String,
    pub timestamp: i64,
    pub signature: String,
}

/// Build the signed-request headers for `body`, as of `now`.
pub fn build_auth_headers(pairing: &DevicePairing, body: &[u8], now: SystemTime) -> AuthHeaders {
    let timestamp = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let signature = crypto::sign_request(&pairing.device_key, body, timestamp, &pairing.device_id);
    AuthHeaders { device_id: pairing.device_id.clone(), timestamp, signature }
}

/// Load the persisted pairing record, if this install has paired.
pub fn load_pairing(path: &Path) -> Result<Option<DevicePairing>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Storage(format!("read pairing file {path:?}: {e}")))?;
    let pairing: DevicePairing = serde_json::from_str(&contents)
        .map_err(|e| BridgeError::Storage(format!("parse pairing file {path:?}: {e}")))?;
    Ok(Some(pairing))
}

/// Atomically persist the pairing record (write `.tmp` then rename, exactly
/// the teacher's `credential::persist::save` pattern).
pub fn save_pairing(path: &Path, pairing: &DevicePairing) -> Result<(), BridgeError> {
    let json = serde_json::to_string_pretty(pairing)
        .map_err(|e| BridgeError::Internal(format!("serialize pairing record: {e}")))?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)
        .map_err(|e| BridgeError::Storage(format!("write pairing tmp file {tmp_path:?}: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| BridgeError::Storage(format!("rename pairing tmp file into place: {e}")))?;
    Ok(())
}

/// Remove the persisted pairing record. `force` tolerates an absent file.
pub fn clear_pairing(path: &Path, force: bool) -> Result<(), BridgeError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && force => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BridgeError::Validation("no pairing record to remove".into()))
        }
        Err(e) => Err(BridgeError::Storage(format!("remove pairing file {path:?}: {e}"))),
    }
}

/// Path of the pairing file within the state directory.
pub fn pairing_path(state_dir: &Path) -> PathBuf {
    state_dir.join("pairing.json")
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! At-rest encryption for `raw_data` (§4.B) and HMAC request signing (§4.F).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::BridgeError;

const NONCE_LEN: usize = 12;

/// Per-install symmetric key used to encrypt `raw_data` at rest, derived via
/// HKDF-SHA256 from installation material (the pairing device key plus a
/// fixed context string) so no extra secret needs to be provisioned.
pub struct RawDataKey(Key<Aes256Gcm>);

impl RawDataKey {
    /// Derive the key from the paired device's shared secret.
    pub fn derive(device_key: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(b"bridge-raw-data-at-rest"), device_key.as_bytes());
        let mut okm = [0u8; 32];
        // HKDF only fails when the requested output exceeds 255 * hash_len,
        // which 32 bytes from a SHA-256 HKDF never does.
        let _ = hk.expand(b"raw_data-v1", &mut okm);
        Self(*Key::<Aes256Gcm>::from_slice(&okm))
    }

    /// Derive a key for installs that have not yet paired, from a random
    /// local install identifier persisted alongside the pairing file.
    pub fn derive_unpaired(install_id: &str) -> Self {
        Self::derive(install_id)
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext` ready to store.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let cipher = Aes256Gcm::new(&self.0);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| BridgeError::Storage(format!("encrypt raw_data: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob previously produced by [`Self::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, BridgeError> {
        if blob.len() < NONCE_LEN {
            return Err(BridgeError::Storage("raw_data blob shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.0);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| BridgeError::Storage(format!("decrypt raw_data: {e}")))
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase-hex `HMAC-SHA256(device_key, body ‖ timestamp ‖ device_id)`
/// signature used on every authenticated cloud request (§4.F).
pub fn sign_request(device_key: &str, body: &[u8], timestamp: i64, device_id: &str) -> String {
    // `device_key` is operator-provisioned at pairing time and always valid
    // HMAC key material; `new_from_slice` only fails for zero-length keys,
    // which pairing never produces.
    let mut mac = HmacSha256::new_from_slice(device_key.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"\0").unwrap_or_else(|_| unreachable_mac()));
    mac.update(body);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(device_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn unreachable_mac() -> HmacSha256 {
    // HMAC-SHA256 accepts any key length; a one-byte key always succeeds.
    #[allow(clippy::unwrap_used)]
    HmacSha256::new_from_slice(b"0").unwrap()
}

/// Verify a signature against freshly-computed expectation, in constant time.
pub fn verify_signature(
    device_key: &str,
    body: &[u8],
    timestamp: i64,
    device_id: &str,
    signature: &str,
) -> bool {
    let expected = sign_request(device_key, body, timestamp, device_id);
    constant_time_eq(&expected, signature)
}

/// Constant-time string comparison to prevent timing side-channel attacks on
/// signature verification.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Symmetric ±5-minute clock-skew tolerance for inbound timestamp validation.
pub const SKEW_TOLERANCE_SECS: i64 = 5 * 60;

/// Returns `true` iff `request_timestamp` is within the skew tolerance of
/// `server_time` (both seconds since epoch).
pub fn within_skew_tolerance(server_time: i64, request_timestamp: i64) -> bool {
    (server_time - request_timestamp).abs() <= SKEW_TOLERANCE_SECS
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;

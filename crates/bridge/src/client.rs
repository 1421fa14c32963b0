// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated cloud HTTP client with retry/backoff and a connectivity
//! probe (§4.G). Generalizes the teacher's `UpstreamClient` shape from a
//! fixed handful of GET helpers into a single signed `request()` entrypoint.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use rand::Rng;
use reqwest::Method;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth;
use crate::error::BridgeError;
use crate::event::DevicePairing;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Status codes that warrant a retry (§4.G).
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// One request to issue against the cloud platform.
pub struct CloudRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub body: Option<serde_json::Value>,
    pub require_auth: bool,
}

/// Shared, pooled HTTP client plus the current pairing state (§4.G).
pub struct CloudClient {
    base_url: String,
    http: reqwest::Client,
    pairing: RwLock<Option<DevicePairing>>,
    max_attempts: u32,
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>, pairing: Option<DevicePairing>) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Internal(format!("build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
            pairing: RwLock::new(pairing),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Override the retry ceiling. Used by tests to avoid the full ~1 minute
    /// backoff schedule when exercising the unreachable-cloud path.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn set_pairing(&self, pairing: Option<DevicePairing>) {
        *self.pairing.write().expect("pairing lock poisoned") = pairing;
    }

    pub fn pairing(&self) -> Option<DevicePairing> {
        self.pairing.read().expect("pairing lock poisoned").clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// TCP-dial `host:port` (443 for https), 5s timeout. Loopback
    /// short-circuits to online for testability, the same special-casing
    /// the teacher applies to localhost in its own transport tests.
    pub async fn is_online(&self) -> bool {
        let Some((host, port)) = host_and_port(&self.base_url) else { return false };
        if host == "localhost" || host == "127.0.0.1" || host == "::1" {
            return true;
        }
        let dial = TcpStream::connect((host.as_str(), port));
        matches!(tokio::time::timeout(CONNECTIVITY_TIMEOUT, dial).await, Ok(Ok(_)))
    }

    /// Execute `req`, signing it if `require_auth`, retrying on transport
    /// errors or retryable status codes with backoff + jitter, honoring
    /// `cancel` at every suspension point.
    pub async fn execute(
        &self,
        req: CloudRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, BridgeError> {
        let pairing = self.pairing();
        if req.require_auth && pairing.is_none() {
            return Err(BridgeError::Unauthenticated("device is not paired".into()));
        }
        if !self.is_online().await {
            return Err(BridgeError::Offline);
        }

        let body_bytes = match &req.body {
            Some(value) => {
                serde_json::to_vec(value).map_err(|e| BridgeError::Internal(format!("serialize body: {e}")))?
            }
            None => Vec::new(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            let mut builder = self.http.request(req.method.clone(), self.url(req.path));
            if !body_bytes.is_empty() {
                builder = builder.header("content-type", "application/json").body(body_bytes.clone());
            }
            if req.require_auth {
                if let Some(ref pairing) = pairing {
                    let headers = auth::build_auth_headers(pairing, &body_bytes, SystemTime::now());
                    builder = builder
                        .header("X-Device-ID", headers.device_id)
                        .header("X-Timestamp", headers.timestamp.to_string())
                        .header("X-Signature", headers.signature);
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                result = builder.send() => result,
            };

            match outcome {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if (200..300).contains(&status) {
                        let bytes = resp
                            .bytes()
                            .await
                            .map_err(|e| BridgeError::TransientRemote(format!("read response body: {e}")))?;
                        if bytes.is_empty() {
                            return Ok(serde_json::Value::Null);
                        }
                        return serde_json::from_slice(&bytes)
                            .map_err(|e| BridgeError::Internal(format!("parse response json: {e}")));
                    }
                    if matches!(status, 400 | 401 | 403 | 404) {
                        return Err(BridgeError::PermanentRemote(format!("http {status}")));
                    }
                    if !is_retryable_status(status) || attempt >= self.max_attempts {
                        return Err(BridgeError::TransientRemote(format!("http {status} after {attempt} attempt(s)")));
                    }
                    warn!(status, attempt, path = req.path, "retryable cloud response, backing off");
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(BridgeError::TransientRemote(format!("{e} after {attempt} attempt(s)")));
                    }
                    debug!(error = %e, attempt, path = req.path, "transport error, backing off");
                }
            }

            let delay = backoff_delay(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// `min(max_delay, base_delay * 2^(attempt-1))` with ±10% jitter, floored at
/// `base_delay` (§4.G).
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    let capped = exp.min(MAX_DELAY);
    let jitter_frac = rand::rng().random_range(-0.10..=0.10);
    let jittered_nanos = (capped.as_nanos() as f64 * (1.0 + jitter_frac)).max(0.0) as u64;
    Duration::from_nanos(jittered_nanos).max(BASE_DELAY)
}

/// Pull `(host, port)` out of a `scheme://host[:port][/...]` URL without
/// pulling in a full URL-parsing crate for one field.
fn host_and_port(base_url: &str) -> Option<(String, u16)> {
    let without_scheme = base_url.split_once("://").map(|(_, rest)| rest).unwrap_or(base_url);
    let is_https = base_url.starts_with("https://");
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            Some((host.to_string(), port.parse().ok()?))
        }
        _ => Some((authority.to_string(), if is_https { 443 } else { 80 })),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

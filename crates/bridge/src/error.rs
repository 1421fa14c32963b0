// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error kind shared by the store, HTTP client, adapters, and the
//! operator-facing HTTP/CLI surfaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The error kinds recognized by the core (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeError {
    /// Input fails a precondition; caller-visible, never retried.
    Validation(String),
    /// Missing or rejected credentials.
    Unauthenticated(String),
    /// Connectivity probe failed; locally recoverable, events remain queued.
    Offline,
    /// 408/429/5xx or transport error; retried per the HTTP client's policy.
    TransientRemote(String),
    /// 4xx (non-429); not retried locally.
    PermanentRemote(String),
    /// Adapter I/O failure.
    Device(String),
    /// Durable-store failure.
    Storage(String),
    /// Graceful shutdown. Never logged as an error.
    Cancelled,
    /// Anything else (ambient stack failures: config, serialization, I/O).
    Internal(String),
}

impl BridgeError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::Offline => 503,
            Self::TransientRemote(_) => 502,
            Self::PermanentRemote(_) => 422,
            Self::Device(_) => 502,
            Self::Storage(_) => 500,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Offline => "OFFLINE",
            Self::TransientRemote(_) => "TRANSIENT_REMOTE",
            Self::PermanentRemote(_) => "PERMANENT_REMOTE",
            Self::Device(_) => "DEVICE",
            Self::Storage(_) => "STORAGE",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Exit code for the operator CLI (§6 Operator surface).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Unauthenticated(_) => 3,
            Self::Offline | Self::TransientRemote(_) => 4,
            _ => 1,
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(m)
            | Self::Unauthenticated(m)
            | Self::TransientRemote(m)
            | Self::PermanentRemote(m)
            | Self::Device(m)
            | Self::Storage(m)
            | Self::Internal(m) => write!(f, "{}: {m}", self.as_str()),
            Self::Offline => f.write_str("OFFLINE"),
            Self::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Top-level error response envelope (HTTP surfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the opencode-mem memory service.

use thiserror::Error;

/// The primary error type used across all opencode-mem crates.
#[derive(Debug, Error)]
pub enum OcmemError {
    /// Configuration errors (unreadable file, invalid JSON, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Input validation errors. Carries a stable machine-readable code
    /// (e.g. `BAD_REQUEST`, `FEATURE_OFF`) alongside the human-readable
    /// message.
    #[error("{code}: {message}")]
    Validation { code: String, message: String },

    /// Privacy rejects on write paths (`BLOCKED_PRIVATE`, `CONTENT_EMPTY`,
    /// `CONTENT_TOO_LARGE`). Synchronous, never retried, no partial persist.
    #[error("content blocked: {code}")]
    Blocked { code: String },

    /// External provider errors (embedding endpoint, vector collection).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OcmemError {
    /// Shorthand for a validation error with a stable code.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a privacy reject with a stable code.
    pub fn blocked(code: impl Into<String>) -> Self {
        Self::Blocked { code: code.into() }
    }

    /// The validation code, when this is a validation error.
    pub fn validation_code(&self) -> Option<&str> {
        match self {
            Self::Validation { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The privacy-reject code, when this is a blocked error.
    pub fn blocked_code(&self) -> Option<&str> {
        match self {
            Self::Blocked { code } => Some(code),
            _ => None,
        }
    }
}

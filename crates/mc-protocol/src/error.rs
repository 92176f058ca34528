//! Error type reported by engine modules.

use serde::{Deserialize, Serialize};

/// An error raised inside an engine module.
///
/// Engines report a numeric code (0 when they have none) and a message. The
/// message is what ends up in logs and in `500` response bodies, so it is
/// displayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub code: u32,
    pub message: String,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
        }
    }

    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown_route(method: &str, path: &str) -> Self {
        Self::new(format!("unknown route: {method} {path}"))
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(format!("invalid parameter: {}", message.into()))
    }
}

//! Value types exchanged between the server and engine modules.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Module metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Interface version triple reported by an engine module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Storage backend kinds understood by the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            other => Err(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Subsystem tag attached to every message written to the engine log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSubSystem {
    System,
    Network,
    Journal,
    Machine,
}

impl LogSubSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Network => "network",
            Self::Journal => "journal",
            Self::Machine => "machine",
        }
    }
}

impl fmt::Display for LogSubSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an engine log message, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    FatalError,
    CriticalError,
    Warning,
    Message,
    Info,
    Debug,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request handling
// ─────────────────────────────────────────────────────────────────────────────

/// A form field a handler wants bound before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub is_file: bool,
    pub is_mandatory: bool,
}

impl FieldDescriptor {
    pub fn file(name: impl Into<String>, is_mandatory: bool) -> Self {
        Self {
            name: name.into(),
            is_file: true,
            is_mandatory,
        }
    }

    pub fn scalar(name: impl Into<String>, is_mandatory: bool) -> Self {
        Self {
            name: name.into(),
            is_file: false,
            is_mandatory,
        }
    }
}

/// Outcome of [`Handler::handle`](crate::Handler::handle). The payload is
/// fetched separately through `result_payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub content_type: String,
    pub status: u32,
}

impl HandlerResponse {
    pub fn new(content_type: impl Into<String>, status: u32) -> Self {
        Self {
            content_type: content_type.into(),
            status,
        }
    }

    pub fn ok(content_type: impl Into<String>) -> Self {
        Self::new(content_type, 200)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-module binding
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle a storage module hands out so the core module can call back
/// into it. Only modules of the same engine family know the concrete type.
#[derive(Clone)]
pub struct SymbolLookup {
    inner: Arc<dyn Any + Send + Sync>,
}

impl SymbolLookup {
    pub fn new<T: Any + Send + Sync>(symbols: T) -> Self {
        Self {
            inner: Arc::new(symbols),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(symbols: Arc<T>) -> Self {
        Self { inner: symbols }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for SymbolLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolLookup").finish_non_exhaustive()
    }
}

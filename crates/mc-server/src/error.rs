//! Startup errors. All of them are fatal for the process.

use std::path::PathBuf;

use mc_protocol::EngineError;
use mc_transport::TransportError;

use crate::lifecycle::StartupStep;

/// The server configuration or the package manifest it references is
/// unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML in {}: {source}", path.display())]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },

    #[error("root element of {} is <{found}>, expected <{expected}>", path.display())]
    RootElement {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("invalid namespace in {}: expected {expected:?}, found {found:?}", path.display())]
    Namespace {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("missing or empty {0}")]
    EmptyField(&'static str),

    #[error("invalid server port: {0:?}")]
    InvalidPort(String),

    #[error("server port {0} is outside 1024..=49151")]
    PortOutOfRange(u32),

    #[error("data directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("unsupported database type: {0:?}")]
    UnsupportedDatabase(String),

    #[error("{what} does not exist: {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error(transparent)]
    Library(#[from] RegistryError),
}

/// A library table entry is invalid, or a required entry is absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("library #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("library {name:?} has an empty import path")]
    EmptyImport { name: String },

    #[error("required library {0:?} is not declared")]
    Missing(String),
}

/// Bringing the engine up or down failed.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{step} failed: {source}")]
    Step {
        step: StartupStep,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("could not read package configuration {}: {source}", path.display())]
    ReadConfiguration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Listener(#[from] TransportError),

    #[error("unknown engine {name:?} (available: {available})")]
    UnknownEngine { name: String, available: String },
}

impl LifecycleError {
    /// The startup step that failed, if the failure came from the engine.
    pub fn step(&self) -> Option<StartupStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Attach the failing step to an engine call.
pub(crate) trait StepContext<T> {
    fn step(self, step: StartupStep) -> Result<T, LifecycleError>;
}

impl<T> StepContext<T> for Result<T, EngineError> {
    fn step(self, step: StartupStep) -> Result<T, LifecycleError> {
        self.map_err(|source| LifecycleError::Step { step, source })
    }
}

//! Machine control server: configuration and engine lifecycle.
//!
//! [`ConfigResolver`] reads `amc_server.xml` and the package manifest it
//! names into a [`ServerConfig`]. [`EngineLifecycle`] then brings up an
//! engine from an [`EngineCatalog`] factory, serves HTTP through
//! `mc-transport`, and tears the engine's worker threads down again.

pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod registry;

pub use catalog::EngineCatalog;
pub use config::{ConfigResolver, SERVER_NAMESPACE, ServerConfig};
pub use error::{ConfigError, LifecycleError, RegistryError};
pub use lifecycle::{EngineLifecycle, RunningEngine, StartupStep};
pub use manifest::{LibraryDescriptor, PACKAGE_NAMESPACE, PackageManifest};
pub use registry::{CORE_LIBRARY, DATAMODEL_LIBRARY, LibraryInfo, LibraryRegistry};

//! Engine capability traits.
//!
//! An engine is made of two modules: a data (storage) module and a core
//! module. The server loads both through an [`EngineFactory`], wires the
//! storage symbols into the core, and from then on only talks to the
//! [`ExecutionContext`] the core creates.
//!
//! All calls are synchronous. The execution context and the handlers it
//! creates are shared across the HTTP worker pool, so implementations must be
//! safe for concurrent use.

use std::path::Path;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::types::{
    DatabaseType, FieldDescriptor, HandlerResponse, LogLevel, LogSubSystem, SymbolLookup,
    Version,
};

/// Receives storage log messages: `(message, subsystem, level)`.
pub type LogCallback = Arc<dyn Fn(&str, &str, LogLevel) + Send + Sync>;

/// Produces engine modules from their binary paths.
///
/// This replaces loading shared libraries at runtime: the server picks one
/// factory at startup and every module comes from it.
pub trait EngineFactory: Send + Sync {
    /// Name the factory is registered under.
    fn name(&self) -> &str;

    /// Load the data/storage module declared at `path`.
    fn load_data_module(&self, path: &Path) -> EngineResult<Box<dyn DataModule>>;

    /// Load the core execution module declared at `path`.
    fn load_core_module(&self, path: &Path) -> EngineResult<Box<dyn CoreModule>>;
}

/// The storage side of an engine.
pub trait DataModule: Send + Sync {
    fn version(&self) -> EngineResult<Version>;

    fn create_data_model(&self) -> EngineResult<Arc<dyn DataModel>>;

    /// Handle the core module uses to bind to this module's symbols.
    fn symbol_lookup(&self) -> EngineResult<SymbolLookup>;
}

/// A data model instance backed by persistent storage.
pub trait DataModel: Send + Sync {
    fn initialise_storage(
        &self,
        data_directory: &Path,
        database: DatabaseType,
        connection_string: &str,
    ) -> EngineResult<()>;

    /// Install a sink for the data model's own log output.
    fn set_log_callback(&self, _callback: LogCallback) -> EngineResult<()> {
        Ok(())
    }
}

/// The execution side of an engine.
pub trait CoreModule: Send + Sync {
    fn version(&self) -> EngineResult<Version>;

    /// Make another module's symbols available to this one.
    fn inject_component(&self, name: &str, symbols: SymbolLookup) -> EngineResult<()>;

    fn create_context(
        &self,
        data_model: Arc<dyn DataModel>,
    ) -> EngineResult<Arc<dyn ExecutionContext>>;
}

/// The engine's central handle: owns worker threads, the log, and creates
/// one [`Handler`] per HTTP request.
pub trait ExecutionContext: Send + Sync {
    fn register_library(
        &self,
        name: &str,
        binary_path: &Path,
        resource_path: Option<&Path>,
    ) -> EngineResult<()>;

    /// Parse and apply the package configuration document.
    fn parse_configuration(&self, xml: &str) -> EngineResult<()>;

    fn load_client_bundle(&self, path: &Path) -> EngineResult<()>;

    fn start_all_threads(&self) -> EngineResult<()>;

    fn terminate_all_threads(&self) -> EngineResult<()>;

    fn log(&self, message: &str, subsystem: LogSubSystem, level: LogLevel);

    /// Resolve a request to a handler. Fails for unknown routes or when the
    /// authorization is rejected.
    fn create_handler(
        &self,
        path: &str,
        method: &str,
        authorization: &str,
    ) -> EngineResult<Box<dyn Handler>>;
}

/// Per-request handler created by the execution context.
///
/// The dispatcher drives it in a fixed order: input negotiation
/// (`expects_raw_body`, `expects_form_data`), field binding, one call to
/// `handle`, then `result_payload`.
pub trait Handler: Send {
    fn expects_raw_body(&self) -> EngineResult<bool>;

    /// Returns `(field_count, expects_form)`.
    fn expects_form_data(&self) -> EngineResult<(u32, bool)>;

    fn field_descriptor(&self, index: u32) -> EngineResult<FieldDescriptor>;

    fn set_file_field(&mut self, name: &str, data: Vec<u8>) -> EngineResult<()>;

    fn set_scalar_field(&mut self, name: &str, value: &str) -> EngineResult<()>;

    fn handle(&mut self, raw_body: &[u8]) -> EngineResult<HandlerResponse>;

    fn result_payload(&self) -> EngineResult<Vec<u8>>;
}

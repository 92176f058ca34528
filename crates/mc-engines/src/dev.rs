//! Development engine.
//!
//! A small in-process engine that lets the server run without an external
//! machine control engine. It keeps what the lifecycle hands it (libraries,
//! configuration text, client bundle) and serves a handful of diagnostic
//! routes:
//!
//! | method | path              | input                                  |
//! |--------|-------------------|----------------------------------------|
//! | GET    | `/api/version`    | none                                   |
//! | GET    | `/api/libraries`  | none                                   |
//! | POST   | `/api/upload`     | form: file `file` (mandatory), `name`  |
//! | POST   | `/api/echo`       | raw body                               |

mod context;
mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mc_protocol::{
    CoreModule, DATA_COMPONENT, DataModel, DataModule, DatabaseType, EngineError, EngineFactory,
    EngineResult, ExecutionContext, LogCallback, LogLevel, SymbolLookup, Version,
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub use context::DevContext;

/// Name the development engine is registered under.
pub const ENGINE_NAME: &str = "dev";

fn crate_version() -> Version {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    Version::new(
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DevEngineFactory;

impl DevEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for DevEngineFactory {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn load_data_module(&self, path: &Path) -> EngineResult<Box<dyn DataModule>> {
        debug!(library = %path.display(), "dev data module loaded");
        Ok(Box::new(DevDataModule {
            storage: Arc::new(DevStorage::default()),
        }))
    }

    fn load_core_module(&self, path: &Path) -> EngineResult<Box<dyn CoreModule>> {
        debug!(library = %path.display(), "dev core module loaded");
        Ok(Box::new(DevCoreModule {
            storage: RwLock::new(None),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Storage state shared between the data model and the core module.
#[derive(Default)]
pub struct DevStorage {
    location: RwLock<Option<StorageLocation>>,
    log: Mutex<Option<LogCallback>>,
}

#[derive(Debug, Clone)]
struct StorageLocation {
    data_directory: PathBuf,
    database: DatabaseType,
    connection_string: String,
}

impl DevStorage {
    pub fn data_directory(&self) -> Option<PathBuf> {
        self.location.read().as_ref().map(|l| l.data_directory.clone())
    }

    pub fn connection_string(&self) -> Option<String> {
        self.location
            .read()
            .as_ref()
            .map(|l| l.connection_string.clone())
    }

    pub fn database(&self) -> Option<DatabaseType> {
        self.location.read().as_ref().map(|l| l.database)
    }

    fn log(&self, message: &str, level: LogLevel) {
        if let Some(callback) = self.log.lock().as_ref() {
            callback(message, "datamodel", level);
        }
    }
}

struct DevDataModule {
    storage: Arc<DevStorage>,
}

impl DataModule for DevDataModule {
    fn version(&self) -> EngineResult<Version> {
        Ok(crate_version())
    }

    fn create_data_model(&self) -> EngineResult<Arc<dyn DataModel>> {
        Ok(Arc::new(DevDataModel {
            storage: self.storage.clone(),
        }))
    }

    fn symbol_lookup(&self) -> EngineResult<SymbolLookup> {
        Ok(SymbolLookup::from_arc(self.storage.clone()))
    }
}

struct DevDataModel {
    storage: Arc<DevStorage>,
}

impl DataModel for DevDataModel {
    fn initialise_storage(
        &self,
        data_directory: &Path,
        database: DatabaseType,
        connection_string: &str,
    ) -> EngineResult<()> {
        if !data_directory.is_dir() {
            return Err(EngineError::new(format!(
                "data directory not found: {}",
                data_directory.display()
            )));
        }
        if connection_string.is_empty() {
            return Err(EngineError::invalid_param("empty connection string"));
        }

        *self.storage.location.write() = Some(StorageLocation {
            data_directory: data_directory.to_path_buf(),
            database,
            connection_string: connection_string.to_string(),
        });
        self.storage.log(
            &format!("{database} storage at {connection_string}"),
            LogLevel::Message,
        );
        Ok(())
    }

    fn set_log_callback(&self, callback: LogCallback) -> EngineResult<()> {
        *self.storage.log.lock() = Some(callback);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Core module
// ─────────────────────────────────────────────────────────────────────────────

struct DevCoreModule {
    storage: RwLock<Option<Arc<DevStorage>>>,
}

impl CoreModule for DevCoreModule {
    fn version(&self) -> EngineResult<Version> {
        Ok(crate_version())
    }

    fn inject_component(&self, name: &str, symbols: SymbolLookup) -> EngineResult<()> {
        if name != DATA_COMPONENT {
            return Err(EngineError::invalid_param(format!("unknown component {name:?}")));
        }
        let storage = symbols
            .downcast::<DevStorage>()
            .ok_or_else(|| EngineError::new("data module is not a dev engine data module"))?;
        *self.storage.write() = Some(storage);
        Ok(())
    }

    fn create_context(
        &self,
        _data_model: Arc<dyn DataModel>,
    ) -> EngineResult<Arc<dyn ExecutionContext>> {
        let storage = self
            .storage
            .read()
            .clone()
            .ok_or_else(|| EngineError::new("data module symbols were not injected"))?;
        Ok(Arc::new(DevContext::new(storage, crate_version())))
    }
}

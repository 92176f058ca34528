//! Execution context of the development engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mc_protocol::{
    EngineError, EngineResult, ExecutionContext, Handler, LogLevel, LogSubSystem, Version,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::DevStorage;
use super::routes;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LibraryEntry {
    pub binary_path: PathBuf,
    pub resource_path: Option<PathBuf>,
}

/// State visible to request handlers.
pub(crate) struct DevState {
    pub version: Version,
    pub storage: Arc<DevStorage>,
    pub libraries: RwLock<BTreeMap<String, LibraryEntry>>,
    pub configuration: RwLock<Option<String>>,
    pub client_bundle: RwLock<Option<(PathBuf, usize)>>,
    pub heartbeats: AtomicU64,
    pub uploads: AtomicU64,
    pub started: Instant,
}

struct Heartbeat {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Keeps what the lifecycle registers and owns one heartbeat worker thread.
pub struct DevContext {
    state: Arc<DevState>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl DevContext {
    pub(crate) fn new(storage: Arc<DevStorage>, version: Version) -> Self {
        Self {
            state: Arc::new(DevState {
                version,
                storage,
                libraries: RwLock::new(BTreeMap::new()),
                configuration: RwLock::new(None),
                client_bundle: RwLock::new(None),
                heartbeats: AtomicU64::new(0),
                uploads: AtomicU64::new(0),
                started: Instant::now(),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn library_names(&self) -> Vec<String> {
        self.state.libraries.read().keys().cloned().collect()
    }

    pub fn configuration(&self) -> Option<String> {
        self.state.configuration.read().clone()
    }

    /// Size in bytes of the loaded client bundle.
    pub fn client_bundle_size(&self) -> Option<usize> {
        self.state.client_bundle.read().as_ref().map(|(_, size)| *size)
    }

    pub fn threads_running(&self) -> bool {
        self.heartbeat.lock().is_some()
    }
}

impl ExecutionContext for DevContext {
    fn register_library(
        &self,
        name: &str,
        binary_path: &Path,
        resource_path: Option<&Path>,
    ) -> EngineResult<()> {
        debug!(library = name, path = %binary_path.display(), "library registered");
        self.state.libraries.write().insert(
            name.to_string(),
            LibraryEntry {
                binary_path: binary_path.to_path_buf(),
                resource_path: resource_path.map(Path::to_path_buf),
            },
        );
        Ok(())
    }

    fn parse_configuration(&self, xml: &str) -> EngineResult<()> {
        let trimmed = xml.trim_start();
        if !trimmed.starts_with('<') {
            return Err(EngineError::invalid_param(
                "package configuration is not an XML document",
            ));
        }
        *self.state.configuration.write() = Some(xml.to_string());
        Ok(())
    }

    fn load_client_bundle(&self, path: &Path) -> EngineResult<()> {
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::new(format!(
                "could not read client bundle {}: {e}",
                path.display()
            ))
        })?;
        info!(bundle = %path.display(), bytes = bytes.len(), "client bundle loaded");
        *self.state.client_bundle.write() = Some((path.to_path_buf(), bytes.len()));
        Ok(())
    }

    fn start_all_threads(&self) -> EngineResult<()> {
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_some() {
            return Err(EngineError::new("worker threads are already running"));
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let state = self.state.clone();
        let handle = std::thread::Builder::new()
            .name("dev-heartbeat".into())
            .spawn(move || {
                while let Err(mpsc::RecvTimeoutError::Timeout) =
                    stopped.recv_timeout(HEARTBEAT_INTERVAL)
                {
                    let beats = state.heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(beats, "heartbeat");
                }
            })
            .map_err(|e| EngineError::new(format!("could not spawn heartbeat thread: {e}")))?;

        *heartbeat = Some(Heartbeat { stop, handle });
        debug!("heartbeat thread started");
        Ok(())
    }

    fn terminate_all_threads(&self) -> EngineResult<()> {
        let Some(Heartbeat { stop, handle }) = self.heartbeat.lock().take() else {
            return Ok(());
        };
        // The receiver may be gone already; joining is what matters.
        let _ = stop.send(());
        handle
            .join()
            .map_err(|_| EngineError::new("heartbeat thread panicked"))?;
        debug!("heartbeat thread stopped");
        Ok(())
    }

    fn log(&self, message: &str, subsystem: LogSubSystem, level: LogLevel) {
        let subsystem = subsystem.as_str();
        match level {
            LogLevel::FatalError | LogLevel::CriticalError => error!(subsystem, "{message}"),
            LogLevel::Warning => warn!(subsystem, "{message}"),
            LogLevel::Message | LogLevel::Info => info!(subsystem, "{message}"),
            LogLevel::Debug => debug!(subsystem, "{message}"),
        }
    }

    fn create_handler(
        &self,
        path: &str,
        method: &str,
        _authorization: &str,
    ) -> EngineResult<Box<dyn Handler>> {
        routes::resolve(method, path, self.state.clone())
    }
}

impl Drop for DevContext {
    fn drop(&mut self) {
        if let Err(err) = self.terminate_all_threads() {
            warn!("{err}");
        }
    }
}

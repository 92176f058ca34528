//! EngineLifecycle: the ordered startup and shutdown of the engine.
//!
//! Startup is strictly sequential and fail-fast: the first failing step
//! aborts everything after it, and nothing already done is rolled back.
//!
//! 1. load the data module, read its version
//! 2. create the data model, initialise storage
//! 3. fetch the data module's symbol lookup
//! 4. load the core module, read its version
//! 5. inject the data symbols into the core module
//! 6. create the execution context
//! 7. register every library
//! 8. parse the package configuration
//! 9. load the client bundle
//! 10. start worker threads
//! 11. serve HTTP until the listener fails or shutdown is requested
//! 12. terminate worker threads

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use mc_protocol::{
    CoreModule, DATA_COMPONENT, DataModel, DataModule, EngineFactory, ExecutionContext, LogLevel,
    LogSubSystem,
};
use mc_transport::{RestServer, TransportConfig, TransportError};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{LifecycleError, StepContext};
use crate::registry::{CORE_LIBRARY, DATAMODEL_LIBRARY};

/// Engine calls made during startup and shutdown, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StartupStep {
    LoadDataModule,
    InitialiseStorage,
    DataSymbols,
    LoadCoreModule,
    InjectDataSymbols,
    CreateContext,
    RegisterLibraries,
    ParseConfiguration,
    LoadClientBundle,
    StartThreads,
    TerminateThreads,
}

impl StartupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadDataModule => "loading the data module",
            Self::InitialiseStorage => "initialising storage",
            Self::DataSymbols => "reading data module symbols",
            Self::LoadCoreModule => "loading the core module",
            Self::InjectDataSymbols => "injecting data module symbols",
            Self::CreateContext => "creating the execution context",
            Self::RegisterLibraries => "registering libraries",
            Self::ParseConfiguration => "parsing the package configuration",
            Self::LoadClientBundle => "loading the client bundle",
            Self::StartThreads => "starting worker threads",
            Self::TerminateThreads => "terminating worker threads",
        }
    }
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one engine, chosen by factory, through its lifecycle.
pub struct EngineLifecycle {
    config: ServerConfig,
    factory: Arc<dyn EngineFactory>,
}

impl EngineLifecycle {
    pub fn new(config: ServerConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run startup steps 1 to 10.
    pub fn start(&self) -> Result<RunningEngine, LifecycleError> {
        let config = &self.config;
        let factory = &self.factory;
        info!(engine = factory.name(), package = %config.package_name, "starting engine");

        // 1
        let datamodel = config.libraries.require(DATAMODEL_LIBRARY)?;
        let data_module = factory
            .load_data_module(datamodel.binary_path())
            .step(StartupStep::LoadDataModule)?;
        let data_version = data_module.version().step(StartupStep::LoadDataModule)?;
        info!(
            library = %datamodel.binary_path().display(),
            version = %data_version,
            "data module loaded"
        );

        // 2
        let data_model = data_module
            .create_data_model()
            .step(StartupStep::InitialiseStorage)?;
        data_model
            .set_log_callback(Arc::new(forward_storage_log))
            .step(StartupStep::InitialiseStorage)?;
        data_model
            .initialise_storage(
                &config.data_directory,
                config.database,
                &config.connection_string,
            )
            .step(StartupStep::InitialiseStorage)?;
        debug!(connection = %config.connection_string, "storage initialised");

        // 3
        let symbols = data_module.symbol_lookup().step(StartupStep::DataSymbols)?;

        // 4
        let core = config.libraries.require(CORE_LIBRARY)?;
        let core_module = factory
            .load_core_module(core.binary_path())
            .step(StartupStep::LoadCoreModule)?;
        let core_version = core_module.version().step(StartupStep::LoadCoreModule)?;
        info!(
            library = %core.binary_path().display(),
            version = %core_version,
            "core module loaded"
        );

        // 5
        core_module
            .inject_component(DATA_COMPONENT, symbols)
            .step(StartupStep::InjectDataSymbols)?;

        // 6
        let context = core_module
            .create_context(data_model.clone())
            .step(StartupStep::CreateContext)?;

        // 7
        for (name, library) in config.libraries.iter() {
            context
                .register_library(name, library.binary_path(), library.resource_path())
                .step(StartupStep::RegisterLibraries)?;
        }

        // 8
        context.log(
            &format!(
                "Loading {} ({})",
                config.package_name,
                config.package_config.display()
            ),
            LogSubSystem::System,
            LogLevel::Message,
        );
        let package_xml = std::fs::read_to_string(&config.package_config).map_err(|source| {
            LifecycleError::ReadConfiguration {
                path: config.package_config.clone(),
                source,
            }
        })?;
        context
            .parse_configuration(&package_xml)
            .step(StartupStep::ParseConfiguration)?;

        // 9
        context
            .load_client_bundle(&config.client_bundle)
            .step(StartupStep::LoadClientBundle)?;

        // 10
        context.start_all_threads().step(StartupStep::StartThreads)?;
        info!("engine started");

        Ok(RunningEngine {
            context,
            _data_model: data_model,
            _core_module: core_module,
            _data_module: data_module,
            transport: config.transport(),
        })
    }

    /// Full lifecycle on the configured host and port.
    pub async fn run<F>(self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start()?.serve(shutdown).await
    }

    /// Full lifecycle on an already bound listener.
    pub async fn run_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start()?.serve_on(listener, shutdown).await
    }
}

/// An engine whose worker threads are running.
///
/// Fields drop in declaration order: the context goes before the modules
/// that produced it.
pub struct RunningEngine {
    context: Arc<dyn ExecutionContext>,
    _data_model: Arc<dyn DataModel>,
    _core_module: Box<dyn CoreModule>,
    _data_module: Box<dyn DataModule>,
    transport: TransportConfig,
}

impl RunningEngine {
    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.context
    }

    /// Bind the configured address and serve (step 11), then shut down
    /// (step 12). A bind failure still shuts down.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        let served = match RestServer::bind(&self.transport, self.context.clone()).await {
            Ok(server) => server.serve_until(shutdown).await,
            Err(err) => Err(err),
        };
        self.finish(served)
    }

    /// Serve on `listener` (step 11), then shut down (step 12).
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        let served = match RestServer::from_listener(listener, self.context.clone()) {
            Ok(server) => server.serve_until(shutdown).await,
            Err(err) => Err(err),
        };
        self.finish(served)
    }

    /// Terminate worker threads (step 12).
    pub fn shutdown(self) -> Result<(), LifecycleError> {
        self.terminate()
    }

    fn finish(self, served: Result<(), TransportError>) -> Result<(), LifecycleError> {
        if let Err(err) = &served {
            error!("HTTP listener failed: {err}");
        }
        let terminated = self.terminate();
        match (served, terminated) {
            (Err(listener), Err(terminate)) => {
                warn!("{terminate}");
                Err(listener.into())
            }
            (Err(listener), Ok(())) => Err(listener.into()),
            (Ok(()), result) => result,
        }
    }

    fn terminate(self) -> Result<(), LifecycleError> {
        info!("terminating worker threads");
        self.context
            .terminate_all_threads()
            .step(StartupStep::TerminateThreads)
    }
}

fn forward_storage_log(message: &str, subsystem: &str, level: LogLevel) {
    match level {
        LogLevel::FatalError | LogLevel::CriticalError => {
            error!(target: "mc_server::storage", subsystem, "{message}")
        }
        LogLevel::Warning => warn!(target: "mc_server::storage", subsystem, "{message}"),
        LogLevel::Message | LogLevel::Info => {
            info!(target: "mc_server::storage", subsystem, "{message}")
        }
        LogLevel::Debug => debug!(target: "mc_server::storage", subsystem, "{message}"),
    }
}

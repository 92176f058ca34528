//! mcserver: machine control management server.
//!
//! Reads `amc_server.xml` from the working directory, brings up the selected
//! engine, and serves its REST API until Ctrl+C.
//!
//! Usage:
//!   mcserver                                  # amc_server.xml, dev engine
//!   mcserver --config /etc/amc/server.xml     # Custom configuration file
//!   mcserver --engine dev --verbose           # Explicit engine, debug logging
//!   mcserver --log-file                       # Log to ./mcserver.log

use std::path::PathBuf;

use clap::Parser;
use mc_server::{ConfigResolver, EngineCatalog, EngineLifecycle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcserver", version, about = "Machine control management server")]
struct Cli {
    /// Server configuration file, relative to the working directory
    #[arg(long, default_value = "amc_server.xml")]
    config: PathBuf,

    /// Engine to run
    #[arg(long, default_value = "dev")]
    engine: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to mcserver.log if no path given)
    #[arg(long, default_missing_value = "mcserver.log", num_args = 0..=1)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> std::io::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(log_path) = &cli.log_file {
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = ConfigResolver::from_current_dir()?;
    let config = resolver.resolve(&cli.config)?;
    info!(
        package = %config.package_name,
        data = %config.data_directory.display(),
        "configuration loaded from {}",
        resolver.absolutize(&cli.config).display()
    );

    let catalog = EngineCatalog::with_factories(mc_engines::builtin());
    let factory = catalog.get(&cli.engine)?;

    EngineLifecycle::new(config, factory)
        .run(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }

    info!("mcserver {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }

    info!("Server stopped.");
}

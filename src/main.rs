//! Volume Orchestrator daemon
//!
//! Bootstraps the orchestrator from the configured persistence client and
//! serves the REST API. Frontends (CSI sidecars, platform controllers,
//! volcli) talk to this process.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_orchestrator::api::{ApiServer, ApiServerConfig};
use volume_orchestrator::persistence::{Client, InMemoryStore, PassthroughStore};
use volume_orchestrator::{Error, Orchestrator, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Orchestrator - storage provisioning across NAS/SAN backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    api_addr: String,

    /// Persistence client kind (memory, passthrough)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    store: String,

    /// Backend config file or directory for the passthrough store
    #[arg(long, env = "PASSTHROUGH_CONFIG")]
    passthrough_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Volume Orchestrator");
    info!("  Version: {}", volume_orchestrator::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Store: {}", args.store);

    register_metrics();

    let store: Arc<dyn Client> = match args.store.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "passthrough" => {
            let config_path = args.passthrough_config.as_deref().ok_or_else(|| {
                Error::InvalidInput(
                    "--passthrough-config is required with the passthrough store".into(),
                )
            })?;
            Arc::new(PassthroughStore::new(config_path)?)
        }
        other => {
            return Err(Error::InvalidInput(format!("unknown store type: {}", other)));
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(store));
    orchestrator.bootstrap().await?;
    info!("Orchestrator bootstrapped");

    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::InvalidInput(format!("invalid REST API address: {}", e)))?,
        ..Default::default()
    };
    let api_server = ApiServer::new(api_config, orchestrator);
    api_server.run().await?;

    info!("Orchestrator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("tower=warn".parse().expect("static directive"))
        .add_directive("axum=info".parse().expect("static directive"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics
// =============================================================================

fn register_metrics() {
    let _ = prometheus::register_gauge!(
        "volume_orchestrator_backends_total",
        "Number of managed backends"
    );
    let _ = prometheus::register_gauge!(
        "volume_orchestrator_volumes_total",
        "Number of managed volumes"
    );
    let _ = prometheus::register_counter!(
        "volume_orchestrator_provisions_total",
        "Total number of volume provisions"
    );
    let _ = prometheus::register_histogram!(
        "volume_orchestrator_provision_duration_seconds",
        "Duration of provision operations"
    );
}

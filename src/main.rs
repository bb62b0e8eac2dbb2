//! Ticketing SOAP gateway binary.
//!
//! Run with: `ticket-soap-gateway --config config.yaml`
//!
//! Credentials are read from the environment (`USER_NAME` / `PASSWORD` by
//! default); a `.env` file in the working directory is honored.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use ticket_soap_gateway::{
    router, ClientFactory, Credentials, Endpoints, Gateway, GatewayConfig, OperationRegistry,
    SoapPipeline,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// JSON gateway for the ticketing SOAP services.
///
/// Every route is bound to one remote operation of the schedule or sale
/// service; parameters are passed through by name and results come back
/// as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address, overrides settings.listen_address
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // A missing .env is fine; the environment may already be set.
    let dotenv = dotenvy::dotenv().ok();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting ticketing SOAP gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());
    if let Some(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let config: GatewayConfig = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        GatewayConfig::default()
    };
    config.validate().context("Invalid configuration")?;

    let credentials = Credentials::from_env(&config.credentials);
    if !credentials.is_complete() {
        // Not fatal: every call will fail with a configuration error until fixed.
        warn!(
            username_var = %config.credentials.username_var,
            password_var = %config.credentials.password_var,
            "Service credentials are not set"
        );
    }

    let registry = OperationRegistry::builtin()
        .merge(config.routes.clone())
        .filter(&config.operations);

    info!(
        schedule = %config.endpoints.schedule,
        sale = %config.endpoints.sale,
        routes = registry.len(),
        request_timeout_secs = config.settings.request_timeout_secs,
        operations_control = config.operations.enabled,
        "Configuration loaded"
    );

    let factory = ClientFactory::from_settings(&config.settings)
        .context("Failed to build HTTP client")?;
    let pipeline = SoapPipeline::new(
        factory,
        Endpoints::from_config(&config, &credentials),
        config.settings.request_timeout(),
    );
    let gateway = Arc::new(Gateway::new(Arc::new(pipeline), registry));
    let app = router(gateway, config.settings.max_body_size);

    let listen = args
        .listen
        .unwrap_or_else(|| config.settings.listen_address.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    info!("Listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Gateway stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}

//! Elastauth gateway entry point.
//!
//! # Responsibilities
//!
//! - Parse CLI arguments and environment variables (via Clap)
//! - Load configuration from file, environment, and CLI overrides
//! - Run the single configuration validation pass
//! - Initialize logging, metrics, and application state
//! - Start the HTTP server and wait for shutdown
//!
//! # Exit codes
//!
//! Stable across a release:
//! - `0` - clean shutdown
//! - `2` - configuration loading or validation failure
//! - `3` - unrecoverable startup error (OIDC discovery, TLS material,
//!   cache backend unreachable)

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use elastauth::config::{ElastauthConfig, OperationMode, validate};
use elastauth::server::service::start;
use elastauth::state::GatewayState;

/// Exit code for configuration failures.
const EXIT_CONFIG: i32 = 2;
/// Exit code for post-validation startup failures.
const EXIT_STARTUP: i32 = 3;

/// CLI arguments definition for the elastauth gateway.
///
/// Field documentation is used by Clap to generate help text, so keep it
/// in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "elastauth", version, about = "Elasticsearch authentication gateway", long_about = None)]
struct Args {
    /// Config file path (overrides default path and ELASTAUTH_CONFIG_PATH)
    #[arg(long = "config-file", value_name = "FILE", env = "ELASTAUTH_CONFIG_PATH")]
    config_file: Option<std::path::PathBuf>,

    /// Operation mode override (forward-auth or direct-auth)
    #[arg(
        long = "operation-mode",
        value_name = "MODE",
        env = "ELASTAUTH_OPERATION_MODE",
        value_enum
    )]
    operation_mode: Option<OperationMode>,

    /// Listener bind address override (optional)
    #[arg(
        long = "bind-address",
        value_name = "BIND_ADDRESS",
        env = "ELASTAUTH_BIND_ADDRESS",
        required = false
    )]
    bind_address: Option<String>,

    /// Mint credentials without writing users to Elasticsearch
    #[arg(long = "dry-run", env = "ELASTAUTH_DRY_RUN", default_value = "false")]
    dry_run: bool,
}

/// Main entry point for the elastauth gateway.
///
/// Orchestrates the complete startup sequence: argument parsing,
/// configuration loading and validation, state wiring (including OIDC
/// discovery in direct-auth mode), and server startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).compact();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    // Load configuration from file, environment, and CLI overrides
    let config = match ElastauthConfig::load_with_overrides(
        args.config_file.clone(),
        args.operation_mode,
        args.bind_address.clone(),
        args.dry_run,
    ) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // Single validation pass; the first violated rule is terminal.
    if let Err(e) = validate::validate(&config) {
        tracing::error!("{e}");
        std::process::exit(EXIT_CONFIG);
    }

    tracing::info!(
        mode = config.mode().as_str(),
        base_path = %config.base_path,
        dry_run = config.dry_run,
        "configuration validated"
    );

    // Initialize metrics collection if enabled
    elastauth::metrics::init();

    // Initialize AWS-LC cryptographic provider for TLS
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install AWS-LC provider");

    // Wire application state; direct-auth runs OIDC discovery here.
    let state: Arc<GatewayState> = match GatewayState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    // Serve until shutdown
    match start(state).await {
        Ok(_) => tracing::debug!("Server has exited"),
        Err(e) => {
            tracing::error!("Server execution failed: {:?}", e);
            std::process::exit(EXIT_STARTUP);
        }
    }

    Ok(())
}

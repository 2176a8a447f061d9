use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use modkit_bootstrap::{AppConfig, CliArgs};

// Ensure every worked-example module is linked so its `#[module]`-generated
// installer gets submitted to the process-wide inventory; nothing else in
// this crate references these types directly.
#[allow(dead_code)]
fn ensure_modules_linked() {
    let _ = std::any::type_name::<cache_report::Cache>();
    let _ = std::any::type_name::<cache_report::Report>();
}

/// HyperSpot Server - modular application framework host.
#[derive(Parser)]
#[command(name = "hyperspot-server")]
#[command(about = "HyperSpot Server - modular application framework host")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config: defaults -> YAML (if provided) -> env (APP__*) -> CLI
    // overrides. Also normalizes + creates server.home_dir.
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    modkit_bootstrap::logging::init_logging_unified(&logging_config, Path::new(&config.server.home_dir));

    tracing::info!("HyperSpot Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing modules…");

    let runtime = modkit::Runtime::new();
    modkit::install_all(&runtime.registry, &runtime.actions, &runtime.bus)
        .context("failed to install modules")?;
    config
        .register_namespaces(&runtime.registry)
        .context("failed to register configuration namespaces")?;
    config
        .register_env(&runtime.registry)
        .context("failed to register the env scalar")?;

    runtime.start().await.context("lifecycle setup / init context failed")?;

    let router = modkit_http::build_router(
        runtime.clone(),
        modkit_http::RewriteTable::new(),
        Duration::from_secs(config.server.timeout_sec.max(5)),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(err) = modkit_bootstrap::signals::wait_for_shutdown().await {
            tracing::error!(%err, "error while waiting for shutdown signal");
        }
    });

    let result = server.await.context("HTTP server error");

    tracing::info!("Shutting down…");
    runtime.shutdown().await;

    result
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

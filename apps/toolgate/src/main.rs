//! Toolgate daemon
//!
//! Runs the gateway on the local network with a terminal approval prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use toolgate_core::config::DEFAULT_SERVICE_TYPE;
use toolgate_core::{GatewayConfig, ProviderKind, TrustStore};
use toolgate_gateway::{
    browse, DependenciesBuilder, GatewayServer, MdnsAdvertiser, NoopAdvertiser, ServiceAdvertiser,
};

mod prompt;
mod system;

use prompt::TerminalPrompt;

/// Command-line interface for the `toolgate` daemon.
#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "Local-network MCP gateway")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "TOOLGATE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs the gateway until Ctrl-C (default).
    Serve,
    /// Lists gateways advertised on the local network.
    Browse {
        /// DNS-SD service type to look for
        #[arg(long, default_value = DEFAULT_SERVICE_TYPE)]
        service_type: String,
        /// How long to listen for answers
        #[arg(long, value_name = "SECS", default_value_t = 3)]
        wait: u64,
    },
}

/// Logs directory (under the local data directory)
fn get_logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("toolgate")
        .join("logs")
}

/// Initialize tracing with console and file logging
///
/// - Console: colored, compact format
/// - File: daily rotation under the local data directory
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    dotenvy::dotenv().ok();

    let logs_dir = get_logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // Creates files like: toolgate.2026-10-18.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("toolgate")
        .filename_suffix("log")
        .build(&logs_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG takes precedence
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("info,toolgate=debug,toolgate_core=debug,toolgate_gateway=debug")
    })?;

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Explicit path, then `<config_dir>/toolgate/config.json`, then defaults
async fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    if let Some(path) = path {
        return GatewayConfig::load(&path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()));
    }

    let default_path = dirs::config_dir().map(|dir| dir.join("toolgate").join("config.json"));
    match default_path {
        Some(path) if path.exists() => GatewayConfig::load(&path)
            .await
            .with_context(|| format!("Failed to load {}", path.display())),
        _ => {
            info!("No config file found, using defaults");
            Ok(GatewayConfig::default())
        }
    }
}

fn advertiser() -> Arc<dyn ServiceAdvertiser> {
    match MdnsAdvertiser::new() {
        Ok(advertiser) => Arc::new(advertiser),
        Err(e) => {
            warn!(error = %e, "DNS-SD unavailable, the gateway will not be advertised");
            Arc::new(NoopAdvertiser)
        }
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let trust = TrustStore::load(config.trust_store_path())
        .await
        .context("Failed to load trusted clients")?;

    let dependencies = DependenciesBuilder::new()
        .with_approval_prompt(Arc::new(TerminalPrompt::new()))
        .with_trust_store(Arc::new(trust))
        .with_advertiser(advertiser())
        .with_builtin(system::provider())
        .build()
        .map_err(anyhow::Error::msg)?;

    let gateway = GatewayServer::new(config.clone(), dependencies);

    let mut events = gateway.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            debug!(event = event.type_name(), %payload, "Gateway event");
        }
    });

    gateway.apply_servers(&config.servers).await;

    // Remotes come up on their own; local servers are started here
    let subprocesses: Vec<_> = gateway
        .registry()
        .entries()
        .iter()
        .filter(|entry| entry.kind() == ProviderKind::Subprocess)
        .map(|entry| (entry.id.clone(), entry.info.display_name.clone()))
        .collect();
    for (id, name) in subprocesses {
        match gateway.activate_provider(&id).await {
            Ok(()) => info!(provider_id = %id, name = %name, "Server started"),
            Err(e) => warn!(provider_id = %id, name = %name, error = %e, "Server failed to start"),
        }
    }

    let port = gateway.start().await.context("Failed to start listener")?;
    info!(
        port,
        instance = %config.instance_name,
        tools = gateway.visible_tools().len(),
        "Toolgate is listening; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    gateway.stop().await;
    Ok(())
}

async fn run_browse(service_type: &str, wait: Duration) -> Result<()> {
    let found = browse(service_type, wait).await?;
    if found.is_empty() {
        println!("No gateways found for {}", service_type);
        return Ok(());
    }
    for gateway in found {
        let addresses: Vec<String> = gateway.addresses.iter().map(ToString::to_string).collect();
        println!(
            "{}\t{}:{}\t{}",
            gateway.fullname,
            gateway.host,
            gateway.port,
            addresses.join(", ")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive for the entire program - dropping it stops file logging
    let _log_guard = init_tracing()?;
    info!("Starting Toolgate v{}", env!("CARGO_PKG_VERSION"));
    info!("Logs directory: {}", get_logs_dir().display());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(load_config(cli.config).await?).await,
        Commands::Browse { service_type, wait } => {
            run_browse(&service_type, Duration::from_secs(wait)).await
        }
    }
}

//! agentd
//!
//! Command-line host for agent plugins.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use agentd::config::{AgentdConfig, DEFAULT_CONFIG_FILE, LogFormat};
use agentd::{build_factory, build_loader, logging, start_agents};

/// Agent plugin host
#[derive(Parser, Debug)]
#[command(name = "agentd")]
#[command(about = "Load, host and call agent plugins", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Plugin directory, overrides the configuration
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Log output format, overrides the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the plugins found in the plugin directory
    Discover,

    /// Host a plugin, call one method and print the result
    Call {
        agent_id: String,
        plugin: String,
        method: String,
        /// Parameters; anything that is not JSON is passed as a string
        args: Vec<String>,
        #[arg(long)]
        version: Option<String>,
    },

    /// Host the configured agents until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AgentdConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(dir) = args.plugins_dir {
        config.loader.plugins_dir = dir;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }

    logging::init(&config.log);
    info!("Starting agentd v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Discover => discover(&config).await,
        Command::Call {
            agent_id,
            plugin,
            method,
            args,
            version,
        } => call(&config, &agent_id, &plugin, version.as_deref(), &method, &args).await,
        Command::Serve => serve(&config).await,
    }
}

async fn discover(config: &AgentdConfig) -> Result<()> {
    let loader = build_loader(&config.loader);
    let found = loader.discover().await?;

    if found.is_empty() {
        println!("No plugins in {}", config.loader.plugins_dir.display());
        return Ok(());
    }
    for descriptor in found {
        println!("{:<24} {}", descriptor.key(), descriptor.description);
        for (key, value) in &descriptor.capabilities {
            println!("{:<24}   {} = {}", "", key, value);
        }
    }
    Ok(())
}

fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn call(
    config: &AgentdConfig,
    agent_id: &str,
    plugin: &str,
    version: Option<&str>,
    method: &str,
    raw_params: &[String],
) -> Result<()> {
    let factory = build_factory(config);
    let host = factory.create(agent_id, plugin, version, None).await?;

    let params = raw_params.iter().map(|raw| parse_param(raw)).collect();
    let result = host.call_method(method, params).await;
    factory.dispose_all().await;

    let value = result.with_context(|| format!("{}.{} failed", plugin, method))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn serve(config: &AgentdConfig) -> Result<()> {
    let factory = build_factory(config);
    let handles = start_agents(&factory, &config.agents).await?;

    if handles.is_empty() {
        info!("No agents configured");
    } else {
        info!("Hosting agents:");
        for handle in &handles {
            info!("  - {} ({})", handle.host_id(), handle.phase());
        }
    }

    shutdown_signal().await;
    factory.dispose_all().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

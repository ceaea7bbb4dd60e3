use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{
    error,
    info,
};
use orchestrator_core::{
    config::{
        ConfigOverrides,
        OrchestratorConfig,
    },
    orchestrator::Orchestrator,
};

/// Orchestrator Core: a WebSocket hub mediating agents, services, and clients
/// (spec §1/§6). Flags beat environment variables, which beat the config
/// file, which beats built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "orchestrator", about = "Orchestrator Core message-routing hub")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port agents connect on.
    #[arg(long = "agentPort", env = "PORT", value_name = "PORT")]
    agent_port: Option<u16>,

    /// Port clients connect on.
    #[arg(long = "clientPort", env = "CLIENT_PORT", value_name = "PORT")]
    client_port: Option<u16>,

    /// Port services connect on.
    #[arg(long = "servicePort", env = "SERVICE_PORT", value_name = "PORT")]
    service_port: Option<u16>,

    /// Log level passed through to `env_logger` (error, warn, info, debug, trace).
    #[arg(long = "logLevel", env = "LOG_LEVEL", value_name = "LEVEL")]
    log_level: Option<String>,
}

impl From<Cli> for ConfigOverrides {
    fn from(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            agent_port: cli.agent_port,
            client_port: cli.client_port,
            service_port: cli.service_port,
            log_level: cli.log_level,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides: ConfigOverrides = cli.into();

    let config = match OrchestratorConfig::load(&overrides) {
        Ok(config) => config,
        Err(err) => {
            // The logger isn't initialized yet; a bad config is reported on
            // stderr directly rather than swallowed by a silent filter.
            eprintln!("failed to load configuration: {err:#}");
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    info!(
        "starting orchestrator: agentPort={} clientPort={} servicePort={}",
        config.agent_port, config.client_port, config.service_port
    );

    let orchestrator = Orchestrator::new(&config).await;
    let handle = match orchestrator.start(&config).await {
        Ok(handle) => handle,
        Err(err) => {
            error!("failed to start orchestrator: {err:#}");
            std::process::exit(1);
        }
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping orchestrator");

    if let Err(err) = handle.stop().await {
        error!("error during shutdown: {err:#}");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{
        signal,
        SignalKind,
    };

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

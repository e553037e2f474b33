//! `service-group` binary.
//!
//! Loads configuration, starts one HTTP listener per configured address and
//! keeps them running until one fails or the process receives SIGINT/SIGTERM.
//! Exits `0` after a requested shutdown and `1` after a fault.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use service_group::config::{self, AppConfig, ConfigError, ListenerConfig};
use service_group::lifecycle::build_supervisor;
use service_group::observability::init_logging;

#[derive(Parser, Debug)]
#[command(name = "service-group", version)]
#[command(about = "Run a group of HTTP listeners that start and stop together", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address; repeat for several listeners. Replaces configured listeners.
    #[arg(short, long = "listen", value_name = "ADDR")]
    listen: Vec<String>,

    /// Grace period for draining listeners, in milliseconds.
    #[arg(long, value_name = "MS")]
    grace_period_ms: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => AppConfig::default(),
        };

        if !self.listen.is_empty() {
            config.listeners = self.listen.iter().map(ListenerConfig::new).collect();
        }
        if let Some(grace) = self.grace_period_ms {
            config.supervisor.grace_period_ms = grace;
        }

        config::validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("service-group: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("service-group: failed to initialize logging: {err}");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listeners = config.listeners.len(),
        grace_period_ms = config.supervisor.grace_period_ms,
        "service-group starting"
    );

    let supervisor = build_supervisor(&config);
    match supervisor.run().await {
        Ok(signal) => {
            tracing::info!(%signal, "Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Exiting after fault");
            ExitCode::FAILURE
        }
    }
}

//! VPP configuration agent
//!
//! Reconciles the dataplane against a YAML desired-state file and keeps it
//! reconciled: periodic downstream resync, retry of failed items, and reload
//! on SIGHUP.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use vpp_binapi::Dialect;
use vppagent::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use vppagent::daemon::Agent;
use vppagent::logging::{init_tracing, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "vppagent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Agent configuration file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Desired-state file, overrides the configuration
    #[arg(short, long)]
    desired: Option<PathBuf>,

    /// VPP binary API socket, overrides the configuration
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Run against a simulated dataplane of this release (vpp1908, vpp2001)
    #[arg(long)]
    simulate: Option<Dialect>,

    /// Log level or filter directives (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Reconcile once and exit; the exit status reports whether every item
    /// was applied
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = AgentConfig::load_or_default(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(desired) = &self.desired {
            config.agent.desired_path = desired.clone();
        }
        if let Some(socket) = &self.socket {
            config.connection.socket_path = socket.clone();
        }
        if self.simulate.is_some() {
            config.connection.simulate = self.simulate;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, cli.log_format) {
        eprintln!("vppagent: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "vppagent exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.load_config()?;
    info!(
        config = %cli.config.display(),
        desired = %config.agent.desired_path.display(),
        socket = %config.connection.socket_path.display(),
        "starting vppagent"
    );

    let agent = Agent::connect(config)
        .await
        .context("connecting to VPP")?;

    if cli.once {
        let result = agent.full_resync().await.context("resync")?;
        return Ok(if result.is_success() && result.pending_keys().is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    agent.run().await.context("reconciliation loop")?;
    info!("vppagent exiting normally");
    Ok(ExitCode::SUCCESS)
}

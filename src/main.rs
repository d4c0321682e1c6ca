use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mutuelle_sync::config::{default_config_path, ResolvedConfig};
use mutuelle_sync::connector::{Connector, ConnectorSettings, RunOptions};
use mutuelle_sync::interception::InterceptionRegistry;
use mutuelle_sync::portal::{ChromePortal, ChromeSettings};
use mutuelle_sync::run_state::RunStateStore;
use mutuelle_sync::sink::JsonFileSink;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mutuelle-sync")]
#[command(about = "Fetch identity and reimbursement statements from La Mutuelle Générale")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, save the identity and fetch new statements
    Run {
        /// Fetch every month whatever the last run says
        #[arg(long)]
        full: bool,

        /// Stop after saving the identity
        #[arg(long)]
        identity_only: bool,
    },
    /// Log in interactively and save the credentials
    Login,
    /// Show current configuration
    Config,
    /// Show the last run of each account
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .json()
    });
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn launch(config: &ResolvedConfig) -> Result<Connector<ChromePortal>> {
    let registry = Arc::new(InterceptionRegistry::new());
    let settings = ChromeSettings {
        chrome_path: config.portal.chrome_path.clone(),
        headless: config.portal.headless,
        profile_dir: config.portal.profile_dir.clone(),
        poll_interval: config.timeouts.poll_interval,
    };
    let portal = ChromePortal::launch(&settings, registry.clone()).await?;

    let credentials = Arc::from(config.credentials.build());
    let sink = Arc::new(JsonFileSink::new(&config.data_dir));
    Ok(Connector::new(portal, registry, credentials, sink, RunStateStore::new()?)
        .with_settings(ConnectorSettings::from_config(config)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = ResolvedConfig::load_or_default(&cli.config)?;

    match cli.command {
        Command::Run { full, identity_only } => {
            let connector = launch(&config).await?;
            let result = connector
                .run(RunOptions {
                    force_full_fetch: full,
                    identity_only,
                })
                .await;
            connector.into_portal().close().await?;

            match result {
                Ok(report) => {
                    info!(account = %report.account, "run finished");
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "run failed");
                    return Err(err);
                }
            }
        }
        Command::Login => {
            let connector = launch(&config).await?;
            let result = connector.login().await;
            connector.into_portal().close().await?;
            result?;
            println!("Logged in.");
        }
        Command::Config => {
            println!("Config file: {}", cli.config.display());
            println!("Data directory: {}", config.data_dir.display());
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
        }
        Command::Status => {
            let runs = RunStateStore::new()?.list()?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for (account, last) in runs {
                match &last.error {
                    Some(err) => println!("{account}  {}  {}  {err}", last.at.to_rfc3339(), last.outcome),
                    None => println!("{account}  {}  {}", last.at.to_rfc3339(), last.outcome),
                }
            }
        }
    }

    Ok(())
}

//! R-Oracle dashboard
//!
//! Main entry point for the `roracle` command

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roracle_chain::{ChainConnection, OracleApi, PalletClient, RemoteSigner, WsConnector};
use roracle_core::Settings;
use roracle_dashboard::{load_data, submit_and_reload, Renderer};
use roracle_price_feed::PriceFetcher;

#[derive(Parser)]
#[command(name = "roracle", version, about = "R-Oracle chain dashboard")]
struct Cli {
    /// Configuration file (defaults to ./roracle.toml when present)
    #[arg(short, long, env = "RORACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of the text view
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a BTC/USD price through the source cascade without submitting
    Price,
    #[command(flatten)]
    Chain(ChainCommand),
}

/// Commands that need the chain connection
#[derive(Subcommand)]
enum ChainCommand {
    /// Connection state, last oracle value and recent history
    Status {
        #[arg(short, long)]
        limit: Option<u64>,
    },
    /// Recent oracle history, most recent first
    History {
        #[arg(short, long)]
        limit: Option<u64>,
    },
    /// Fetch a price and submit it to the oracle pallet
    Submit {
        /// Status label stored with the value
        #[arg(long, default_value = "success")]
        status: String,

        /// Signing service endpoint
        #[arg(long, env = "RORACLE_SIGNER_URL")]
        signer_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    info!("Starting R-Oracle dashboard v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let output = Output {
        json: cli.json,
        renderer: Renderer::new(!cli.no_color),
    };

    let command = match cli.command {
        Some(Command::Price) => return price(&settings, &output).await,
        Some(Command::Chain(command)) => command,
        None => ChainCommand::Status { limit: None },
    };

    let connection = Arc::new(ChainConnection::from_settings(&settings.chain));

    let result = tokio::select! {
        result = run(command, &settings, Arc::clone(&connection), &output) => result,
        _ = shutdown_signal() => Ok(()),
    };

    // The socket is released on every exit path
    connection.disconnect().await;

    info!("Shutdown complete");
    result
}

struct Output {
    json: bool,
    renderer: Renderer,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&Renderer) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(&self.renderer));
        }
        Ok(())
    }
}

async fn price(settings: &Settings, output: &Output) -> Result<()> {
    let fetcher = PriceFetcher::from_settings(&settings.price_feed)?;
    let quote = fetcher
        .fetch_price()
        .await
        .context("Failed to fetch oracle price")?;

    output.emit(&quote, |r| r.quote(&quote))
}

async fn run(
    command: ChainCommand,
    settings: &Settings,
    connection: Arc<ChainConnection<WsConnector>>,
    output: &Output,
) -> Result<()> {
    let pallet = PalletClient::connect(
        Arc::clone(&connection),
        &settings.chain.pallet_name,
        settings.chain.pallet_index,
    )
    .await?;

    if !output.json {
        let url = connection.current().map(|handle| handle.url().to_string());
        println!("{}\n", output.renderer.connection(connection.status(), url.as_deref()));
    }

    let default_limit = settings.dashboard.history_limit;

    match command {
        ChainCommand::Status { limit } => {
            let data = load_data(&pallet, limit.unwrap_or(default_limit)).await?;
            output.emit(&data, |r| {
                format!("{}\n{}", r.last_value(data.last.as_ref()), r.history(&data.history))
            })
        }
        ChainCommand::History { limit } => {
            let history = pallet.history(limit.unwrap_or(default_limit)).await?;
            output.emit(&history, |r| r.history(&history))
        }
        ChainCommand::Submit { status, signer_url } => {
            let signer_url = signer_url
                .or_else(|| settings.dashboard.signer_url.clone())
                .context("No signer configured: pass --signer-url or set dashboard.signer_url")?;

            let signer = RemoteSigner::new(signer_url, settings.chain.request_timeout())?;
            let fetcher = PriceFetcher::from_settings(&settings.price_feed)?;

            let (outcome, data) = submit_and_reload(
                &fetcher,
                &pallet,
                &signer,
                &status,
                Duration::from_millis(settings.dashboard.reload_delay_ms),
                default_limit,
            )
            .await?;

            output.emit(&outcome, |r| {
                format!(
                    "Transaction submitted: {}\n{}\n\n{}\n{}",
                    outcome.block_hash,
                    r.quote(&outcome.quote),
                    r.last_value(data.last.as_ref()),
                    r.history(&data.history)
                )
            })
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}

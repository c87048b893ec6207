//! Copywatch: real-time copy-trading position monitor.
//!
//! Scrapes the open positions of followed traders from a live web UI,
//! raises PnL growth alerts, and streams state to WebSocket clients.

mod analysis;
mod browser;
mod hub;
mod models;
mod scrape;
mod stores;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::analysis::{AnalysisService, HeuristicAnalysis};
use crate::browser::CdpConfig;
use crate::hub::{BroadcastHub, HubConfig};
use crate::scrape::{Supervisor, SupervisorConfig};
use crate::stores::{ClosedPositionStore, PortfolioStore};
use crate::tracker::{PositionTracker, TrackerConfig};

/// Copywatch CLI.
#[derive(Parser)]
#[command(name = "copywatch")]
#[command(about = "Monitor followed copy-trading accounts and stream live positions", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor pipeline
    Run {
        /// WebSocket listener address
        #[arg(short, long, default_value = "0.0.0.0:8765", env = "COPYWATCH_BIND")]
        bind: String,

        /// Shared client token; omit to disable authentication
        #[arg(long, env = "COPYWATCH_TOKEN")]
        auth_token: Option<String>,

        /// DevTools endpoint of the browser to drive
        #[arg(long, default_value = "http://127.0.0.1:9222", env = "COPYWATCH_DEVTOOLS")]
        devtools: String,

        /// Copy-trading portfolio page
        #[arg(
            long,
            default_value = "https://www.binance.com/en/copy-trading",
            env = "COPYWATCH_PORTFOLIO_URL"
        )]
        portfolio_url: String,

        /// Polling interval in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval: u64,

        /// Quick-gainer alert threshold in percent
        #[arg(long, default_value = "10", env = "COPYWATCH_GAINER_PCT")]
        gainer_threshold: f64,

        /// Explosion alert threshold in percent
        #[arg(long, default_value = "20", env = "COPYWATCH_EXPLOSION_PCT")]
        explosion_threshold: f64,

        /// Directory for the JSON ledgers
        #[arg(short, long, default_value = ".", env = "COPYWATCH_DATA_DIR")]
        data_dir: PathBuf,
    },

    /// Query a running instance's status endpoint
    Status {
        /// HTTP URL of the listener
        #[arg(short, long, default_value = "http://127.0.0.1:8765")]
        url: String,
    },

    /// Show the effective default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            bind,
            auth_token,
            devtools,
            portfolio_url,
            interval,
            gainer_threshold,
            explosion_threshold,
            data_dir,
        } => {
            run_pipeline(
                bind,
                auth_token,
                devtools,
                portfolio_url,
                interval,
                gainer_threshold,
                explosion_threshold,
                data_dir,
            )
            .await?;
        }

        Commands::Status { url } => {
            let body: serde_json::Value = reqwest::get(&url).await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Config => {
            let supervisor = SupervisorConfig::default();
            let hub = HubConfig::default();
            let tracker = TrackerConfig::default();

            println!("\n=== Scraper Configuration ===\n");
            println!("Portfolio URL:      {}", supervisor.portfolio_url);
            println!("DevTools Endpoint:  {}", supervisor.cdp.endpoint);
            println!("Poll Interval:      {}ms", supervisor.poll_interval.as_millis());
            println!("Error Backoff:      {}ms", supervisor.error_backoff.as_millis());
            println!("Housekeeping Every: {} cycles", supervisor.housekeeping_every);
            println!("Table Timeout:      {}s", supervisor.table_timeout.as_secs());

            println!("\n=== Alert Thresholds ===\n");
            println!("Quick Gainer:       {}%", tracker.quick_gainer_pct);
            println!("Explosion:          {}%", tracker.explosion_pct);

            println!("\n=== Hub Configuration ===\n");
            println!("Listener:           {}", hub.bind_addr);
            println!("Auth Timeout:       {}s", hub.auth_timeout.as_secs());
            println!("Shutdown Grace:     {}ms", hub.shutdown_grace.as_millis());
            println!("Max Clients:        {}", hub.max_clients);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    bind: String,
    auth_token: Option<String>,
    devtools: String,
    portfolio_url: String,
    interval: u64,
    gainer_threshold: f64,
    explosion_threshold: f64,
    data_dir: PathBuf,
) -> Result<()> {
    info!(
        bind = %bind,
        devtools = %devtools,
        interval_ms = interval,
        "Starting copywatch"
    );

    let tracker_config = TrackerConfig {
        quick_gainer_pct: Decimal::try_from(gainer_threshold)?,
        explosion_pct: Decimal::try_from(explosion_threshold)?,
    };

    let supervisor_config = SupervisorConfig {
        portfolio_url,
        poll_interval: Duration::from_millis(interval),
        cdp: CdpConfig {
            endpoint: devtools,
            ..CdpConfig::default()
        },
        ..SupervisorConfig::default()
    };

    let requires_auth = auth_token.is_some();
    let hub_config = HubConfig {
        bind_addr: bind.clone(),
        auth_token,
        ..HubConfig::default()
    };

    tokio::fs::create_dir_all(&data_dir).await.ok();
    let portfolio = Arc::new(PortfolioStore::load(data_dir.join("portfolio.json")).await);
    let closed = Arc::new(ClosedPositionStore::load(data_dir.join("closed_positions.json")).await);
    let analysis: Arc<dyn AnalysisService> = Arc::new(HeuristicAnalysis::default());

    let (supervisor, handle, mut snapshot_rx) = Supervisor::new(supervisor_config);

    let hub = Arc::new(BroadcastHub::new(
        hub_config,
        Arc::new(handle.clone()),
        portfolio,
        closed.clone(),
        analysis,
    ));

    // The hub serves regardless of whether the scraper manages to start.
    let hub_task = tokio::spawn(hub.clone().run());

    tokio::spawn(async move {
        if let Err(e) = supervisor.run().await {
            error!(error = %e, "Position source failed to start; hub keeps serving");
        }
    });

    // Snapshot pump: the tracker is owned here, and this is the only call
    // site of its update method.
    let pump_hub = hub.clone();
    let pump = tokio::spawn(async move {
        let mut tracker = PositionTracker::new(tracker_config);

        loop {
            match snapshot_rx.recv().await {
                Ok(snapshot) => {
                    let outcome = tracker.update(&snapshot);

                    for closed_position in &outcome.closed {
                        closed.record(closed_position).await;
                    }
                    for alert in &outcome.alerts {
                        pump_hub.publish_alert(alert);
                    }

                    pump_hub.publish_snapshot(snapshot).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Snapshot pump lagging, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("\n=== Copywatch Monitor ===");
    println!("Listener:  {}", bind);
    println!("Auth:      {}", if requires_auth { "token required" } else { "open" });
    println!("Interval:  {}ms", interval);
    println!("\nPress Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.stop().await;
    hub.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(2), hub_task).await;
    pump.abort();

    info!("Copywatch stopped");
    Ok(())
}

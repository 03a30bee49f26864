//! Delta Hedger - Main Entry Point
//!
//! Runs the monitoring scheduler against the IG gateway, or against the
//! in-memory mock for paper trading.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use delta_hedger::broker::{BrokerClient, IgClient, MarketSnapshot, MockBrokerClient};
use delta_hedger::config::{Config, SettingsStore};
use delta_hedger::hedger::DeltaHedger;
use delta_hedger::monitor::Monitor;
use delta_hedger::position::Position;
use delta_hedger::pricing::OptionType;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Delta Hedger CLI
#[derive(Parser)]
#[command(name = "delta-hedger")]
#[command(version, about = "Automated delta hedging for option positions")]
struct Cli {
    /// Trade against the in-memory mock broker with seeded demo data
    #[arg(long)]
    paper: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the aggregate portfolio delta and exit
    Summary,

    /// Hedge every open position once, regardless of threshold, and exit
    HedgeAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load()?;
    config.hedge.validate().context("invalid hedge settings")?;

    let broker: Arc<dyn BrokerClient> = if cli.paper {
        info!("paper trading mode, using the in-memory mock broker");
        let mock = MockBrokerClient::new();
        seed_demo_data(&mock, &config).await;
        Arc::new(mock)
    } else {
        warn!("live mode, orders will reach the IG gateway");
        let client = IgClient::new(config.ig.clone()).context("failed to build IG client")?;
        client.login().await.context("IG login failed")?;
        Arc::new(client)
    };

    let settings = Arc::new(
        SettingsStore::new(config.hedge.clone()).context("failed to initialize settings")?,
    );
    let hedger = Arc::new(DeltaHedger::new(broker, settings));
    let monitor = Monitor::new(Arc::clone(&hedger));

    match cli.command {
        Some(Commands::Summary) => {
            let summary = hedger.portfolio_summary().await?;
            info!(
                positions = summary.position_count,
                total_delta = summary.total_delta,
                needing_hedge = summary.positions_needing_hedge,
                unpriced = summary.unpriced_positions,
                "portfolio summary"
            );
            return Ok(());
        }
        Some(Commands::HedgeAll) => {
            let report = monitor.hedge_all().await?;
            info!(
                total = report.total(),
                failed = report.failed.len(),
                "manual hedge finished"
            );
            for failure in &report.failed {
                warn!(deal_id = %failure.deal_id, error = %failure.error, "hedge failed");
            }
            return Ok(());
        }
        None => {}
    }

    monitor
        .start_monitoring(
            config.hedge.hedge_interval_secs,
            config.hedge.delta_threshold,
        )
        .await?;
    info!(
        interval_secs = config.hedge.hedge_interval_secs,
        threshold = config.hedge.delta_threshold,
        "monitoring started, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    monitor.stop_monitoring().await;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();
}

/// Seed the mock broker with one long call and its market data so paper
/// trading has something to hedge.
async fn seed_demo_data(mock: &MockBrokerClient, config: &Config) {
    let underlying = config.ig.underlying_epic.clone();
    mock.set_positions(vec![Position {
        deal_id: "DEMO-1".to_string(),
        epic: "OP.D.SPX.5500C".to_string(),
        underlying_epic: underlying.clone(),
        option_type: OptionType::Call,
        strike: dec!(5500),
        expiry: Utc::now() + Duration::days(45),
        size: dec!(2),
        contract_size: dec!(1),
        entry_price: dec!(85),
    }])
    .await;
    mock.set_snapshot(MarketSnapshot {
        epic: underlying,
        bid: dec!(5554),
        offer: dec!(5556),
        volatility: Some(0.18),
        update_time: Some(Utc::now()),
    })
    .await;
    mock.set_snapshot(MarketSnapshot {
        epic: "OP.D.SPX.5500C".to_string(),
        bid: dec!(110),
        offer: dec!(114),
        volatility: None,
        update_time: Some(Utc::now()),
    })
    .await;
}

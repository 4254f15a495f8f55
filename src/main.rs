//! Signal Relay
//!
//! Receives trading signals on a webhook and executes them on Binance
//! USDT-M Futures: entry at market, then take-profit and stop-loss orders.

mod api;
mod config;
mod models;
mod monitor;
mod server;
mod trading;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::api::{BinanceClient, Exchange, Network};
use crate::config::{AppConfig, Overrides};
use crate::models::SignalSide;
use crate::monitor::PositionMonitor;
use crate::server::{SignalIntake, WebhookResponse, WebhookServer};
use crate::trading::{LevelSource, PositionTracker, SizingPolicy, TradeExecutor};

/// Webhook-to-Binance futures signal relay.
#[derive(Parser)]
#[command(name = "signal-relay")]
#[command(about = "Relay webhook trading signals to Binance USDT-M Futures", long_about = None)]
struct Cli {
    /// JSON config file (optional)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Append logs to this file as well as the console
    #[arg(long, default_value = "trades.log")]
    log_file: PathBuf,

    /// Log to the console only
    #[arg(long)]
    no_log_file: bool,

    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "BINANCE_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Use the futures testnet
    #[arg(long, env = "BINANCE_TESTNET", value_parser = BoolishValueParser::new())]
    testnet: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server and the account feed
    Serve {
        /// Listen address, e.g. 0.0.0.0:8002
        #[arg(long)]
        listen: Option<String>,
    },

    /// Check API connectivity and credentials
    Check {
        /// Symbol whose filters are printed
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
    },

    /// Post a test signal to a running relay
    Send {
        #[arg(short, long, default_value = "http://127.0.0.1:8002/webhook")]
        url: String,

        /// long or short
        #[arg(long, default_value = "long")]
        side: SignalSide,

        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Reference price the levels are computed from
        #[arg(short, long, default_value = "84583.8")]
        price: Decimal,

        #[arg(long, default_value = "100")]
        tp_offset: Decimal,

        #[arg(long, default_value = "50")]
        sl_offset: Decimal,

        /// Send the opposite side as well, 5 seconds later
        #[arg(long)]
        both: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file && matches!(cli.command, Commands::Serve { .. }))
        .then_some(cli.log_file.as_path());
    let _log_guard = init_logging(&cli.log_level, log_file)?;

    let mut config = AppConfig::load(&cli.config)?;
    config.apply(Overrides {
        api_key: cli.api_key.clone(),
        secret_key: cli.secret_key.clone(),
        testnet: cli.testnet,
        listen_addr: match &cli.command {
            Commands::Serve { listen } => listen.clone(),
            _ => None,
        },
    });

    match cli.command {
        Commands::Serve { .. } => serve(config).await?,

        Commands::Check { symbol } => {
            if !check_connection(&config, &symbol).await {
                bail!("Connection check failed");
            }
        }

        Commands::Send {
            url,
            side,
            symbol,
            price,
            tp_offset,
            sl_offset,
            both,
        } => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?;

            send_test_signal(&client, &url, side, &symbol, price, tp_offset, sl_offset).await?;
            if both {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let opposite = match side {
                    SignalSide::Long => SignalSide::Short,
                    SignalSide::Short => SignalSide::Long,
                };
                send_test_signal(&client, &url, opposite, &symbol, price, tp_offset, sl_offset).await?;
            }
        }

        Commands::Config => print_config(&config),
    }

    Ok(())
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn serve(config: AppConfig) -> Result<()> {
    let (api_key, api_secret) = config.credentials()?;
    let network = Network::from_testnet_flag(config.testnet);
    let client = Arc::new(BinanceClient::new(api_key, api_secret, network)?);

    if let Err(e) = client.sync_time().await {
        warn!(error = %e, "Server time sync failed, using local clock");
    }
    let balance = client
        .usdt_balance()
        .await
        .context("Failed to connect to Binance")?;
    info!(
        network = ?network,
        balance = %balance,
        leverage = config.trading.leverage,
        sizing = %config.trading.sizing,
        level_source = %config.trading.level_source,
        "Connected to Binance Futures"
    );

    let tracker = PositionTracker::new();
    let executor = Arc::new(TradeExecutor::new(
        client.clone(),
        config.trading.clone(),
        tracker.clone(),
    ));
    let intake = Arc::new(SignalIntake::new(executor));

    let (updates_tx, updates_rx) = mpsc::channel(64);
    let monitor = PositionMonitor::new(client.clone(), tracker.clone());
    let monitor_task = tokio::spawn(monitor.run(updates_rx));
    let stream_task = tokio::spawn(api::user_stream::run_user_stream(client.clone(), updates_tx));

    let server = WebhookServer::start(&config.listen_addr, intake)?;

    println!("\n=== Signal Relay ===");
    println!("Network:    {:?}", network);
    println!("Webhook:    POST http://{}/webhook", config.listen_addr);
    println!("Balance:    {} USDT", balance);
    println!("\nPress Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    server.shutdown().await;
    stream_task.abort();
    if let Err(e) = monitor_task.await {
        error!(error = %e, "Position monitor task failed");
    }

    let open = tracker.snapshot().await;
    if !open.is_empty() {
        println!("\nTracked positions left on the exchange:");
        for position in open {
            println!(
                "  {} {} {} (TP #{}, SL #{}, opened {})",
                position.symbol,
                position.side,
                position.quantity,
                position.take_profit_order_id,
                position.stop_loss_order_id,
                position.opened_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

async fn check_connection(config: &AppConfig, symbol: &str) -> bool {
    let network = Network::from_testnet_flag(config.testnet);
    println!("Testing Binance Futures connection ({:?})...", network);
    println!("API Key: {}", config.masked_api_key());

    match run_checks(config, network, symbol).await {
        Ok(()) => {
            println!("\nAll checks completed successfully!");
            true
        }
        Err(e) => {
            let message = format!("{:#}", e);
            println!("\nError: {}", message);

            if message.contains("API-key format invalid") {
                println!("\nTroubleshooting tips:");
                println!("1. Verify that the API key and secret are copied correctly");
                println!("2. Make sure there are no extra spaces or characters");
                println!("3. Try generating a new API key");
            } else if message.contains("Invalid API-key") {
                println!("\nTroubleshooting tips:");
                println!("1. Make sure the key belongs to the selected network (testnet keys do not work on mainnet)");
                println!("2. Check that the API key has futures trading permission");
                println!("3. Verify that IP restrictions allow this machine");
            } else if message.contains("Timestamp for this request") {
                println!("\nTroubleshooting tips:");
                println!("1. Synchronize the system clock (NTP)");
            }
            false
        }
    }
}

async fn run_checks(config: &AppConfig, network: Network, symbol: &str) -> Result<()> {
    let (api_key, api_secret) = config.credentials()?;
    let client = BinanceClient::new(api_key, api_secret, network)?;

    println!("\n1. Testing basic connection...");
    client.ping().await?;
    let offset = client.sync_time().await?;
    println!("   Connected (clock offset {} ms)", offset);

    println!("\n2. Getting account information...");
    let account = client.account().await?;
    println!("   Total Balance:     {} USDT", account.total_wallet_balance);
    println!("   Available Balance: {} USDT", account.available_balance);

    println!("\n3. Getting exchange information...");
    let info = client.exchange_info().await?;
    println!("   Number of trading pairs: {}", info.symbols.len());

    println!("\n4. {} filters:", symbol);
    let symbol_info = info
        .symbol(symbol)
        .with_context(|| format!("Symbol {} not found", symbol))?;
    let filters = symbol_info
        .trading_filters()
        .with_context(|| format!("{} has no PRICE_FILTER / LOT_SIZE", symbol))?;
    println!("   Tick size: {}", filters.tick_size);
    println!("   Step size: {}", filters.step_size);
    println!("   Min qty:   {}", filters.min_qty);
    println!("   Max qty:   {}", filters.max_qty);

    Ok(())
}

async fn send_test_signal(
    client: &reqwest::Client,
    url: &str,
    side: SignalSide,
    symbol: &str,
    price: Decimal,
    tp_offset: Decimal,
    sl_offset: Decimal,
) -> Result<()> {
    let (tp, sl) = match side {
        SignalSide::Long => (price + tp_offset, price - sl_offset),
        SignalSide::Short => (price - tp_offset, price + sl_offset),
    };

    println!("\nSending {} signal for {} with TP: {}, SL: {}", side, symbol, tp, sl);
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "side": side,
            "symbol": symbol,
            "tp": tp,
            "sl": sl,
        }))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    let body: WebhookResponse = response
        .json()
        .await
        .context("Unexpected webhook response")?;
    println!("Status Code: {}", status.as_u16());
    println!("Response: {} - {}", body.status, body.message);

    Ok(())
}

fn print_config(config: &AppConfig) {
    let trading = &config.trading;

    println!("\n=== Connection ===\n");
    println!("  Network:              {:?}", Network::from_testnet_flag(config.testnet));
    println!("  API Key:              {}", config.masked_api_key());
    println!("  Listen Address:       {}", config.listen_addr);

    println!("\n=== Trading Configuration ===\n");
    println!("Position Sizing:");
    match &trading.sizing {
        SizingPolicy::FixedNotional { usdt } => {
            println!("  Method:               Fixed notional");
            println!("  Margin per Trade:     ${} (whole balance if lower)", usdt);
        }
        SizingPolicy::BalanceFraction { fraction } => {
            println!("  Method:               Balance fraction");
            println!("  Fraction:             {}%", fraction * Decimal::from(100));
        }
    }
    println!("  Leverage:             {}x", trading.leverage);

    println!("\nProtective Orders:");
    println!("  Level Source:         {}", trading.level_source);
    if trading.level_source == LevelSource::Computed {
        println!("  Stop Loss:            {}%", trading.stop_loss_pct * Decimal::from(100));
        println!("  Risk/Reward:          1:{}", trading.risk_reward_ratio);
    }

    println!("\nSettlement Polling:");
    println!("  Initial Delay:        {}ms", trading.settle.initial_delay_ms);
    println!("  Max Delay:            {}ms", trading.settle.max_delay_ms);
    println!("  Max Attempts:         {}", trading.settle.max_attempts);
}

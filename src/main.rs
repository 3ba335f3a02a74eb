use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trigger_engine::api::FuturesClient;
use trigger_engine::config::Settings;
use trigger_engine::control::{self, OrderAccess};
use trigger_engine::execution::{
    ExchangeGateway, ExecutionCoordinator, PriceOracle, Scheduler, SymbolRulesCache, TriggerStore,
};
use trigger_engine::models::{
    ConditionalOrder, MarginType, OrderDraft, OrderPatch, OrderSide, OrderType,
};
use trigger_engine::persistence::{JsonOrderFile, OrdersLock, RuleCacheFile};
use trigger_engine::Error;

const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "trigger-engine", about = "Local conditional orders for USDⓈ-M futures")]
struct Cli {
    /// Settings file (defaults to ./trigger-engine.toml when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch prices and submit orders as triggers fire, serving the control API
    Run,
    /// Create a PENDING conditional order
    Add {
        symbol: String,
        side: OrderSide,
        #[arg(value_name = "TYPE")]
        order_type: OrderType,
        quantity: f64,
        trigger_price: f64,
        /// Limit price, required for STOP_LIMIT
        #[arg(long)]
        price: Option<f64>,
        #[arg(long, default_value = "")]
        remark: String,
        #[arg(long)]
        leverage: Option<u32>,
        #[arg(long)]
        margin_type: Option<MarginType>,
    },
    /// Show stored orders
    List {
        /// Only PENDING and TRIGGERED
        #[arg(long)]
        active: bool,
    },
    /// Change a PENDING order (remark may change at any time)
    Edit {
        id: u64,
        #[arg(long)]
        quantity: Option<f64>,
        #[arg(long)]
        trigger_price: Option<f64>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        remark: Option<String>,
    },
    /// Cancel a PENDING order, or with --remote the exchange order of an executed one
    Cancel {
        id: u64,
        #[arg(long)]
        remote: bool,
    },
    /// Remove a finished order
    Delete { id: u64 },
    /// Show trading rules for a symbol
    Rules { symbol: String },
    /// Show the latest price for a symbol
    Price { symbol: String },
    /// List resting orders on the exchange
    OpenOrders { symbol: Option<String> },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    setup_logging(&settings.log_filter);

    match cli.command {
        Command::Run => run(&settings).await,
        Command::Add {
            symbol,
            side,
            order_type,
            quantity,
            trigger_price,
            price,
            remark,
            leverage,
            margin_type,
        } => {
            let access = open_access(&settings)?;
            let draft = OrderDraft {
                order_price: price,
                leverage,
                margin_type,
                ..OrderDraft::new(symbol, side, order_type, quantity, trigger_price)
            }
            .with_remark(remark);
            let id = access.create(draft).await?;
            println!("Created conditional order {}", id);
            Ok(())
        }
        Command::List { active } => {
            let access = open_access(&settings)?;
            print_orders(&access.list(active).await?);
            Ok(())
        }
        Command::Edit {
            id,
            quantity,
            trigger_price,
            price,
            remark,
        } => {
            let access = open_access(&settings)?;
            let patch = OrderPatch {
                quantity,
                trigger_price,
                order_price: price,
                remark,
            };
            ensure_found(id, access.update_fields(id, patch).await?)?;
            println!("Updated order {}", id);
            Ok(())
        }
        Command::Cancel { id, remote } => {
            let access = open_access(&settings)?;
            if remote {
                cancel_remote(&settings, &access, id).await
            } else {
                ensure_found(id, access.cancel(id).await?)?;
                println!("Cancelled order {}", id);
                Ok(())
            }
        }
        Command::Delete { id } => {
            let access = open_access(&settings)?;
            ensure_found(id, access.delete(id).await?)?;
            println!("Deleted order {}", id);
            Ok(())
        }
        Command::Rules { symbol } => {
            let client = Arc::new(FuturesClient::new(settings.client_config())?);
            let rules =
                SymbolRulesCache::with_file(client, RuleCacheFile::new(settings.rules_path()));
            let rule = rules.get_rule(&symbol).await;
            println!("{}", serde_json::to_string_pretty(&rule)?);
            Ok(())
        }
        Command::Price { symbol } => {
            let client = FuturesClient::new(settings.client_config())?;
            let ticker = client.ticker(&symbol.to_uppercase()).await?;
            println!(
                "{} {} ({:+.2}% 24h)",
                ticker.symbol, ticker.price, ticker.price_change_percent
            );
            Ok(())
        }
        Command::OpenOrders { symbol } => {
            let client = FuturesClient::new(settings.client_config())?;
            let symbol = symbol.map(|s| s.to_uppercase());
            let orders = client
                .open_orders(symbol.as_deref(), Utc::now().timestamp_millis())
                .await?;
            for o in &orders {
                println!(
                    "{:<12} {:<14} {:<5} {:<8} qty={} price={} {}",
                    o.order_id, o.symbol, o.side, o.order_type, o.orig_qty, o.price, o.status
                );
            }
            println!("{} open order(s)", orders.len());
            Ok(())
        }
    }
}

// ============================================================================
// Daemon
// ============================================================================

async fn run(settings: &Settings) -> anyhow::Result<()> {
    tracing::info!("🚀 Trigger engine starting");
    tracing::info!("  Exchange: {}", settings.base_url);
    tracing::info!("  Orders file: {}", settings.orders_path().display());
    tracing::info!("  Tick interval: {}s", settings.tick_interval_secs);
    tracing::info!("  Control API: {}", settings.control_url());

    if settings.api_key.is_empty() || settings.api_secret.is_empty() {
        tracing::warn!("API credentials not configured, fired orders will fail to submit");
    }

    let lock = acquire_daemon_lock(settings).await?;
    let store = Arc::new(TriggerStore::open(Arc::new(JsonOrderFile::new(
        settings.orders_path(),
    ))));
    let client = Arc::new(FuturesClient::new(settings.client_config())?);
    let rules = Arc::new(SymbolRulesCache::with_file(
        client.clone(),
        RuleCacheFile::new(settings.rules_path()),
    ));

    if let Err(e) = rules.refresh().await {
        tracing::warn!("Initial symbol rule refresh failed: {}", e);
    }

    let oracle: Arc<dyn PriceOracle> = client.clone();
    let gateway: Arc<dyn ExchangeGateway> = client;
    let coordinator = Arc::new(
        ExecutionCoordinator::new(store.clone(), oracle, gateway, rules)
            .with_submit_timeout(settings.submit_timeout()),
    );

    let stuck = coordinator.report_in_flight();
    if !stuck.is_empty() {
        tracing::warn!(
            "⚠️  {} order(s) left TRIGGERED by a previous run: {:?}",
            stuck.len(),
            stuck
        );
    }

    let active = store.active().len();
    tracing::info!("  Active orders: {}", active);

    let listener = TcpListener::bind(settings.control_addr.as_str())
        .await
        .with_context(|| format!("failed to bind control API on {}", settings.control_addr))?;
    let shutdown = CancellationToken::new();
    let control_server = tokio::spawn(control::serve(listener, store.clone(), shutdown.clone()));

    let mut scheduler = Scheduler::new(coordinator, settings.tick_interval());
    scheduler.start();

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");

    scheduler.stop().await;
    shutdown.cancel();
    match control_server.await {
        Ok(Err(e)) => tracing::error!("{}", e),
        Err(e) => tracing::error!("Control API task failed: {}", e),
        Ok(Ok(())) => {}
    }
    store.save_to_disk()?;
    drop(lock);

    tracing::info!("👋 Trigger engine stopped");
    Ok(())
}

async fn cancel_remote(settings: &Settings, access: &OrderAccess, id: u64) -> anyhow::Result<()> {
    let order = access.get(id).await?.ok_or(Error::NotFound(id))?;
    let exchange_order_id = order
        .exchange_order_id
        .as_deref()
        .with_context(|| format!("order {} has no exchange order ({})", id, order.status))?;

    let client = FuturesClient::new(settings.client_config())?;
    client.cancel(&order.symbol, exchange_order_id).await?;
    println!(
        "Cancelled exchange order {} for record {}",
        exchange_order_id, id
    );
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Order commands edit the file directly only when no daemon owns it
fn open_access(settings: &Settings) -> trigger_engine::Result<OrderAccess> {
    OrderAccess::open(
        &settings.orders_path(),
        &settings.control_url(),
        settings.request_timeout(),
    )
}

/// Wait out a CLI command that briefly holds the lock, then give up
async fn acquire_daemon_lock(settings: &Settings) -> anyhow::Result<OrdersLock> {
    let path = settings.orders_path();
    for _ in 0..LOCK_ATTEMPTS {
        if let Some(lock) = OrdersLock::try_acquire(&path)? {
            return Ok(lock);
        }
        tokio::time::sleep(LOCK_RETRY_DELAY).await;
    }
    anyhow::bail!(
        "{} is held by another process; is a daemon already running?",
        OrdersLock::path_for(&path).display()
    )
}

fn ensure_found(id: u64, found: bool) -> trigger_engine::Result<()> {
    if found {
        Ok(())
    } else {
        Err(Error::NotFound(id))
    }
}

fn print_orders(orders: &[ConditionalOrder]) {
    if orders.is_empty() {
        println!("No conditional orders");
        return;
    }

    for o in orders {
        let price = o
            .order_price
            .map(|p| format!(" @ {}", p))
            .unwrap_or_default();
        println!(
            "#{:<4} {:<10} {:<12} {:<4} {:<13} qty={} trigger={}{} {}",
            o.id,
            o.status,
            o.symbol,
            o.side,
            o.order_type,
            o.quantity,
            o.trigger_price,
            price,
            o.remark
        );
        if let Some(reason) = &o.fail_reason {
            println!("      failed: {}", reason);
        }
    }
}

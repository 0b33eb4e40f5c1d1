use clap::{Parser, Subcommand};
use ibdesk_gateway::{
    AccountSummary, ClientPortalGateway, Direction, DryRunGateway, Gateway, OrderSnapshot,
};
use rust_decimal::Decimal;
use std::io::Write;
use thiserror::Error;
use tracing::{error, info};

use crate::env::{Env, GatewayKind};
use crate::order::{OrderResult, OrderStatus, OrderType, Outcome, PlaceOrder};
use crate::queue::OrderQueue;
use crate::valuation::Position;
use crate::worker::{WorkerConfig, spawn_worker};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Order was not accepted: {status}")]
    OrderNotAccepted { status: OrderStatus },
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Buy shares of a stock and wait for the gateway to accept or reject the order
    Buy {
        /// Stock ticker symbol (e.g., AAPL, TSLA)
        #[arg(short = 't', long = "ticker")]
        ticker: String,
        /// Number of shares to buy (whole shares only)
        #[arg(short = 'q', long = "quantity")]
        quantity: u64,
        /// Limit price; a market order is placed when absent
        #[arg(long)]
        limit: Option<Decimal>,
        /// Seconds to wait for acceptance
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Sell shares of a stock and wait for the gateway to accept or reject the order
    Sell {
        /// Stock ticker symbol (e.g., AAPL, TSLA)
        #[arg(short = 't', long = "ticker")]
        ticker: String,
        /// Number of shares to sell (whole shares only)
        #[arg(short = 'q', long = "quantity")]
        quantity: u64,
        /// Limit price; a market order is placed when absent
        #[arg(long)]
        limit: Option<Decimal>,
        /// Seconds to wait for acceptance
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List open positions marked to the latest price
    Positions,
    /// List the most recent orders, newest first
    Orders {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Show the account's headline balances
    Account,
}

#[derive(Debug, Parser)]
#[command(name = "ibdesk")]
#[command(about = "Place orders and inspect the account through a brokerage gateway")]
#[command(version)]
pub struct CliEnv {
    #[clap(flatten)]
    pub env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

impl CliEnv {
    pub fn parse_and_convert() -> (Env, Commands) {
        let cli_env = Self::parse();
        (cli_env.env, cli_env.command)
    }
}

pub async fn run_command(env: Env, command: Commands) -> anyhow::Result<()> {
    run_command_with_writers(env, command, &mut std::io::stdout()).await
}

async fn run_command_with_writers<W: Write>(
    env: Env,
    command: Commands,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let config = env.worker_config();

    match env.gateway {
        GatewayKind::DryRun => {
            run_on::<DryRunGateway, W>(env.dry_run_config(), config, command, stdout).await
        }
        GatewayKind::ClientPortal => {
            run_on::<ClientPortalGateway, W>(env.gateway_env, config, command, stdout).await
        }
    }
}

/// Runs one command against a worker owning a fresh `G` session, then stops the worker.
async fn run_on<G: Gateway, W: Write>(
    gateway_config: G::Config,
    config: WorkerConfig,
    command: Commands,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let (queue, handle) = spawn_worker::<G>(gateway_config, config).await?;

    let result = execute_command(&queue, command, stdout).await;

    if let Err(e) = handle.stop().await {
        error!("Order worker stopped with an error: {e}");
    }

    result
}

async fn execute_command<W: Write>(
    queue: &OrderQueue,
    command: Commands,
    stdout: &mut W,
) -> anyhow::Result<()> {
    match command {
        Commands::Buy {
            ticker,
            quantity,
            limit,
            timeout,
        } => {
            let order = place_order(ticker, Direction::Buy, quantity, limit, timeout);
            execute_order_with_writers(queue, &order, stdout).await?;
        }
        Commands::Sell {
            ticker,
            quantity,
            limit,
            timeout,
        } => {
            let order = place_order(ticker, Direction::Sell, quantity, limit, timeout);
            execute_order_with_writers(queue, &order, stdout).await?;
        }
        Commands::Positions => {
            let positions = queue.positions().await?;
            write_positions(&positions, stdout)?;
        }
        Commands::Orders { limit } => {
            let orders = queue.recent_orders(limit).await?;
            write_orders(&orders, stdout)?;
        }
        Commands::Account => {
            let account = queue.account_summary().await?;
            write_account(&account, stdout)?;
        }
    }

    info!("CLI operation completed successfully");
    Ok(())
}

fn place_order(
    ticker: String,
    side: Direction,
    quantity: u64,
    limit: Option<Decimal>,
    timeout: Option<u64>,
) -> PlaceOrder {
    PlaceOrder {
        symbol: ticker,
        side,
        quantity,
        order_type: if limit.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        },
        limit_price: limit,
        timeout_seconds: timeout,
    }
}

async fn execute_order_with_writers<W: Write>(
    queue: &OrderQueue,
    order: &PlaceOrder,
    stdout: &mut W,
) -> anyhow::Result<()> {
    info!(
        "Processing {} order: ticker={}, quantity={}",
        order.side, order.symbol, order.quantity
    );

    let result = match queue.place_order(order).await {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to place order: {e}");
            writeln!(stdout, "❌ Failed to place order: {e}")?;
            return Err(e.into());
        }
    };

    write_order_result(&result, stdout)?;

    if result.success() {
        Ok(())
    } else {
        Err(CliError::OrderNotAccepted {
            status: result.status(),
        }
        .into())
    }
}

fn write_order_result<W: Write>(result: &OrderResult, stdout: &mut W) -> std::io::Result<()> {
    match result.outcome() {
        Outcome::Accepted => writeln!(stdout, "✅ Order accepted!")?,
        Outcome::Rejected => writeln!(stdout, "❌ Order rejected")?,
        Outcome::TimedOut => writeln!(stdout, "⏱️ Order timed out")?,
        Outcome::Error => writeln!(stdout, "❌ Order failed")?,
    }

    if let Some(order_id) = result.order_id() {
        writeln!(stdout, "   Order ID: {order_id}")?;
    }
    writeln!(stdout, "   Status: {}", result.status())?;
    writeln!(
        stdout,
        "   Filled: {} / Remaining: {}",
        result.filled_quantity(),
        result.remaining_quantity()
    )?;
    if let Some(price) = result.avg_fill_price() {
        writeln!(stdout, "   Avg Fill Price: {price}")?;
    }
    if let Some(message) = result.error_message() {
        writeln!(stdout, "   Reason: {message}")?;
    }
    if result.outcome() == Outcome::TimedOut {
        writeln!(
            stdout,
            "   The order may still execute; check `orders` or `positions` before retrying."
        )?;
    }

    Ok(())
}

fn write_positions<W: Write>(positions: &[Position], stdout: &mut W) -> std::io::Result<()> {
    if positions.is_empty() {
        return writeln!(stdout, "No open positions");
    }

    for position in positions {
        let marker = if position.price_is_live {
            ""
        } else {
            " (no live price)"
        };
        writeln!(
            stdout,
            "{:<6} {:>10} @ {:>10}  last {:>10}{marker}  value {:>12}  P&L {} ({}%)",
            position.symbol.to_string(),
            position.quantity,
            position.avg_cost,
            position.last_price,
            position.market_value,
            position.unrealized_pnl,
            position.unrealized_pnl_pct,
        )?;
    }

    Ok(())
}

fn write_orders<W: Write>(orders: &[OrderSnapshot], stdout: &mut W) -> std::io::Result<()> {
    if orders.is_empty() {
        return writeln!(stdout, "No recent orders");
    }

    for order in orders {
        let status = order
            .status
            .map_or_else(|| "Unknown".to_string(), |status| status.to_string());
        let price = order
            .limit_price
            .map_or_else(|| "MKT".to_string(), |price| price.to_string());
        writeln!(
            stdout,
            "{:>10}  {:<4} {:>8} {:<6} @ {:<10} {:<14} filled {}",
            order.order_id,
            order.direction,
            order.quantity,
            order.symbol.to_string(),
            price,
            status,
            order.filled,
        )?;
    }

    Ok(())
}

fn write_account<W: Write>(account: &AccountSummary, stdout: &mut W) -> std::io::Result<()> {
    writeln!(stdout, "Account: {}", account.account_id)?;
    writeln!(stdout, "   Net Liquidation: {}", account.net_liquidation)?;
    writeln!(stdout, "   Buying Power: {}", account.buying_power)?;
    writeln!(stdout, "   Cash Balance: {}", account.cash_balance)
}

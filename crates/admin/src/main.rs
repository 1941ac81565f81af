//! Operator tool for the inventory ledger.
//!
//! Checks the current-stock projection against the ledger, repairs drift and
//! prints the informational stock reports. Output is JSON on stdout so it can
//! be piped into other tooling; logs go to stderr.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use stockpro_infra::StockProConfig;
use stockpro_infra::projection::ProjectionRepair;
use stockpro_infra::reports::InventoryReports;
use stockpro_infra::store::PostgresInventoryStore;

#[derive(Parser)]
#[command(name = "stockpro-admin")]
#[command(about = "Maintenance tool for the inventory ledger and stock projection")]
#[command(version)]
struct Cli {
    /// Configuration file (environment variables STOCKPRO__* override it)
    #[arg(long, default_value = "config/stockpro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the inventory tables if they are missing
    InitSchema,

    /// Report every key whose projected balance differs from its ledger
    Verify,

    /// Rewrite drifted balances from the ledger
    Repair {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// List received lots expiring soon that are still in stock
    NearExpiry {
        /// Window in days (default: reports.near_expiry_days)
        #[arg(long)]
        days: Option<u32>,

        /// Reference date, YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// List balances below zero
    NegativeStock,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{out}");
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = StockProConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    stockpro_observability::init_with(&config.logging.filter, config.logging.json);

    let store = Arc::new(
        PostgresInventoryStore::connect(&config.database).context("failed to connect to database")?,
    );

    match cli.command {
        Commands::InitSchema => {
            store.ensure_schema().context("failed to create schema")?;
            tracing::info!("inventory schema ready");
        }
        Commands::Verify => {
            let drift = ProjectionRepair::new(store).verify_all()?;
            print_json(&drift)?;
            if !drift.is_empty() {
                tracing::warn!(keys = drift.len(), "projection drift detected");
                return Ok(false);
            }
        }
        Commands::Repair { dry_run } => {
            let report = ProjectionRepair::new(store).rebuild_all(dry_run)?;
            print_json(&report)?;
        }
        Commands::NearExpiry { days, today } => {
            let days = days.unwrap_or(config.reports.near_expiry_days);
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let lots = InventoryReports::new(store).near_expiry(today, days)?;
            print_json(&lots)?;
        }
        Commands::NegativeStock => {
            let rows = InventoryReports::new(store).negative_stock()?;
            print_json(&rows)?;
        }
    }
    Ok(true)
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

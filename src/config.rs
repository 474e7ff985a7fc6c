//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::accrual::AccrualClientConfig;
use crate::model::UserId;
use crate::reconcile::ReconcileConfig;

#[derive(Debug, Parser)]
#[command(name = "loyalty-points")]
#[command(about = "Loyalty points ledger with accrual reconciliation", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every subcommand. Each flag falls back to an env var.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Database connection string
    #[arg(
        short = 'd',
        long,
        env = "DATABASE_URI",
        default_value = "sqlite://loyalty.db",
        global = true
    )]
    pub database_uri: String,

    /// Accrual system address
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS", global = true)]
    pub accrual_address: Option<String>,

    /// Timeout for one accrual request, in seconds
    #[arg(long, env = "ACCRUAL_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub accrual_timeout_secs: u64,

    /// Delay between reconciliation ticks, in seconds
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub poll_interval_secs: u64,

    /// Outbox entries fetched per tick
    #[arg(long, env = "RECONCILE_BATCH_SIZE", default_value_t = 10, global = true)]
    pub batch_size: usize,

    /// Concurrent accrual lookups per tick
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = 5, global = true)]
    pub workers: usize,

    /// Failed attempts tolerated before an order is given up on
    #[arg(long, env = "RECONCILE_MAX_RETRIES", default_value_t = 3, global = true)]
    pub max_retries: u32,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply upload and withdraw requests from a csv file
    Import {
        /// Csv with header `type,user,number,sum`
        file: PathBuf,
    },

    /// Reconcile pending orders with the accrual system
    Reconcile {
        /// Run a single tick and exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Print a user's balance as csv
    Balance {
        #[arg(long)]
        user: UserId,
    },

    /// Print a user's orders as csv, newest first
    Orders {
        #[arg(long)]
        user: UserId,
    },

    /// Print a user's withdrawals as csv, newest first
    Withdrawals {
        #[arg(long)]
        user: UserId,
    },
}

impl Settings {
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            batch_size: self.batch_size,
            workers: self.workers,
            max_retries: self.max_retries,
        }
    }

    /// `None` when no accrual address was configured.
    pub fn accrual_config(&self) -> Option<AccrualClientConfig> {
        self.accrual_address.as_ref().map(|address| {
            AccrualClientConfig::new(address.clone())
                .with_timeout(Duration::from_secs(self.accrual_timeout_secs))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

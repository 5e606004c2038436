use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::scoring::DEFAULT_QUANTUM;
use crate::standings::StoreRetry;

/// Prediction league scoring and standings
#[derive(Parser, Debug, Clone)]
#[command(name = "standings-bot", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "standings.db")]
    pub database_path: String,

    /// Deadline for a single store call, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Attempts per store call, including the first
    #[arg(long, env = "STORE_RETRIES", default_value = "3")]
    pub store_retries: u32,

    /// Backoff before the first retry, in milliseconds (doubles per retry)
    #[arg(long, env = "STORE_BACKOFF_MS", default_value = "100")]
    pub store_backoff_ms: u64,

    /// Points unit every scoring rule is expressed in
    #[arg(long, env = "POINTS_QUANTUM", default_value_t = DEFAULT_QUANTUM)]
    pub quantum: f64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a JSON league fixture
    Import {
        file: PathBuf,
    },

    /// Recompute daily points for a day (or every day through --to)
    UpdatePoints {
        #[arg(long)]
        league: i64,
        #[arg(long)]
        day: NaiveDate,
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Extend running totals through --end
    Cummulate {
        #[arg(long)]
        league: i64,
        #[arg(long)]
        end: NaiveDate,
    },

    /// Points earned between two days
    Stats {
        #[arg(long)]
        league: i64,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: NaiveDate,
    },

    /// Ranked league table
    Table {
        #[arg(long)]
        league: i64,
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Defaults to today (UTC)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Table for the last N days; overrides --start
        #[arg(long)]
        days: Option<u32>,
        /// Score straight from predictions instead of stored totals
        #[arg(long)]
        recompute: bool,
        /// Include every scored prediction (implies --recompute)
        #[arg(long)]
        details: bool,
    },

    /// One competitor's scored predictions
    Competitor {
        #[arg(long)]
        league: i64,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Defaults to today (UTC)
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Month-by-month tables, newest first
    Monthly {
        #[arg(long)]
        league: i64,
        /// Defaults to the league start
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Defaults to today (UTC)
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long, default_value = "3")]
        count: usize,
    },
}

impl Command {
    /// Whether the command stops by itself at a day boundary once the cancel
    /// flag is set. Anything else is aborted outright on interrupt.
    pub fn observes_cancel(&self) -> bool {
        match self {
            Command::UpdatePoints { .. }
            | Command::Cummulate { .. }
            | Command::Stats { .. }
            | Command::Monthly { .. } => true,
            Command::Table {
                recompute, details, ..
            } => !recompute && !details,
            Command::Import { .. } | Command::Competitor { .. } => false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store_timeout_ms == 0 {
            anyhow::bail!("store_timeout_ms must be positive");
        }
        if self.store_retries == 0 {
            anyhow::bail!("store_retries must be at least 1");
        }
        if !self.quantum.is_finite() || self.quantum <= 0.0 {
            anyhow::bail!("quantum must be a positive number");
        }
        match &self.command {
            Command::UpdatePoints { day, to: Some(to), .. } if to < day => {
                anyhow::bail!("--to ({}) is before --day ({})", to, day);
            }
            Command::Table { days: Some(0), .. } => {
                anyhow::bail!("--days must be at least 1");
            }
            Command::Monthly { count: 0, .. } => {
                anyhow::bail!("--count must be at least 1");
            }
            _ => {}
        }
        Ok(())
    }

    pub fn store_retry(&self) -> StoreRetry {
        StoreRetry {
            timeout: Duration::from_millis(self.store_timeout_ms),
            attempts: self.store_retries,
            base_backoff: Duration::from_millis(self.store_backoff_ms),
        }
    }
}

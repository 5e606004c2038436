use anyhow::Result;
use chrono::{Days, Utc};
use clap::Parser;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod db;
mod error;
mod ingest;
mod scoring;
mod standings;

use config::{Command, Config};
use db::Database;
use scoring::{Averages, Tally};
use standings::{PointStore, Standing, StandingsEngine, TableSource};

/// `stats` output row
#[derive(Debug, Serialize)]
struct StatsRow {
    nickname: String,
    total: f64,
    tally: Tally,
    averages: Option<Averages>,
}

impl From<Standing> for StatsRow {
    fn from(standing: Standing) -> Self {
        StatsRow {
            total: standing.tally.total(),
            averages: standing.tally.averages().ok(),
            tally: standing.tally,
            nickname: standing.nickname,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let engine = StandingsEngine::new(Arc::new(db), config.store_retry(), config.quantum);
    let cancel = engine.cancel_handle();
    let observes_cancel = config.command.observes_cancel();

    let command = run(&engine, config.command);
    tokio::pin!(command);

    // The cancel flag is engine-wide; one process only ever drives one command
    tokio::select! {
        result = &mut command => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            if !observes_cancel {
                anyhow::bail!("Interrupted");
            }
            warn!("Interrupt received, stopping at the next day boundary (Ctrl-C again to abort)");
            cancel.store(true, Ordering::SeqCst);
            tokio::select! {
                result = &mut command => result,
                Ok(()) = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted"),
            }
        }
    }
}

async fn run(engine: &StandingsEngine<Database>, command: Command) -> Result<()> {
    match command {
        Command::Import { file } => {
            let fixture = ingest::load_fixture(&file)?;
            let summary = ingest::import_fixture(engine.store(), &fixture)?;
            info!(
                "Imported {} games, {} competitors and {} predictions",
                summary.games, summary.competitors, summary.predictions
            );
            print_json(&summary)?;
        }
        Command::UpdatePoints { league, day, to } => {
            let summary = engine
                .update_points_range(league, day, to.unwrap_or(day))
                .await?;
            print_json(&summary)?;
        }
        Command::Cummulate { league, end } => {
            engine.cummulate(league, end).await?;
            let league = engine.store().league(league).await?;
            print_json(&league)?;
        }
        Command::Stats { league, start, end } => {
            let rows: Vec<StatsRow> = engine
                .stats(league, start, end)
                .await?
                .into_iter()
                .map(StatsRow::from)
                .collect();
            print_json(&rows)?;
        }
        Command::Table {
            league,
            start,
            end,
            days,
            recompute,
            details,
        } => {
            let end = end.unwrap_or_else(|| Utc::now().date_naive());
            let start = match days {
                Some(days) => end.checked_sub_days(Days::new(days.into())),
                None => start,
            };
            let source = if recompute || details {
                TableSource::Recompute
            } else {
                TableSource::Cumulated
            };
            let table = engine
                .build_table(league, start, Some(end), source, details)
                .await?;
            print_json(&table)?;
        }
        Command::Competitor {
            league,
            nickname,
            start,
            end,
        } => {
            let report = engine
                .competitor_report(league, &nickname, start, end)
                .await?;
            print_json(&report)?;
        }
        Command::Monthly {
            league,
            from,
            until,
            count,
        } => {
            let report = engine.monthly_tables(league, from, until, count).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

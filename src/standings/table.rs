use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::engine::{match_window, StandingsEngine};
use super::store::StandingsStore;
use crate::db::models::Game;
use crate::error::{Result, StandingsError};
use crate::scoring::{Aggregator, PredictionDetail, Tally};

/// Where a table's tallies come from. Both must produce the same table for
/// the same league and range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    /// Re-score every prediction on every completed game in range
    Recompute,
    /// Difference of persisted cumulative totals
    Cumulated,
}

/// `(total, perfect, goal_difference, goals)` descending, then nickname
/// ascending
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub total: f64,
    pub perfect: f64,
    pub goal_difference: f64,
    pub goals: f64,
    pub nickname: String,
}

impl SortKey {
    pub fn new(nickname: &str, tally: &Tally) -> Self {
        SortKey {
            total: tally.total(),
            perfect: tally.perfect,
            goal_difference: tally.goal_difference,
            goals: tally.goals,
            nickname: nickname.to_string(),
        }
    }

    /// Table order: better entries sort first.
    pub fn table_cmp(&self, other: &SortKey) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.perfect.total_cmp(&self.perfect))
            .then_with(|| other.goal_difference.total_cmp(&self.goal_difference))
            .then_with(|| other.goals.total_cmp(&self.goals))
            .then_with(|| self.nickname.cmp(&other.nickname))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableEntry {
    /// 1-based position
    pub rank: usize,
    pub nickname: String,
    pub tally: Tally,
    pub total: f64,
    pub points_per_prediction: Option<f64>,
    pub sort_key: SortKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub league_id: i64,
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
    pub source: TableSource,
    pub entries: Vec<TableEntry>,
    /// Per-prediction breakdown; only filled by `Recompute` with details
    pub details: Vec<PredictionDetail>,
}

/// One competitor's scored predictions over a range
#[derive(Debug, Clone, Serialize)]
pub struct CompetitorReport {
    pub league_id: i64,
    pub nickname: String,
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
    pub tally: Tally,
    pub total: f64,
    /// Ordered by kick-off
    pub details: Vec<PredictionDetail>,
}

/// One calendar month's table
#[derive(Debug, Clone, Serialize)]
pub struct MonthTable {
    pub month: NaiveDate,
    pub entries: Vec<TableEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub league_id: i64,
    /// Newest first; months where nobody scored are omitted
    pub months: Vec<MonthTable>,
    /// `[start, end)` windows not shown, newest first
    pub remaining: Vec<(NaiveDate, NaiveDate)>,
}

/// Order tallies into a ranked table.
pub fn rank<I>(tallies: I) -> Vec<TableEntry>
where
    I: IntoIterator<Item = (String, Tally)>,
{
    let mut entries: Vec<TableEntry> = tallies
        .into_iter()
        .map(|(nickname, tally)| TableEntry {
            rank: 0,
            sort_key: SortKey::new(&nickname, &tally),
            total: tally.total(),
            points_per_prediction: tally.points_per_prediction(),
            nickname,
            tally,
        })
        .collect();
    entries.sort_by(|a, b| a.sort_key.table_cmp(&b.sort_key));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

/// First day of the month after `day`.
pub fn next_month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .unwrap_or(NaiveDate::MAX)
}

/// Split `[from, until)` at month boundaries. The first window starts at
/// `from` even mid-month.
pub fn month_windows(from: NaiveDate, until: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut start = from;
    while start < until {
        let end = next_month_start(start);
        if end <= start {
            break;
        }
        windows.push((start, end));
        start = end;
    }
    windows
}

impl<S: StandingsStore> StandingsEngine<S> {
    /// League table for `(start, end]`; `end` defaults to today (UTC) and a
    /// missing `start` means from the beginning.
    pub async fn build_table(
        &self,
        league_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        source: TableSource,
        with_details: bool,
    ) -> Result<Table> {
        let end = end.unwrap_or_else(|| Utc::now().date_naive());
        let mut table = Table {
            league_id,
            start,
            end,
            source,
            entries: Vec::new(),
            details: Vec::new(),
        };

        match source {
            TableSource::Recompute => {
                let league = self.load_league(league_id).await?;
                let (from, to) = match_window(&league, start, end);
                if from < to {
                    let aggregate = self
                        .aggregate_window(league_id, &league, from, to, with_details)
                        .await?;
                    table.entries = rank(aggregate.tallies);
                    table.details = aggregate.details;
                }
            }
            TableSource::Cumulated => {
                // Competitors with nothing scored in the window have no row
                // when recomputing either.
                let standings = self.stats(league_id, start, end).await?;
                table.entries = rank(
                    standings
                        .into_iter()
                        .filter(|s| s.tally.count > 0)
                        .map(|s| (s.nickname, s.tally)),
                );
            }
        }
        Ok(table)
    }

    /// Every scored prediction `nickname` made on games in the same window
    /// `build_table` uses for `(start, end]`.
    pub async fn competitor_report(
        &self,
        league_id: i64,
        nickname: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<CompetitorReport> {
        let end = end.unwrap_or_else(|| Utc::now().date_naive());
        let league = self.load_league(league_id).await?;
        let store = &*self.store;

        let competitor_id = self
            .retry
            .run("competitors", move || store.competitors(league_id))
            .await?
            .into_iter()
            .find(|c| c.nickname == nickname)
            .and_then(|c| c.id)
            .ok_or_else(|| StandingsError::not_found("competitor", nickname))?;
        let predictions = self
            .retry
            .run("predictions_for_competitor", move || {
                store.predictions_for_competitor(competitor_id, league_id)
            })
            .await?;

        let competition_id = league.competition_id;
        let competition = self
            .retry
            .run("competition", move || store.competition(competition_id))
            .await?;
        let (from, to) = match_window(&league, start, end);
        let games: HashMap<i64, Game> = if from < to {
            self.retry
                .run("completed_games", move || {
                    store.completed_games(competition_id, from, to)
                })
                .await?
                .into_iter()
                .filter_map(|g| g.id.map(|id| (id, g)))
                .collect()
        } else {
            HashMap::new()
        };

        let mut aggregator = Aggregator::new(league_id, competition.scoring, self.quantum, true);
        for prediction in &predictions {
            if let Some(game) = games.get(&prediction.game_id) {
                aggregator.add(game, prediction);
            }
        }
        let aggregate = aggregator.finish();
        let tally = aggregate.tallies.get(nickname).copied().unwrap_or_default();
        let mut details = aggregate.details;
        details.sort_by(|a, b| a.match_time.cmp(&b.match_time).then(a.game_id.cmp(&b.game_id)));

        Ok(CompetitorReport {
            league_id,
            nickname: nickname.to_string(),
            start,
            end,
            tally,
            total: tally.total(),
            details,
        })
    }

    /// Month-by-month tables, newest first, from cumulated totals.
    pub async fn monthly_tables(
        &self,
        league_id: i64,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
        count: usize,
    ) -> Result<MonthlyReport> {
        let from = match from {
            Some(from) => from,
            None => self.load_league(league_id).await?.start,
        };
        let until = until.unwrap_or_else(|| Utc::now().date_naive());

        let mut windows = month_windows(from, until);
        windows.reverse();
        let remaining = windows.split_off(count.min(windows.len()));

        // Cumulate once up front so the window queries below only read.
        let latest = windows.iter().filter_map(|(_, end)| end.pred_opt()).max();
        if let Some(latest) = latest {
            self.cummulate(league_id, latest).await?;
        }

        let queries = windows.iter().map(|(start, end)| {
            self.stats(
                league_id,
                start.pred_opt(),
                end.pred_opt().unwrap_or(*end),
            )
        });
        let results = futures_util::future::try_join_all(queries).await?;

        let months = windows
            .iter()
            .zip(results)
            .filter_map(|((start, _), standings)| {
                let scored: Vec<_> = standings
                    .into_iter()
                    .filter(|s| s.tally.count > 0)
                    .map(|s| (s.nickname, s.tally))
                    .collect();
                if scored.is_empty() {
                    None
                } else {
                    Some(MonthTable {
                        month: *start,
                        entries: rank(scored),
                    })
                }
            })
            .collect();

        Ok(MonthlyReport {
            league_id,
            months,
            remaining,
        })
    }
}

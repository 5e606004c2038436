use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::retry::StoreRetry;
use super::store::StandingsStore;
use crate::db::models::{League, PointRecord};
use crate::error::{Result, StandingsError};
use crate::scoring::{Aggregate, Aggregator, Tally};

/// One competitor's points over a queried range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub competitor_id: i64,
    pub nickname: String,
    pub tally: Tally,
}

/// Maintains daily snapshots and cumulative totals for leagues, and answers
/// range queries from them.
///
/// Mutations of one league (`update_points`, `cummulate`) are serialized
/// through a per-league async mutex. Reads of the point records themselves
/// are not synchronized.
pub struct StandingsEngine<S> {
    pub(super) store: Arc<S>,
    pub(super) retry: StoreRetry,
    pub(super) quantum: f64,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    cancel: Arc<AtomicBool>,
}

/// Midnight UTC at the start of `day`
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

pub fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(NaiveDate::MAX)
}

/// Kick-off instants `[from, to)` for match days in `(start, end]`, or from
/// the league start when `start` is `None`. Days before the league start
/// never reach the cumulative totals, so they are never counted here either.
pub fn match_window(
    league: &League,
    start: Option<NaiveDate>,
    end: NaiveDate,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = start.map(next_day).unwrap_or(league.start).max(league.start);
    (day_start(first), day_start(next_day(end)))
}

impl<S: StandingsStore> StandingsEngine<S> {
    pub fn new(store: Arc<S>, retry: StoreRetry, quantum: f64) -> Self {
        StandingsEngine {
            store,
            retry,
            quantum,
            locks: Mutex::new(HashMap::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Setting the returned flag stops the next day boundary of a running
    /// cumulation walk or `update_points_range`. The flag is shared by every
    /// league this engine serves and is cleared once observed.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub(super) fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }

    pub(super) fn league_lock(&self, league_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(league_id).or_default())
    }

    pub(super) async fn load_league(&self, league_id: i64) -> Result<League> {
        let store = &*self.store;
        self.retry
            .run("league", move || store.league(league_id))
            .await
    }

    pub(super) async fn records(
        &self,
        league_id: i64,
        date: NaiveDate,
        is_total: bool,
    ) -> Result<Vec<PointRecord>> {
        let store = &*self.store;
        self.retry
            .run("point_records", move || store.point_records(league_id, date, is_total))
            .await
    }

    pub(super) async fn save(&self, record: &PointRecord) -> Result<i64> {
        let store = &*self.store;
        self.retry
            .run("save_point_record", move || store.save_point_record(record))
            .await
    }

    pub(super) async fn delete(&self, record: &PointRecord) -> Result<()> {
        let Some(id) = record.id else {
            return Ok(());
        };
        let store = &*self.store;
        self.retry
            .run("delete_point_record", move || store.delete_point_record(id))
            .await
    }

    /// Score every prediction of `league_id` on games completed in `[from, to)`.
    pub(super) async fn aggregate_window(
        &self,
        league_id: i64,
        league: &League,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        with_details: bool,
    ) -> Result<Aggregate> {
        let store = &*self.store;
        let competition_id = league.competition_id;
        let competition = self
            .retry
            .run("competition", move || store.competition(competition_id))
            .await?;
        let games = self
            .retry
            .run("completed_games", move || {
                store.completed_games(competition_id, from, to)
            })
            .await?;

        let mut aggregator =
            Aggregator::new(league_id, competition.scoring, self.quantum, with_details);
        for game in &games {
            let Some(game_id) = game.id else {
                continue;
            };
            let predictions = self
                .retry
                .run("predictions_for_game", move || {
                    store.predictions_for_game(game_id, league_id)
                })
                .await?;
            aggregator.add_all(game, &predictions);
        }
        debug!(
            "Aggregated {} games for league {} in [{}, {})",
            games.len(),
            league_id,
            from,
            to
        );
        Ok(aggregator.finish())
    }

    /// Persist cumulative totals for every day after the league's cursor up
    /// to and including `end`, then advance the cursor to `end`.
    pub async fn cummulate(&self, league_id: i64, end: NaiveDate) -> Result<()> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.cummulate_locked(league_id, end).await
    }

    async fn cummulate_locked(&self, league_id: i64, end: NaiveDate) -> Result<()> {
        let league = self.load_league(league_id).await?;
        let origin = league.cursor;
        if origin >= end {
            debug!(
                "League {} already cumulated to {} (asked for {})",
                league_id, origin, end
            );
            return Ok(());
        }

        let mut totals: BTreeMap<i64, PointRecord> = self
            .records(league_id, origin, true)
            .await?
            .into_iter()
            .map(|r| (r.competitor_id, r))
            .collect();
        let mut reached = origin;

        // Each day's totals depend on the previous day's, so days are
        // processed strictly in order.
        for day in origin.iter_days().skip(1).take_while(|d| *d <= end) {
            if self.take_cancel() {
                if reached > origin {
                    self.set_cursor(league_id, reached).await?;
                }
                warn!(
                    "Cumulation of league {} cancelled at {} (target {})",
                    league_id, reached, end
                );
                return Err(StandingsError::Cancelled { reached });
            }

            totals = self.advance_day(league_id, day, totals).await?;
            reached = day;
        }

        self.set_cursor(league_id, end).await?;
        info!(
            "League {} cumulated from {} to {} ({} competitors)",
            league_id,
            origin,
            end,
            totals.len()
        );
        Ok(())
    }

    /// Rewrite the totals for `[from, league.cursor]` after daily records in
    /// that range changed. Must be called with the league lock held. The
    /// cursor does not move, and the rebuild is not cancellable: stopping
    /// half way would leave totals that break the prefix-sum law.
    pub(super) async fn rebuild_totals_locked(
        &self,
        league_id: i64,
        league: &League,
        from: NaiveDate,
    ) -> Result<()> {
        let from = from.max(league.start);
        if from > league.cursor {
            return Ok(());
        }
        let seed = from.pred_opt().unwrap_or(from);
        let mut totals: BTreeMap<i64, PointRecord> = self
            .records(league_id, seed, true)
            .await?
            .into_iter()
            .map(|r| (r.competitor_id, r))
            .collect();
        for day in from.iter_days().take_while(|d| *d <= league.cursor) {
            totals = self.advance_day(league_id, day, totals).await?;
        }
        info!(
            "League {} totals rebuilt from {} to {}",
            league_id, from, league.cursor
        );
        Ok(())
    }

    /// `total[day] = total[day - 1] + daily[day]` for every competitor seen
    /// on either side.
    async fn advance_day(
        &self,
        league_id: i64,
        day: NaiveDate,
        previous: BTreeMap<i64, PointRecord>,
    ) -> Result<BTreeMap<i64, PointRecord>> {
        let mut daily: BTreeMap<i64, PointRecord> = BTreeMap::new();
        for record in self.records(league_id, day, false).await? {
            if daily.contains_key(&record.competitor_id) {
                warn!(
                    "Duplicate daily record for {} on {}; using the first",
                    record.nickname, day
                );
                continue;
            }
            daily.insert(record.competitor_id, record);
        }

        let mut next: BTreeMap<i64, PointRecord> = BTreeMap::new();
        for (competitor_id, prev) in &previous {
            let day_tally = daily
                .get(competitor_id)
                .map(|r| r.tally)
                .unwrap_or_default();
            next.insert(*competitor_id, total_record(prev, day, prev.tally + day_tally));
        }
        for (competitor_id, record) in &daily {
            if !previous.contains_key(competitor_id) {
                next.insert(*competitor_id, total_record(record, day, record.tally));
            }
        }

        for stale in self.records(league_id, day, true).await? {
            self.delete(&stale).await?;
        }
        for record in next.values_mut() {
            record.id = Some(self.save(record).await?);
        }
        debug!("League {} totals written for {}", league_id, day);
        Ok(next)
    }

    async fn set_cursor(&self, league_id: i64, cursor: NaiveDate) -> Result<()> {
        let store = &*self.store;
        self.retry
            .run("set_cursor", move || store.set_cursor(league_id, cursor))
            .await
    }

    /// Points earned in `(start, end]`, or from the league origin through
    /// `end` when `start` is `None`. Ordered by nickname.
    ///
    /// Competitors with a total at `start` but none at `end` are left out.
    pub async fn stats(
        &self,
        league_id: i64,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> Result<Vec<Standing>> {
        if matches!(start, Some(s) if s >= end) {
            return Ok(Vec::new());
        }
        self.cummulate(league_id, end).await?;

        let before: HashMap<i64, Tally> = match start {
            Some(start) => self
                .records(league_id, start, true)
                .await?
                .into_iter()
                .map(|r| (r.competitor_id, r.tally))
                .collect(),
            None => HashMap::new(),
        };

        let standings = self
            .records(league_id, end, true)
            .await?
            .into_iter()
            .map(|r| {
                let earlier = before.get(&r.competitor_id).copied().unwrap_or_default();
                Standing {
                    competitor_id: r.competitor_id,
                    nickname: r.nickname,
                    tally: r.tally.difference(&earlier),
                }
            })
            .collect();
        Ok(standings)
    }
}

fn total_record(template: &PointRecord, day: NaiveDate, tally: Tally) -> PointRecord {
    PointRecord {
        id: None,
        date: day,
        league_id: template.league_id,
        competitor_id: template.competitor_id,
        nickname: template.nickname.clone(),
        tally,
        is_total: true,
    }
}

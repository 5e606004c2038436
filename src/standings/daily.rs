use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::engine::{day_start, next_day, StandingsEngine};
use super::store::StandingsStore;
use crate::db::models::PointRecord;
use crate::error::{Result, StandingsError};

/// What one `update_points` pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duplicates_removed: usize,
}

impl UpdateSummary {
    pub fn merge(self, other: UpdateSummary) -> UpdateSummary {
        UpdateSummary {
            created: self.created + other.created,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            duplicates_removed: self.duplicates_removed + other.duplicates_removed,
        }
    }
}

impl<S: StandingsStore> StandingsEngine<S> {
    /// Rebuild the daily snapshot for `day` from the source predictions.
    ///
    /// Every call recomputes the whole day and overwrites what is stored, so
    /// repeated calls converge on the same records. When `day` is already
    /// cumulated, the totals from `day` through the cursor are rebuilt under
    /// the same lock.
    pub async fn update_points(&self, league_id: i64, day: NaiveDate) -> Result<UpdateSummary> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        let league = self.load_league(league_id).await?;
        let fresh = self
            .aggregate_window(league_id, &league, day_start(day), day_start(next_day(day)), false)
            .await?
            .tallies;

        let mut current: HashMap<String, PointRecord> = HashMap::new();
        let mut summary = UpdateSummary::default();
        for record in self.records(league_id, day, false).await? {
            if current.contains_key(&record.nickname) {
                debug!("Removing duplicate daily record for {} on {}", record.nickname, day);
                self.delete(&record).await?;
                summary.duplicates_removed += 1;
            } else {
                current.insert(record.nickname.clone(), record);
            }
        }

        let competitor_ids: HashMap<String, i64> = if fresh.keys().any(|n| !current.contains_key(n)) {
            let store = &*self.store;
            self.retry
                .run("competitors", move || store.competitors(league_id))
                .await?
                .into_iter()
                .filter_map(|c| c.id.map(|id| (c.nickname, id)))
                .collect()
        } else {
            HashMap::new()
        };

        for (nickname, tally) in fresh {
            match current.remove(&nickname) {
                Some(mut record) => {
                    record.tally = tally;
                    self.save(&record).await?;
                    summary.updated += 1;
                }
                None => {
                    let competitor_id = *competitor_ids
                        .get(&nickname)
                        .ok_or_else(|| StandingsError::not_found("competitor", &nickname))?;
                    let record = PointRecord {
                        id: None,
                        date: day,
                        league_id,
                        competitor_id,
                        nickname,
                        tally,
                        is_total: false,
                    };
                    self.save(&record).await?;
                    summary.created += 1;
                }
            }
        }

        // Whoever is left no longer has a scored prediction that day
        for record in current.into_values() {
            self.delete(&record).await?;
            summary.deleted += 1;
        }

        if day <= league.cursor {
            debug!(
                "League {} is cumulated through {}; rebuilding totals from {}",
                league_id, league.cursor, day
            );
            self.rebuild_totals_locked(league_id, &league, day).await?;
        }

        info!(
            "League {} points for {}: {} created, {} updated, {} deleted, {} duplicates removed",
            league_id,
            day,
            summary.created,
            summary.updated,
            summary.deleted,
            summary.duplicates_removed
        );
        Ok(summary)
    }

    /// `update_points` for every day in `[from, to]`, in order. Stops between
    /// days when the cancel flag is set.
    pub async fn update_points_range(
        &self,
        league_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<UpdateSummary> {
        let mut summary = UpdateSummary::default();
        let mut reached = from.pred_opt().unwrap_or(from);
        for day in from.iter_days().take_while(|d| *d <= to) {
            if self.take_cancel() {
                warn!(
                    "Point update of league {} cancelled after {} (target {})",
                    league_id, reached, to
                );
                return Err(StandingsError::Cancelled { reached });
            }
            summary = summary.merge(self.update_points(league_id, day).await?);
            reached = day;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Score;
    use crate::scoring::Tally;
    use crate::standings::fixture::{date, Fixture};
    use crate::standings::store::PointStore;
    use crate::standings::table::TableSource;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_update_points_creates_daily_records() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 15);
        let summary = fx.engine.update_points(fx.league_id, day).await.unwrap();
        assert_eq!(summary.created, 3);

        let records = fx.db.point_records(fx.league_id, day, false).await.unwrap();
        let totals: Vec<(&str, f64, i64)> = records
            .iter()
            .map(|r| (r.nickname.as_str(), r.tally.total(), r.tally.count))
            .collect();
        assert_eq!(
            totals,
            vec![("alice", 6.0, 2), ("bob", 6.0, 1), ("carol", 3.0, 1)]
        );
    }

    #[tokio::test]
    async fn test_update_points_is_idempotent() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 14);
        fx.engine.update_points(fx.league_id, day).await.unwrap();
        let first = fx.db.point_records(fx.league_id, day, false).await.unwrap();

        for _ in 0..3 {
            let summary = fx.engine.update_points(fx.league_id, day).await.unwrap();
            assert_eq!(summary.created, 0);
            assert_eq!(summary.updated, 2);
            assert_eq!(summary.deleted, 0);
            let again = fx.db.point_records(fx.league_id, day, false).await.unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn test_update_points_overwrites_when_result_changes() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 14);
        fx.engine.update_points(fx.league_id, day).await.unwrap();

        // score corrected to 2-0: bob's 2-0 is now perfect
        fx.db.set_game_score(fx.game_ids[0], Some(Score::new(2, 0))).unwrap();
        fx.engine.update_points(fx.league_id, day).await.unwrap();

        let records = fx.db.point_records(fx.league_id, day, false).await.unwrap();
        let bob = records.iter().find(|r| r.nickname == "bob").unwrap();
        assert_relative_eq!(bob.tally.total(), 6.0);
        assert_eq!(bob.tally.count, 1);
    }

    #[tokio::test]
    async fn test_update_points_drops_competitors_no_longer_scoring() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 14);
        fx.engine.update_points(fx.league_id, day).await.unwrap();

        fx.db.set_game_score(fx.game_ids[0], None).unwrap();
        let summary = fx.engine.update_points(fx.league_id, day).await.unwrap();
        assert_eq!(summary.deleted, 2);
        assert!(fx.db.point_records(fx.league_id, day, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_points_repairs_duplicates() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 14);
        let junk = Tally {
            goals: 99.0,
            count: 9,
            ..Tally::zero()
        };
        fx.put_daily("alice", day, junk).await;
        fx.put_daily("alice", day, junk).await;

        let summary = fx.engine.update_points(fx.league_id, day).await.unwrap();
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 1);

        let records = fx.db.point_records(fx.league_id, day, false).await.unwrap();
        let alice: Vec<_> = records.iter().filter(|r| r.nickname == "alice").collect();
        assert_eq!(alice.len(), 1);
        assert_relative_eq!(alice[0].tally.total(), 6.0);
    }

    #[tokio::test]
    async fn test_update_points_day_without_games() {
        let fx = Fixture::euro_league().await;
        let summary = fx
            .engine
            .update_points(fx.league_id, date(2024, 6, 16))
            .await
            .unwrap();
        assert_eq!(summary, UpdateSummary::default());
    }

    #[tokio::test]
    async fn test_concurrent_updates_for_one_league_do_not_duplicate() {
        let fx = Fixture::euro_league().await;
        let day = date(2024, 6, 15);
        let (a, b) = tokio::join!(
            fx.engine.update_points(fx.league_id, day),
            fx.engine.update_points(fx.league_id, day)
        );
        a.unwrap();
        b.unwrap();
        let records = fx.db.point_records(fx.league_id, day, false).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_late_result_rebuilds_cumulated_totals() {
        let fx = Fixture::euro_league().await;
        let last = date(2024, 6, 18);
        fx.engine
            .update_points_range(fx.league_id, date(2024, 6, 14), last)
            .await
            .unwrap();
        // the fast table cumulates past the unplayed game's day
        let end = date(2024, 6, 20);
        fx.engine
            .build_table(fx.league_id, None, Some(end), TableSource::Cumulated, false)
            .await
            .unwrap();

        // Turkey 1-1 Georgia comes in afterwards; alice called it
        fx.db.set_game_score(fx.game_ids[4], Some(Score::new(1, 1))).unwrap();
        fx.engine.update_points(fx.league_id, last).await.unwrap();
        assert_eq!(fx.db.league(fx.league_id).await.unwrap().cursor, end);

        let mut previous: BTreeMap<String, Tally> = BTreeMap::new();
        for day in fx.origin().iter_days().skip(1).take_while(|d| *d <= end) {
            let daily = fx.db.point_records(fx.league_id, day, false).await.unwrap();
            let totals = fx.db.point_records(fx.league_id, day, true).await.unwrap();
            for total in &totals {
                let prev = previous.get(&total.nickname).copied().unwrap_or_default();
                let today = daily
                    .iter()
                    .find(|r| r.nickname == total.nickname)
                    .map(|r| r.tally)
                    .unwrap_or_default();
                assert_eq!(total.tally, prev + today, "{} on {}", total.nickname, day);
            }
            previous = totals.into_iter().map(|r| (r.nickname, r.tally)).collect();
        }

        let mut tables = Vec::new();
        for source in [TableSource::Recompute, TableSource::Cumulated] {
            let table = fx
                .engine
                .build_table(fx.league_id, None, Some(end), source, false)
                .await
                .unwrap();
            let rows: Vec<(String, Tally)> = table
                .entries
                .into_iter()
                .map(|e| (e.nickname, e.tally))
                .collect();
            tables.push(rows);
        }
        let (slow, fast) = (&tables[0], &tables[1]);
        assert_eq!(slow, fast);
        assert_eq!(fast[0].0, "alice");
        assert_relative_eq!(fast[0].1.total(), 19.0);
    }

    #[tokio::test]
    async fn test_range_update_stops_when_cancelled() {
        let fx = Fixture::euro_league().await;
        fx.engine.cancel_handle().store(true, Ordering::SeqCst);
        let err = fx
            .engine
            .update_points_range(fx.league_id, date(2024, 6, 14), date(2024, 6, 18))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StandingsError::Cancelled { reached } if reached == date(2024, 6, 13)
        ));
        assert!(fx
            .db
            .point_records(fx.league_id, date(2024, 6, 14), false)
            .await
            .unwrap()
            .is_empty());

        // flag was consumed
        let summary = fx
            .engine
            .update_points_range(fx.league_id, date(2024, 6, 14), date(2024, 6, 15))
            .await
            .unwrap();
        assert_eq!(summary.created, 5);
    }

    #[test]
    fn test_summary_merge() {
        let a = UpdateSummary {
            created: 1,
            updated: 2,
            deleted: 0,
            duplicates_removed: 1,
        };
        let merged = a.merge(a);
        assert_eq!(merged.created, 2);
        assert_eq!(merged.updated, 4);
        assert_eq!(merged.duplicates_removed, 2);
    }
}

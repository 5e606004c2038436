use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::models::{Competition, Competitor, Game, League, PointRecord, Prediction};
use crate::error::Result;

/// Persistence for leagues and their daily/total point records.
///
/// No multi-call transactions are assumed; callers serialize mutations per
/// league themselves.
#[async_trait]
pub trait PointStore: Send + Sync {
    async fn league(&self, league_id: i64) -> Result<League>;

    async fn competition(&self, competition_id: i64) -> Result<Competition>;

    async fn competitors(&self, league_id: i64) -> Result<Vec<Competitor>>;

    async fn point_records(
        &self,
        league_id: i64,
        date: NaiveDate,
        is_total: bool,
    ) -> Result<Vec<PointRecord>>;

    /// Insert when `record.id` is `None`, otherwise overwrite by id.
    async fn save_point_record(&self, record: &PointRecord) -> Result<i64>;

    async fn delete_point_record(&self, record_id: i64) -> Result<()>;

    async fn set_cursor(&self, league_id: i64, cursor: NaiveDate) -> Result<()>;
}

/// Games with known results.
#[async_trait]
pub trait GameSource: Send + Sync {
    /// Games of `competition_id` kicking off in `[from, to)` whose scores are
    /// both known, ordered by match time.
    async fn completed_games(
        &self,
        competition_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Game>>;
}

#[async_trait]
pub trait PredictionSource: Send + Sync {
    async fn predictions_for_game(&self, game_id: i64, league_id: i64) -> Result<Vec<Prediction>>;

    async fn predictions_for_competitor(
        &self,
        competitor_id: i64,
        league_id: i64,
    ) -> Result<Vec<Prediction>>;
}

/// Everything the standings engine needs from its backend
pub trait StandingsStore: PointStore + GameSource + PredictionSource {}

impl<T: PointStore + GameSource + PredictionSource> StandingsStore for T {}

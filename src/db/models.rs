use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StandingsError};
use crate::scoring::{ScoringPolicy, Tally};

/// Stored in either score column while a score is not yet known
pub const UNSET_SCORE: i64 = -1;

/// A full-time score, home side first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn new(home: u32, away: u32) -> Self {
        Score { home, away }
    }

    /// Home minus away goals
    pub fn margin(&self) -> i64 {
        i64::from(self.home) - i64::from(self.away)
    }

    pub fn swapped(&self) -> Score {
        Score {
            home: self.away,
            away: self.home,
        }
    }

    /// Validate raw ingested scores. `-1` on both sides means "not known
    /// yet"; a single known side or anything else below zero is rejected.
    pub fn validate(home: i64, away: i64, context: &str) -> Result<Option<Score>> {
        match (validate_side(home, context)?, validate_side(away, context)?) {
            (Some(home), Some(away)) => Ok(Some(Score { home, away })),
            (None, None) => Ok(None),
            _ => Err(StandingsError::InvalidScore {
                value: UNSET_SCORE,
                context: format!("{} (only one side of {}-{} is known)", context, home, away),
            }),
        }
    }

    /// Decode already-validated columns.
    pub fn from_columns(home: i64, away: i64) -> Option<Score> {
        let home = u32::try_from(home).ok()?;
        let away = u32::try_from(away).ok()?;
        Some(Score { home, away })
    }

    pub fn to_columns(score: Option<Score>) -> (i64, i64) {
        match score {
            Some(s) => (i64::from(s.home), i64::from(s.away)),
            None => (UNSET_SCORE, UNSET_SCORE),
        }
    }
}

fn validate_side(value: i64, context: &str) -> Result<Option<u32>> {
    if value == UNSET_SCORE {
        return Ok(None);
    }
    u32::try_from(value)
        .map(Some)
        .map_err(|_| StandingsError::InvalidScore {
            value,
            context: context.to_string(),
        })
}

/// A competition (Premier League, World Cup, Six Nations…) and the policy
/// that scores predictions on its games
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: Option<i64>,
    pub name: String,
    pub scoring: ScoringPolicy,
}

/// One group of competitors playing a competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct League {
    pub id: Option<i64>,
    pub competition_id: i64,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Last date whose cumulative totals are persisted
    pub cursor: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competitor {
    pub id: Option<i64>,
    pub league_id: i64,
    /// Unique within the league
    pub nickname: String,
}

/// A game and, once played, its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Option<i64>,
    pub competition_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub score: Option<Score>,
    pub match_time: DateTime<Utc>,
    pub detail: Option<String>,
}

/// A competitor's predicted score for one game in one league
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Option<i64>,
    pub league_id: i64,
    pub game_id: i64,
    pub competitor_id: i64,
    /// Competitor nickname, joined in on reads
    pub nickname: String,
    pub predicted: Option<Score>,
}

/// Persisted per-day tally: a daily snapshot or, with `is_total`, the
/// cumulative total from the league origin through `date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub league_id: i64,
    pub competitor_id: i64,
    pub nickname: String,
    pub tally: Tally,
    pub is_total: bool,
}

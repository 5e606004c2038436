//! Per-prediction scoring policies.
//!
//! A policy is fixed per competition and maps one predicted score and one
//! actual result to the points that single prediction earns. Two variants:
//!
//! * `Standard` (football): exact-match credit for each side, the goal
//!   difference and the full score, plus `2·quantum` for the right outcome.
//! * `ToleranceBased` (rugby and other high-scoring sports): the same
//!   categories earn linearly decaying credit `quantum·(T+1−delta)` while the
//!   absolute error `delta` stays within the tolerance `T`.
use serde::{Deserialize, Serialize};
use std::fmt;

use super::tally::Tally;
use crate::db::models::Score;

pub const DEFAULT_QUANTUM: f64 = 1.0;
pub const DEFAULT_TOLERANCE: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringPolicy {
    #[default]
    Standard,
    ToleranceBased { tolerance: u32 },
}

/// Match outcome category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    HomeWin,
    AwayWin,
    Draw,
}

impl Outcome {
    pub fn of(score: Score) -> Outcome {
        match score.home.cmp(&score.away) {
            std::cmp::Ordering::Greater => Outcome::HomeWin,
            std::cmp::Ordering::Less => Outcome::AwayWin,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }
}

impl ScoringPolicy {
    /// Pick a policy from a legacy competition name.
    ///
    /// Only used when importing competitions that carry no explicit policy;
    /// "egg" marks egg-chasing (rugby) competitions.
    pub fn from_competition_name(name: &str) -> ScoringPolicy {
        if name.to_lowercase().contains("egg") {
            ScoringPolicy::ToleranceBased {
                tolerance: DEFAULT_TOLERANCE,
            }
        } else {
            ScoringPolicy::Standard
        }
    }

    /// Points earned by a single prediction. The returned tally always has
    /// `count == 1`.
    pub fn score(&self, predicted: Score, actual: Score, quantum: f64) -> Tally {
        let mut points = match self {
            ScoringPolicy::Standard => standard(predicted, actual, quantum),
            ScoringPolicy::ToleranceBased { tolerance } => {
                tolerance_based(predicted, actual, quantum, *tolerance)
            }
        };
        points.count = 1;
        points
    }
}

impl fmt::Display for ScoringPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringPolicy::Standard => write!(f, "standard"),
            ScoringPolicy::ToleranceBased { tolerance } => write!(f, "tolerance({})", tolerance),
        }
    }
}

fn outcome_points(predicted: Score, actual: Score, quantum: f64) -> f64 {
    if Outcome::of(predicted) == Outcome::of(actual) {
        2.0 * quantum
    } else {
        0.0
    }
}

fn standard(predicted: Score, actual: Score, quantum: f64) -> Tally {
    let home_right = predicted.home == actual.home;
    let away_right = predicted.away == actual.away;

    let mut goals = 0.0;
    if home_right {
        goals += quantum;
    }
    if away_right {
        goals += quantum;
    }

    let goal_difference = if predicted.margin() == actual.margin() {
        quantum
    } else {
        0.0
    };
    let perfect = if home_right && away_right { quantum } else { 0.0 };

    Tally {
        perfect,
        goal_difference,
        goals,
        result: outcome_points(predicted, actual, quantum),
        count: 0,
    }
}

fn tolerance_based(predicted: Score, actual: Score, quantum: f64, tolerance: u32) -> Tally {
    let credit = |delta: i64| -> f64 {
        let t = i64::from(tolerance);
        if delta <= t {
            quantum * (t + 1 - delta) as f64
        } else {
            0.0
        }
    };

    let home_delta = (i64::from(predicted.home) - i64::from(actual.home)).abs();
    let away_delta = (i64::from(predicted.away) - i64::from(actual.away)).abs();
    let margin_delta = (predicted.margin() - actual.margin()).abs();

    Tally {
        perfect: credit(home_delta + away_delta),
        goal_difference: credit(margin_delta),
        goals: credit(home_delta) + credit(away_delta),
        result: outcome_points(predicted, actual, quantum),
        count: 0,
    }
}

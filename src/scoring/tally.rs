use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, Sub};

use crate::error::{Result, StandingsError};

/// Five-field point accumulator for one competitor.
///
/// Tallies are plain values: `combine` adds two of them field-wise and
/// `difference` is its inverse, so `Tally::zero()` plus `combine` form a
/// commutative monoid. Range queries over cumulative totals rely on
/// `total(end).difference(total(start))`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub perfect: f64,
    pub goal_difference: f64,
    pub goals: f64,
    pub result: f64,
    /// Number of predictions scored
    pub count: i64,
}

/// Per-prediction averages of every tally field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Averages {
    pub count: i64,
    pub perfect: f64,
    pub goal_difference: f64,
    pub goals: f64,
    pub result: f64,
    pub total: f64,
}

impl Tally {
    pub const fn zero() -> Self {
        Tally {
            perfect: 0.0,
            goal_difference: 0.0,
            goals: 0.0,
            result: 0.0,
            count: 0,
        }
    }

    pub fn combine(&self, other: &Tally) -> Tally {
        Tally {
            perfect: self.perfect + other.perfect,
            goal_difference: self.goal_difference + other.goal_difference,
            goals: self.goals + other.goals,
            result: self.result + other.result,
            count: self.count + other.count,
        }
    }

    pub fn difference(&self, other: &Tally) -> Tally {
        Tally {
            perfect: self.perfect - other.perfect,
            goal_difference: self.goal_difference - other.goal_difference,
            goals: self.goals - other.goals,
            result: self.result - other.result,
            count: self.count - other.count,
        }
    }

    pub fn total(&self) -> f64 {
        self.goals + self.goal_difference + self.perfect + self.result
    }

    /// `None` until at least one prediction has been scored.
    pub fn points_per_prediction(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.total() / self.count as f64)
        } else {
            None
        }
    }

    pub fn averages(&self) -> Result<Averages> {
        if self.count <= 0 {
            return Err(StandingsError::DivisionUndefined);
        }
        let n = self.count as f64;
        Ok(Averages {
            count: self.count,
            perfect: self.perfect / n,
            goal_difference: self.goal_difference / n,
            goals: self.goals / n,
            result: self.result / n,
            total: self.total() / n,
        })
    }
}

impl Add for Tally {
    type Output = Tally;

    fn add(self, rhs: Tally) -> Tally {
        self.combine(&rhs)
    }
}

impl Sub for Tally {
    type Output = Tally;

    fn sub(self, rhs: Tally) -> Tally {
        self.difference(&rhs)
    }
}

impl Sum for Tally {
    fn sum<I: Iterator<Item = Tally>>(iter: I) -> Tally {
        iter.fold(Tally::zero(), |acc, t| acc + t)
    }
}

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the scoring and standings engine
#[derive(Error, Debug)]
pub enum StandingsError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Scores must be non-negative, or -1 for "not yet known"
    #[error("Invalid score {value} for {context}")]
    InvalidScore { value: i64, context: String },

    #[error("Averages are undefined for a tally with no predictions")]
    DivisionUndefined,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A day-by-day walk stopped early; everything through `reached` is
    /// consistent
    #[error("Cancelled after {reached}")]
    Cancelled { reached: NaiveDate },
}

impl StandingsError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StandingsError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a failed store call is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StandingsError::Database(_) | StandingsError::Timeout { .. } | StandingsError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StandingsError>;

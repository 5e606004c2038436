use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::policy::ScoringPolicy;
use super::tally::Tally;
use crate::db::models::{Game, Prediction, Score};

/// Points a single prediction earned on a single game
#[derive(Debug, Clone, Serialize)]
pub struct PredictionDetail {
    pub game_id: Option<i64>,
    pub home_team: String,
    pub away_team: String,
    pub match_time: DateTime<Utc>,
    pub nickname: String,
    pub predicted: Score,
    pub actual: Score,
    pub tally: Tally,
    pub total: f64,
}

/// Result of aggregating a batch of games
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// Un-totalled tally per competitor nickname
    pub tallies: BTreeMap<String, Tally>,
    pub details: Vec<PredictionDetail>,
}

/// Groups one league's predictions for completed games by competitor.
///
/// The caller chooses which games to feed in; nothing here filters by date
/// or checks that games have been played beyond skipping ones without a
/// result.
pub struct Aggregator {
    league_id: i64,
    policy: ScoringPolicy,
    quantum: f64,
    with_details: bool,
    out: Aggregate,
}

impl Aggregator {
    pub fn new(league_id: i64, policy: ScoringPolicy, quantum: f64, with_details: bool) -> Self {
        Aggregator {
            league_id,
            policy,
            quantum,
            with_details,
            out: Aggregate::default(),
        }
    }

    pub fn add(&mut self, game: &Game, prediction: &Prediction) {
        if prediction.league_id != self.league_id {
            return;
        }
        let Some(actual) = game.score else {
            warn!(
                "Game {:?} ({} v {}) has no result; skipping",
                game.id, game.home_team, game.away_team
            );
            return;
        };
        let Some(predicted) = prediction.predicted else {
            debug!(
                "{} left game {:?} unpredicted",
                prediction.nickname, game.id
            );
            return;
        };

        let points = self.policy.score(predicted, actual, self.quantum);
        let entry = self
            .out
            .tallies
            .entry(prediction.nickname.clone())
            .or_insert_with(Tally::zero);
        *entry = entry.combine(&points);

        if self.with_details {
            self.out.details.push(PredictionDetail {
                game_id: game.id,
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                match_time: game.match_time,
                nickname: prediction.nickname.clone(),
                predicted,
                actual,
                tally: points,
                total: points.total(),
            });
        }
    }

    pub fn add_all<'a>(&mut self, game: &Game, predictions: impl IntoIterator<Item = &'a Prediction>) {
        for prediction in predictions {
            self.add(game, prediction);
        }
    }

    pub fn finish(self) -> Aggregate {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::policy::DEFAULT_QUANTUM;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn game(id: i64, score: Option<Score>) -> Game {
        Game {
            id: Some(id),
            competition_id: 1,
            home_team: "England".into(),
            away_team: "Wales".into(),
            score,
            match_time: Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap(),
            detail: None,
        }
    }

    fn prediction(league_id: i64, nickname: &str, predicted: Option<Score>) -> Prediction {
        Prediction {
            id: None,
            league_id,
            game_id: 1,
            competitor_id: 1,
            nickname: nickname.into(),
            predicted,
        }
    }

    #[test]
    fn test_groups_by_nickname() {
        let mut agg = Aggregator::new(1, ScoringPolicy::Standard, DEFAULT_QUANTUM, false);
        let g1 = game(1, Some(Score::new(2, 1)));
        let g2 = game(2, Some(Score::new(0, 0)));
        agg.add(&g1, &prediction(1, "alice", Some(Score::new(2, 1))));
        agg.add(&g1, &prediction(1, "bob", Some(Score::new(0, 1))));
        agg.add(&g2, &prediction(1, "alice", Some(Score::new(1, 1))));
        let out = agg.finish();

        assert_eq!(out.tallies.len(), 2);
        let alice = out.tallies["alice"];
        assert_eq!(alice.count, 2);
        // 6 for the exact score, then gd 1 + result 2 for the draw
        assert_relative_eq!(alice.total(), 9.0);
        let bob = out.tallies["bob"];
        assert_eq!(bob.count, 1);
        assert_relative_eq!(bob.total(), 1.0);
        assert!(out.details.is_empty());
    }

    #[test]
    fn test_details_are_totalled_individually() {
        let mut agg = Aggregator::new(1, ScoringPolicy::Standard, DEFAULT_QUANTUM, true);
        let g = game(1, Some(Score::new(2, 1)));
        agg.add(&g, &prediction(1, "alice", Some(Score::new(2, 1))));
        agg.add(&g, &prediction(1, "bob", Some(Score::new(1, 0))));
        let out = agg.finish();

        assert_eq!(out.details.len(), 2);
        assert_relative_eq!(out.details[0].total, 6.0);
        assert_eq!(out.details[1].nickname, "bob");
        assert_relative_eq!(out.details[1].total, 3.0);
        assert_eq!(out.details[1].tally.count, 1);
    }

    #[test]
    fn test_ignores_other_leagues_unplayed_games_and_blank_predictions() {
        let mut agg = Aggregator::new(1, ScoringPolicy::Standard, DEFAULT_QUANTUM, true);
        let played = game(1, Some(Score::new(1, 0)));
        let unplayed = game(2, None);
        agg.add(&played, &prediction(2, "carol", Some(Score::new(1, 0))));
        agg.add(&unplayed, &prediction(1, "alice", Some(Score::new(1, 0))));
        agg.add(&played, &prediction(1, "dave", None));
        let out = agg.finish();

        assert!(out.tallies.is_empty());
        assert!(out.details.is_empty());
    }
}

//! JSON fixture import.
//!
//! Everything is validated before the first write: scores must be
//! non-negative or `-1` on both sides (unknown), game references must resolve and
//! predictions may only come from the league's registered competitors.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::db::models::{Competition, Competitor, Game, League, Prediction, Score, UNSET_SCORE};
use crate::db::Database;
use crate::error::{Result, StandingsError};
use crate::scoring::ScoringPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueFixture {
    pub competitions: Vec<CompetitionFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompetitionFixture {
    pub name: String,
    /// Falls back to a guess from the name when absent
    #[serde(default)]
    pub scoring: Option<ScoringPolicy>,
    #[serde(default)]
    pub games: Vec<GameFixture>,
    #[serde(default)]
    pub leagues: Vec<LeagueEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFixture {
    /// Fixture-local name that predictions refer to
    pub key: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default = "unset_score")]
    pub home_score: i64,
    #[serde(default = "unset_score")]
    pub away_score: i64,
    pub match_time: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueEntry {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Defaults to the day before `start`
    #[serde(default)]
    pub cursor: Option<NaiveDate>,
    pub competitors: Vec<String>,
    #[serde(default)]
    pub predictions: Vec<PredictionFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionFixture {
    pub nickname: String,
    pub game: String,
    pub home_score: i64,
    pub away_score: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub competitions: usize,
    pub games: usize,
    pub competitors: usize,
    pub predictions: usize,
    /// League name → assigned id
    pub leagues: Vec<(String, i64)>,
}

fn unset_score() -> i64 {
    UNSET_SCORE
}

pub fn load_fixture(path: &Path) -> Result<LeagueFixture> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Check the whole fixture without touching the database.
pub fn validate(fixture: &LeagueFixture) -> Result<()> {
    for competition in &fixture.competitions {
        let mut keys = HashSet::new();
        for game in &competition.games {
            let context = format!("game '{}'", game.key);
            Score::validate(game.home_score, game.away_score, &context)?;
            if !keys.insert(game.key.as_str()) {
                return Err(StandingsError::InvalidScore {
                    value: UNSET_SCORE,
                    context: format!("duplicate game key '{}'", game.key),
                });
            }
        }

        for league in &competition.leagues {
            let entered: HashSet<&str> = league.competitors.iter().map(String::as_str).collect();
            for prediction in &league.predictions {
                let context = format!("{}'s prediction for '{}'", prediction.nickname, prediction.game);
                Score::validate(prediction.home_score, prediction.away_score, &context)?;
                if !keys.contains(prediction.game.as_str()) {
                    return Err(StandingsError::not_found("game", &prediction.game));
                }
                if !entered.contains(prediction.nickname.as_str()) {
                    return Err(StandingsError::not_found("competitor", &prediction.nickname));
                }
            }
        }
    }
    Ok(())
}

pub fn import_fixture(db: &Database, fixture: &LeagueFixture) -> Result<ImportSummary> {
    validate(fixture)?;
    let mut summary = ImportSummary::default();

    for competition in &fixture.competitions {
        let scoring = competition
            .scoring
            .unwrap_or_else(|| ScoringPolicy::from_competition_name(&competition.name));
        let competition_id = db.insert_competition(&Competition {
            id: None,
            name: competition.name.clone(),
            scoring,
        })?;
        summary.competitions += 1;

        let mut game_ids = HashMap::new();
        for game in &competition.games {
            let score = Score::validate(game.home_score, game.away_score, &game.key)?;
            let id = db.insert_game(&Game {
                id: None,
                competition_id,
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                score,
                match_time: game.match_time,
                detail: game.detail.clone(),
            })?;
            game_ids.insert(game.key.as_str(), id);
            summary.games += 1;
        }

        for entry in &competition.leagues {
            let cursor = entry
                .cursor
                .or_else(|| entry.start.pred_opt())
                .unwrap_or(entry.start);
            let league_id = db.insert_league(&League {
                id: None,
                competition_id,
                name: entry.name.clone(),
                start: entry.start,
                end: entry.end,
                cursor,
            })?;

            let mut competitor_ids = HashMap::new();
            for nickname in &entry.competitors {
                let id = db.insert_competitor(&Competitor {
                    id: None,
                    league_id,
                    nickname: nickname.clone(),
                })?;
                competitor_ids.insert(nickname.as_str(), id);
                summary.competitors += 1;
            }

            for p in &entry.predictions {
                let game_id = *game_ids
                    .get(p.game.as_str())
                    .ok_or_else(|| StandingsError::not_found("game", &p.game))?;
                let competitor_id = *competitor_ids
                    .get(p.nickname.as_str())
                    .ok_or_else(|| StandingsError::not_found("competitor", &p.nickname))?;
                db.upsert_prediction(&Prediction {
                    id: None,
                    league_id,
                    game_id,
                    competitor_id,
                    nickname: p.nickname.clone(),
                    predicted: Score::validate(p.home_score, p.away_score, &p.game)?,
                })?;
                summary.predictions += 1;
            }

            info!(
                "Imported league '{}' (id {}, scoring {}, cursor {})",
                entry.name, league_id, scoring, cursor
            );
            summary.leagues.push((entry.name.clone(), league_id));
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standings::store::{PointStore, PredictionSource};

    const SIX_NATIONS: &str = r#"{
      "competitions": [{
        "name": "Six Nations egg chasing",
        "games": [
          {"key": "eng-fra", "home_team": "England", "away_team": "France",
           "home_score": 24, "away_score": 17, "match_time": "2024-03-16T20:00:00Z"},
          {"key": "ire-sco", "home_team": "Ireland", "away_team": "Scotland",
           "match_time": "2024-03-16T16:45:00Z"}
        ],
        "leagues": [{
          "name": "Rugby club",
          "start": "2024-02-02",
          "end": "2024-03-16",
          "competitors": ["alice", "bob"],
          "predictions": [
            {"nickname": "alice", "game": "eng-fra", "home_score": 21, "away_score": 18},
            {"nickname": "bob", "game": "ire-sco", "home_score": 30, "away_score": 10}
          ]
        }]
      }]
    }"#;

    #[tokio::test]
    async fn test_import_six_nations() {
        let db = Database::open_in_memory().unwrap();
        let fixture: LeagueFixture = serde_json::from_str(SIX_NATIONS).unwrap();
        let summary = import_fixture(&db, &fixture).unwrap();
        assert_eq!(summary.games, 2);
        assert_eq!(summary.competitors, 2);
        assert_eq!(summary.predictions, 2);

        let (_, league_id) = summary.leagues[0];
        let league = db.league(league_id).await.unwrap();
        assert_eq!(league.cursor, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        let competition = db.competition(league.competition_id).await.unwrap();
        assert_eq!(
            competition.scoring,
            ScoringPolicy::ToleranceBased { tolerance: 3 }
        );

        let alice = db.competitors(league_id).await.unwrap()[0].id.unwrap();
        let predictions = db.predictions_for_competitor(alice, league_id).await.unwrap();
        assert_eq!(predictions[0].predicted, Some(Score::new(21, 18)));
    }

    #[tokio::test]
    async fn test_rejects_negative_score_before_writing() {
        let bad = SIX_NATIONS.replace(r#""home_score": 21"#, r#""home_score": -4"#);
        let fixture: LeagueFixture = serde_json::from_str(&bad).unwrap();
        let db = Database::open_in_memory().unwrap();
        let err = import_fixture(&db, &fixture).unwrap_err();
        assert!(matches!(err, StandingsError::InvalidScore { value: -4, .. }));

        assert!(matches!(
            db.competition(1).await,
            Err(StandingsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_game_with_one_side_missing() {
        let half = SIX_NATIONS.replace(r#", "away_score": 17"#, "");
        let fixture: LeagueFixture = serde_json::from_str(&half).unwrap();
        assert!(matches!(
            validate(&fixture),
            Err(StandingsError::InvalidScore { value: -1, .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_game_and_competitor() {
        let fixture: LeagueFixture =
            serde_json::from_str(&SIX_NATIONS.replace(r#""game": "ire-sco""#, r#""game": "wal-ita""#))
                .unwrap();
        assert!(matches!(
            validate(&fixture),
            Err(StandingsError::NotFound { entity: "game", .. })
        ));

        let fixture: LeagueFixture =
            serde_json::from_str(&SIX_NATIONS.replace(r#""nickname": "bob""#, r#""nickname": "eve""#))
                .unwrap();
        assert!(matches!(
            validate(&fixture),
            Err(StandingsError::NotFound { entity: "competitor", .. })
        ));
    }
}

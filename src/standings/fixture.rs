//! In-memory league used by the standings tests.
//!
//! Euro 2024 group games, scored with the standard policy:
//!
//! | day   | game                      | alice | bob | carol |
//! |-------|---------------------------|-------|-----|-------|
//! | 06-14 | Germany 5-1 Scotland      | 5-1 (6) | 2-0 (2) | – |
//! | 06-15 | Hungary 1-3 Switzerland   | 1-2 (3) | 1-3 (6) | – |
//! | 06-15 | Spain 3-0 Croatia         | 2-0 (3) | – | 1-0 (3) |
//! | 06-17 | Romania 3-0 Ukraine       | 0-0 (1) | 3-0 (6) | – |
//! | 06-18 | Turkey v Georgia (unplayed) | 1-1 | – | – |
use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use super::engine::StandingsEngine;
use super::retry::StoreRetry;
use super::store::PointStore;
use crate::db::models::{Competition, Competitor, Game, League, PointRecord, Prediction, Score};
use crate::db::Database;
use crate::scoring::{ScoringPolicy, Tally, DEFAULT_QUANTUM};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Fixture {
    pub db: Database,
    pub engine: StandingsEngine<Database>,
    pub competition_id: i64,
    pub league_id: i64,
    pub game_ids: Vec<i64>,
}

impl Fixture {
    pub async fn empty_league() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let competition_id = db
            .insert_competition(&Competition {
                id: None,
                name: "Euro 2024".into(),
                scoring: ScoringPolicy::Standard,
            })
            .unwrap();
        let league_id = db
            .insert_league(&League {
                id: None,
                competition_id,
                name: "Office sweepstake".into(),
                start: date(2024, 6, 14),
                end: date(2024, 7, 14),
                cursor: date(2024, 6, 13),
            })
            .unwrap();
        let engine = StandingsEngine::new(
            Arc::new(db.clone()),
            StoreRetry::default(),
            DEFAULT_QUANTUM,
        );
        Fixture {
            db,
            engine,
            competition_id,
            league_id,
            game_ids: Vec::new(),
        }
    }

    pub async fn euro_league() -> Fixture {
        let mut fx = Fixture::empty_league().await;
        for nickname in ["alice", "bob", "carol"] {
            fx.competitor(nickname).await;
        }

        let games = [
            ("Germany", "Scotland", Some(Score::new(5, 1)), (2024, 6, 14, 19)),
            ("Hungary", "Switzerland", Some(Score::new(1, 3)), (2024, 6, 15, 13)),
            ("Spain", "Croatia", Some(Score::new(3, 0)), (2024, 6, 15, 16)),
            ("Romania", "Ukraine", Some(Score::new(3, 0)), (2024, 6, 17, 13)),
            ("Turkey", "Georgia", None, (2024, 6, 18, 16)),
        ];
        for (home, away, score, (y, m, d, h)) in games {
            let id = fx.game(home, away, score, y, m, d, h);
            fx.game_ids.push(id);
        }

        let picks: [(&str, usize, (u32, u32)); 9] = [
            ("alice", 0, (5, 1)),
            ("alice", 1, (1, 2)),
            ("alice", 2, (2, 0)),
            ("alice", 3, (0, 0)),
            ("alice", 4, (1, 1)),
            ("bob", 0, (2, 0)),
            ("bob", 1, (1, 3)),
            ("bob", 3, (3, 0)),
            ("carol", 2, (1, 0)),
        ];
        for (nickname, game, (home, away)) in picks {
            fx.predict(nickname, fx.game_ids[game], Score::new(home, away))
                .await;
        }
        fx
    }

    /// Portugal 1-1 France on 2 July, which only alice called exactly.
    pub async fn add_july_game(&self) {
        let id = self.game("Portugal", "France", Some(Score::new(1, 1)), 2024, 7, 2, 19);
        self.predict("alice", id, Score::new(1, 1)).await;
    }

    pub fn origin(&self) -> NaiveDate {
        date(2024, 6, 13)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn game(
        &self,
        home: &str,
        away: &str,
        score: Option<Score>,
        y: i32,
        m: u32,
        d: u32,
        h: u32,
    ) -> i64 {
        self.db
            .insert_game(&Game {
                id: None,
                competition_id: self.competition_id,
                home_team: home.into(),
                away_team: away.into(),
                score,
                match_time: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
                detail: None,
            })
            .unwrap()
    }

    /// Competitor id for `nickname`, registering them if needed.
    pub async fn competitor(&self, nickname: &str) -> i64 {
        let existing = self.db.competitors(self.league_id).await.unwrap();
        if let Some(id) = existing
            .iter()
            .find(|c| c.nickname == nickname)
            .and_then(|c| c.id)
        {
            return id;
        }
        self.db
            .insert_competitor(&Competitor {
                id: None,
                league_id: self.league_id,
                nickname: nickname.into(),
            })
            .unwrap()
    }

    pub async fn predict(&self, nickname: &str, game_id: i64, score: Score) {
        let competitor_id = self.competitor(nickname).await;
        self.db
            .upsert_prediction(&Prediction {
                id: None,
                league_id: self.league_id,
                game_id,
                competitor_id,
                nickname: nickname.into(),
                predicted: Some(score),
            })
            .unwrap();
    }

    /// Write a daily record directly, bypassing `update_points`.
    pub async fn put_daily(&self, nickname: &str, day: NaiveDate, tally: Tally) {
        let competitor_id = self.competitor(nickname).await;
        self.db
            .save_point_record(&PointRecord {
                id: None,
                date: day,
                league_id: self.league_id,
                competitor_id,
                nickname: nickname.into(),
                tally,
                is_total: false,
            })
            .await
            .unwrap();
    }
}

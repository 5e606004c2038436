use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::error::{Result, StandingsError};
use crate::scoring::{ScoringPolicy, Tally};
use crate::standings::store::{GameSource, PointStore, PredictionSource};

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Fresh private database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Competitions & leagues ───────────────────────────────────────────────

    pub fn insert_competition(&self, competition: &Competition) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO competitions (name, scoring) VALUES (?1, ?2)",
            params![competition.name, serde_json::to_string(&competition.scoring)?],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_league(&self, league: &League) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO leagues (competition_id, name, start_date, end_date, cursor)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                league.competition_id,
                league.name,
                league.start,
                league.end,
                league.cursor,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_competitor(&self, competitor: &Competitor) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO competitors (league_id, nickname) VALUES (?1, ?2)",
            params![competitor.league_id, competitor.nickname],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ── Games & predictions ──────────────────────────────────────────────────

    pub fn insert_game(&self, game: &Game) -> Result<i64> {
        let (home, away) = Score::to_columns(game.score);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO games (competition_id, home_team, away_team,
                                home_score, away_score, match_time, detail)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                game.competition_id,
                game.home_team,
                game.away_team,
                home,
                away,
                game.match_time,
                game.detail,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record (or clear) a game's final score
    pub fn set_game_score(&self, game_id: i64, score: Option<Score>) -> Result<()> {
        let (home, away) = Score::to_columns(score);
        let changed = self.conn().execute(
            "UPDATE games SET home_score=?1, away_score=?2 WHERE id=?3",
            params![home, away, game_id],
        )?;
        if changed == 0 {
            return Err(StandingsError::not_found("game", game_id));
        }
        Ok(())
    }

    /// Insert or replace a competitor's prediction for a game
    pub fn upsert_prediction(&self, prediction: &Prediction) -> Result<i64> {
        let (home, away) = Score::to_columns(prediction.predicted);
        let conn = self.conn();
        let id = conn.query_row(
            "INSERT INTO predictions (league_id, game_id, competitor_id, home_score, away_score)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(league_id, game_id, competitor_id) DO UPDATE SET
                home_score=excluded.home_score,
                away_score=excluded.away_score
             RETURNING id",
            params![
                prediction.league_id,
                prediction.game_id,
                prediction.competitor_id,
                home,
                away,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn query_predictions(
        &self,
        filter_sql: &str,
        id: i64,
        league_id: i64,
    ) -> Result<Vec<Prediction>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT p.id, p.league_id, p.game_id, p.competitor_id, c.nickname,
                    p.home_score, p.away_score
             FROM predictions p JOIN competitors c ON c.id = p.competitor_id
             WHERE {} = ?1 AND p.league_id = ?2
             ORDER BY c.nickname, p.game_id",
            filter_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id, league_id], map_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl PointStore for Database {
    async fn league(&self, league_id: i64) -> Result<League> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, competition_id, name, start_date, end_date, cursor
             FROM leagues WHERE id = ?1",
            params![league_id],
            map_league,
        )
        .optional()?
        .ok_or_else(|| StandingsError::not_found("league", league_id))
    }

    async fn competition(&self, competition_id: i64) -> Result<Competition> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, scoring FROM competitions WHERE id = ?1",
            params![competition_id],
            map_competition,
        )
        .optional()?
        .ok_or_else(|| StandingsError::not_found("competition", competition_id))
    }

    async fn competitors(&self, league_id: i64) -> Result<Vec<Competitor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, league_id, nickname FROM competitors
             WHERE league_id = ?1 ORDER BY nickname",
        )?;
        let rows = stmt
            .query_map(params![league_id], |row| {
                Ok(Competitor {
                    id: row.get(0)?,
                    league_id: row.get(1)?,
                    nickname: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn point_records(
        &self,
        league_id: i64,
        date: NaiveDate,
        is_total: bool,
    ) -> Result<Vec<PointRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.date, p.league_id, p.competitor_id, c.nickname,
                    p.perfect, p.goal_difference, p.goals, p.result, p.count, p.is_total
             FROM point_info p JOIN competitors c ON c.id = p.competitor_id
             WHERE p.league_id = ?1 AND p.date = ?2 AND p.is_total = ?3
             ORDER BY c.nickname, p.id",
        )?;
        let rows = stmt
            .query_map(params![league_id, date, is_total], map_point_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn save_point_record(&self, record: &PointRecord) -> Result<i64> {
        let conn = self.conn();
        let t = &record.tally;
        match record.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE point_info SET date=?1, league_id=?2, competitor_id=?3,
                        perfect=?4, goal_difference=?5, goals=?6, result=?7, count=?8,
                        is_total=?9
                     WHERE id=?10",
                    params![
                        record.date,
                        record.league_id,
                        record.competitor_id,
                        t.perfect,
                        t.goal_difference,
                        t.goals,
                        t.result,
                        t.count,
                        record.is_total,
                        id,
                    ],
                )?;
                if changed == 0 {
                    return Err(StandingsError::not_found("point record", id));
                }
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO point_info (date, league_id, competitor_id, perfect,
                        goal_difference, goals, result, count, is_total)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        record.date,
                        record.league_id,
                        record.competitor_id,
                        t.perfect,
                        t.goal_difference,
                        t.goals,
                        t.result,
                        t.count,
                        record.is_total,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    async fn delete_point_record(&self, record_id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM point_info WHERE id = ?1", params![record_id])?;
        Ok(())
    }

    async fn set_cursor(&self, league_id: i64, cursor: NaiveDate) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE leagues SET cursor = ?1 WHERE id = ?2",
            params![cursor, league_id],
        )?;
        if changed == 0 {
            return Err(StandingsError::not_found("league", league_id));
        }
        Ok(())
    }
}

#[async_trait]
impl GameSource for Database {
    async fn completed_games(
        &self,
        competition_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Game>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, competition_id, home_team, away_team, home_score, away_score,
                    match_time, detail
             FROM games
             WHERE competition_id = ?1 AND match_time >= ?2 AND match_time < ?3
               AND home_score >= 0 AND away_score >= 0
             ORDER BY match_time, id",
        )?;
        let games = stmt
            .query_map(params![competition_id, from, to], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }
}

#[async_trait]
impl PredictionSource for Database {
    async fn predictions_for_game(&self, game_id: i64, league_id: i64) -> Result<Vec<Prediction>> {
        self.query_predictions("p.game_id", game_id, league_id)
    }

    async fn predictions_for_competitor(
        &self,
        competitor_id: i64,
        league_id: i64,
    ) -> Result<Vec<Prediction>> {
        self.query_predictions("p.competitor_id", competitor_id, league_id)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_competition(row: &rusqlite::Row) -> rusqlite::Result<Competition> {
    let scoring: String = row.get(2)?;
    let scoring: ScoringPolicy = serde_json::from_str(&scoring)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(Competition {
        id: row.get(0)?,
        name: row.get(1)?,
        scoring,
    })
}

fn map_league(row: &rusqlite::Row) -> rusqlite::Result<League> {
    Ok(League {
        id: row.get(0)?,
        competition_id: row.get(1)?,
        name: row.get(2)?,
        start: row.get(3)?,
        end: row.get(4)?,
        cursor: row.get(5)?,
    })
}

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
    Ok(Game {
        id: row.get(0)?,
        competition_id: row.get(1)?,
        home_team: row.get(2)?,
        away_team: row.get(3)?,
        score: Score::from_columns(row.get(4)?, row.get(5)?),
        match_time: row.get(6)?,
        detail: row.get(7)?,
    })
}

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        id: row.get(0)?,
        league_id: row.get(1)?,
        game_id: row.get(2)?,
        competitor_id: row.get(3)?,
        nickname: row.get(4)?,
        predicted: Score::from_columns(row.get(5)?, row.get(6)?),
    })
}

fn map_point_record(row: &rusqlite::Row) -> rusqlite::Result<PointRecord> {
    Ok(PointRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        league_id: row.get(2)?,
        competitor_id: row.get(3)?,
        nickname: row.get(4)?,
        tally: Tally {
            perfect: row.get(5)?,
            goal_difference: row.get(6)?,
            goals: row.get(7)?,
            result: row.get(8)?,
            count: row.get(9)?,
        },
        is_total: row.get(10)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS competitions (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT    NOT NULL,
    scoring  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS leagues (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    competition_id  INTEGER NOT NULL,
    name            TEXT    NOT NULL,
    start_date      TEXT    NOT NULL,
    end_date        TEXT    NOT NULL,
    cursor          TEXT    NOT NULL,
    FOREIGN KEY (competition_id) REFERENCES competitions(id)
);

CREATE TABLE IF NOT EXISTS competitors (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    league_id  INTEGER NOT NULL,
    nickname   TEXT    NOT NULL,
    UNIQUE (league_id, nickname),
    FOREIGN KEY (league_id) REFERENCES leagues(id)
);

CREATE TABLE IF NOT EXISTS games (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    competition_id  INTEGER NOT NULL,
    home_team       TEXT    NOT NULL,
    away_team       TEXT    NOT NULL,
    home_score      INTEGER NOT NULL DEFAULT -1,
    away_score      INTEGER NOT NULL DEFAULT -1,
    match_time      TEXT    NOT NULL,
    detail          TEXT,
    FOREIGN KEY (competition_id) REFERENCES competitions(id)
);

CREATE TABLE IF NOT EXISTS predictions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    league_id      INTEGER NOT NULL,
    game_id        INTEGER NOT NULL,
    competitor_id  INTEGER NOT NULL,
    home_score     INTEGER NOT NULL DEFAULT -1,
    away_score     INTEGER NOT NULL DEFAULT -1,
    UNIQUE (league_id, game_id, competitor_id),
    FOREIGN KEY (league_id) REFERENCES leagues(id),
    FOREIGN KEY (game_id) REFERENCES games(id),
    FOREIGN KEY (competitor_id) REFERENCES competitors(id)
);

CREATE TABLE IF NOT EXISTS point_info (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    date             TEXT    NOT NULL,
    league_id        INTEGER NOT NULL,
    competitor_id    INTEGER NOT NULL,
    perfect          REAL    NOT NULL DEFAULT 0,
    goal_difference  REAL    NOT NULL DEFAULT 0,
    goals            REAL    NOT NULL DEFAULT 0,
    result           REAL    NOT NULL DEFAULT 0,
    count            INTEGER NOT NULL DEFAULT 0,
    is_total         INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (league_id) REFERENCES leagues(id),
    FOREIGN KEY (competitor_id) REFERENCES competitors(id)
);

CREATE INDEX IF NOT EXISTS idx_games_competition_time ON games(competition_id, match_time);
CREATE INDEX IF NOT EXISTS idx_predictions_game ON predictions(game_id, league_id);
CREATE INDEX IF NOT EXISTS idx_point_info_lookup ON point_info(league_id, date, is_total);
"#;

//! SQLite storage for matches and predictions

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::data::cleaning::clean_with_known_labels;
use crate::data::import::DataImporter;
use crate::predict::tipping::{is_correct, MatchTip};
use crate::{MatchRecord, MatchRow, Result, TipError};

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                season INTEGER NOT NULL,
                round_label TEXT NOT NULL,
                round_number INTEGER NOT NULL,
                venue TEXT,
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                extra TEXT NOT NULL DEFAULT '{}',
                UNIQUE(season, round_number, home_team, away_team)
            );

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL REFERENCES matches(id),
                ml_model TEXT NOT NULL,
                predicted_winner TEXT NOT NULL,
                predicted_margin REAL NOT NULL,
                is_correct INTEGER,
                UNIQUE(match_id, ml_model)
            );

            CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);
            "#,
        )?;
        Ok(())
    }

    // ==================== Match Operations ====================

    /// Insert or update a match; `row` carries the resolved round number
    pub fn upsert_match(&self, record: &MatchRecord, row: &MatchRow) -> Result<i64> {
        let extra =
            serde_json::to_string(&record.extra).map_err(|e| TipError::Parse(e.to_string()))?;
        self.conn.execute(
            r#"
            INSERT INTO matches (date, season, round_label, round_number, venue,
                                 home_team, away_team, home_score, away_score, extra)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(season, round_number, home_team, away_team) DO UPDATE SET
                date = excluded.date,
                home_score = COALESCE(excluded.home_score, home_score),
                away_score = COALESCE(excluded.away_score, away_score),
                venue = COALESCE(excluded.venue, venue),
                extra = excluded.extra
            "#,
            params![
                row.date.format("%Y-%m-%d").to_string(),
                row.year,
                record.round_label,
                row.round_number,
                row.venue,
                row.home_team,
                row.away_team,
                row.home_score,
                row.away_score,
                extra,
            ],
        )?;

        self.match_id(row.year, row.round_number, &row.home_team, &row.away_team)?
            .ok_or_else(|| {
                TipError::Parse(format!(
                    "Match {} v {} not stored",
                    row.home_team, row.away_team
                ))
            })
    }

    /// Insert or update several matches; records and rows are paired by index
    pub fn upsert_matches(&self, records: &[MatchRecord], rows: &[MatchRow]) -> Result<usize> {
        let mut count = 0;
        for (record, row) in records.iter().zip(rows) {
            self.upsert_match(record, row)?;
            count += 1;
        }
        Ok(count)
    }

    /// Clean and store raw records, resolving finals against every round
    /// label already stored for their seasons
    pub fn import_records(&self, records: &[MatchRecord]) -> Result<usize> {
        let seasons: BTreeSet<i32> = records.iter().map(MatchRecord::year).collect();
        let known = self.season_round_labels(&seasons)?;
        let rows = clean_with_known_labels(records, None, &known)?;
        self.upsert_matches(records, &rows)
    }

    /// Distinct stored round labels for each season
    pub fn season_round_labels(&self, seasons: &BTreeSet<i32>) -> Result<BTreeMap<i32, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT round_label FROM matches WHERE season = ?1")?;

        let mut labels = BTreeMap::new();
        for &season in seasons {
            let stored = stmt
                .query_map(params![season], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if !stored.is_empty() {
                labels.insert(season, stored);
            }
        }
        Ok(labels)
    }

    fn match_id(
        &self,
        year: i32,
        round_number: u32,
        home_team: &str,
        away_team: &str,
    ) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM matches
                 WHERE season = ?1 AND round_number = ?2 AND home_team = ?3 AND away_team = ?4",
                params![year, round_number, home_team, away_team],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Find the match two teams played in a round, in either home/away order
    pub fn find_match(
        &self,
        year: i32,
        round_number: u32,
        team: &str,
        oppo_team: &str,
    ) -> Result<Option<(i64, MatchRow)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, season, round_number, venue, home_team, away_team,
                    home_score, away_score, extra
             FROM matches
             WHERE season = ?1 AND round_number = ?2
               AND ((home_team = ?3 AND away_team = ?4) OR (home_team = ?4 AND away_team = ?3))",
        )?;
        let found = stmt
            .query_row(params![year, round_number, team, oppo_team], |row| {
                Ok((row.get::<_, i64>(0)?, Self::row_to_match_row(row, 1)?))
            })
            .optional()?;
        Ok(found)
    }

    /// Raw records dated within `[start, end]`
    pub fn get_records_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MatchRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, season, round_label, venue, home_team, away_team,
                    home_score, away_score, extra
             FROM matches
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date, id",
        )?;

        let records = stmt
            .query_map(
                params![
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string()
                ],
                Self::row_to_record,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MatchRecord> {
        let date_str: String = row.get(0)?;
        let extra_json: String = row.get(8)?;
        Ok(MatchRecord {
            season: Some(row.get(1)?),
            round_label: row.get(2)?,
            date: parse_date(&date_str)?,
            venue: row.get(3)?,
            home_team: row.get(4)?,
            away_team: row.get(5)?,
            home_score: row.get(6)?,
            away_score: row.get(7)?,
            extra: serde_json::from_str(&extra_json).unwrap_or_default(),
        })
    }

    fn row_to_match_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<MatchRow> {
        let date_str: String = row.get(offset)?;
        let extra_json: String = row.get(offset + 8)?;
        Ok(MatchRow {
            date: parse_date(&date_str)?,
            year: row.get(offset + 1)?,
            round_number: row.get(offset + 2)?,
            venue: row.get(offset + 3)?,
            home_team: row.get(offset + 4)?,
            away_team: row.get(offset + 5)?,
            home_score: row.get(offset + 6)?,
            away_score: row.get(offset + 7)?,
            extra: serde_json::from_str::<BTreeMap<String, f64>>(&extra_json).unwrap_or_default(),
        })
    }

    // ==================== Prediction Operations ====================

    /// Create or update the prediction for a tip's match and model
    ///
    /// Returns false when the match isn't stored yet.
    pub fn update_or_create_prediction(&self, tip: &MatchTip) -> Result<bool> {
        let Some((match_id, row)) =
            self.find_match(tip.year, tip.round_number, &tip.home_team, &tip.away_team)?
        else {
            log::warn!(
                "No stored match for {} v {} in {} round {}",
                tip.home_team,
                tip.away_team,
                tip.year,
                tip.round_number
            );
            return Ok(false);
        };

        let correct = is_correct(&tip.predicted_winner, &row);
        self.conn.execute(
            r#"
            INSERT INTO predictions (match_id, ml_model, predicted_winner, predicted_margin, is_correct)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(match_id, ml_model) DO UPDATE SET
                predicted_winner = excluded.predicted_winner,
                predicted_margin = excluded.predicted_margin,
                is_correct = excluded.is_correct
            "#,
            params![
                match_id,
                tip.ml_model,
                tip.predicted_winner,
                tip.predicted_margin,
                correct
            ],
        )?;
        Ok(true)
    }

    /// Recompute `is_correct` for every stored prediction
    pub fn backfill_correctness(&self) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.predicted_winner,
                    m.date, m.season, m.round_number, m.venue, m.home_team, m.away_team,
                    m.home_score, m.away_score, m.extra
             FROM predictions p JOIN matches m ON m.id = p.match_id",
        )?;
        let stored = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    Self::row_to_match_row(row, 2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (id, predicted_winner, match_row) in &stored {
            self.conn.execute(
                "UPDATE predictions SET is_correct = ?1 WHERE id = ?2",
                params![is_correct(predicted_winner, match_row), id],
            )?;
        }
        Ok(stored.len())
    }

    /// Stored predictions as (year, round, model, predicted winner, correct)
    pub fn get_prediction_results(&self) -> Result<Vec<StoredPrediction>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.season, m.round_number, p.ml_model, p.predicted_winner,
                    p.predicted_margin, p.is_correct
             FROM predictions p JOIN matches m ON m.id = p.match_id
             ORDER BY m.season, m.round_number, p.ml_model, m.id",
        )?;
        let predictions = stmt
            .query_map([], |row| {
                Ok(StoredPrediction {
                    year: row.get(0)?,
                    round_number: row.get(1)?,
                    ml_model: row.get(2)?,
                    predicted_winner: row.get(3)?,
                    predicted_margin: row.get(4)?,
                    is_correct: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(predictions)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let match_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;

        let prediction_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;

        let min_date: Option<String> = self
            .conn
            .query_row("SELECT MIN(date) FROM matches", [], |row| row.get(0))
            .optional()?
            .flatten();

        let max_date: Option<String> = self
            .conn
            .query_row("SELECT MAX(date) FROM matches", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            match_count: match_count as usize,
            prediction_count: prediction_count as usize,
            earliest_match: min_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            latest_match: max_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        })
    }
}

impl DataImporter for Database {
    fn match_results(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        _fetch_data: bool,
    ) -> Result<Vec<MatchRecord>> {
        Ok(self
            .get_records_in_range(start, end)?
            .into_iter()
            .filter(|r| r.home_score.is_some() && r.away_score.is_some())
            .collect())
    }

    fn fixtures(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MatchRecord>> {
        self.get_records_in_range(start, end)
    }
}

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// A prediction as stored, with its match's round
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPrediction {
    pub year: i32,
    pub round_number: u32,
    pub ml_model: String,
    pub predicted_winner: String,
    pub predicted_margin: f64,
    pub is_correct: Option<bool>,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub match_count: usize,
    pub prediction_count: usize,
    pub earliest_match: Option<NaiveDate>,
    pub latest_match: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(label: &str, day: u32, scores: Option<(u32, u32)>) -> MatchRecord {
        MatchRecord {
            season: Some(2016),
            round_label: label.to_string(),
            date: NaiveDate::from_ymd_opt(2016, 4, day).unwrap(),
            venue: Some("M.C.G.".to_string()),
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            home_score: scores.map(|s| s.0),
            away_score: scores.map(|s| s.1),
            extra: BTreeMap::new(),
        }
    }

    fn make_tip(winner: &str) -> MatchTip {
        MatchTip {
            year: 2016,
            round_number: 5,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            ml_model: "betting_lasso".to_string(),
            predicted_winner: winner.to_string(),
            predicted_margin: 12.5,
        }
    }

    fn store(db: &Database, records: &[MatchRecord]) {
        db.import_records(records).unwrap();
    }

    #[test]
    fn test_create_database() {
        let db = Database::in_memory().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.match_count, 0);
        assert_eq!(stats.prediction_count, 0);
    }

    #[test]
    fn test_upsert_match_fills_in_scores() {
        let db = Database::in_memory().unwrap();
        store(&db, &[make_record("Round 5", 23, None)]);
        store(&db, &[make_record("Round 5", 23, Some((100, 80)))]);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.match_count, 1);

        let (_, row) = db.find_match(2016, 5, "Carlton", "Richmond").unwrap().unwrap();
        assert_eq!(row.margin(), Some(20));
    }

    #[test]
    fn test_prediction_create_then_update() {
        let db = Database::in_memory().unwrap();
        store(&db, &[make_record("Round 5", 23, None)]);

        assert!(db.update_or_create_prediction(&make_tip("Carlton")).unwrap());
        assert!(db.update_or_create_prediction(&make_tip("Richmond")).unwrap());

        let stored = db.get_prediction_results().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].predicted_winner, "Richmond");
        assert_eq!(stored[0].is_correct, None);
    }

    #[test]
    fn test_backfill_after_results_arrive() {
        let db = Database::in_memory().unwrap();
        store(&db, &[make_record("Round 5", 23, None)]);
        db.update_or_create_prediction(&make_tip("Richmond")).unwrap();

        store(&db, &[make_record("Round 5", 23, Some((100, 80)))]);
        assert_eq!(db.backfill_correctness().unwrap(), 1);

        let stored = db.get_prediction_results().unwrap();
        assert_eq!(stored[0].is_correct, Some(true));
    }

    #[test]
    fn test_prediction_for_unknown_match_is_skipped() {
        let db = Database::in_memory().unwrap();
        assert!(!db.update_or_create_prediction(&make_tip("Richmond")).unwrap());
    }

    #[test]
    fn test_importer_splits_results_and_fixtures() {
        let db = Database::in_memory().unwrap();
        let mut upcoming = make_record("Round 6", 30, None);
        upcoming.home_team = "Geelong".to_string();
        store(&db, &[make_record("Round 5", 23, Some((100, 80))), upcoming]);

        let start = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2016, 12, 31).unwrap();
        assert_eq!(db.match_results(start, end, false).unwrap().len(), 1);
        assert_eq!(db.fixtures(start, end).unwrap().len(), 2);
    }

    #[test]
    fn test_finals_only_import_keeps_regular_rounds() {
        let db = Database::in_memory().unwrap();
        let mut last_round = make_record("Round 23", 20, Some((60, 70)));
        last_round.home_team = "Geelong".to_string();
        store(&db, &[make_record("Round 1", 2, Some((70, 90))), last_round]);

        store(&db, &[make_record("Qualifying Final", 29, Some((100, 80)))]);

        assert_eq!(db.get_stats().unwrap().match_count, 3);

        let (_, first) = db.find_match(2016, 1, "Richmond", "Carlton").unwrap().unwrap();
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2016, 4, 2).unwrap());
        assert_eq!(first.margin(), Some(-20));

        let (_, final_row) = db.find_match(2016, 24, "Richmond", "Carlton").unwrap().unwrap();
        assert_eq!(final_row.margin(), Some(20));
    }
}

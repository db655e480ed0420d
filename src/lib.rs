//! Footy tipping: margin prediction and multi-season backtesting
//!
//! Turns per-match results into a leakage-free, per-team feature table and
//! drives year-windowed train/predict loops over any margin estimator.

pub mod data;
pub mod features;
pub mod predict;
pub mod training;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A single fixture or result as delivered by a data importer
///
/// Extra numeric columns (betting odds and the like) are kept in `extra`.
/// Keys prefixed with `home_`/`away_` are treated as home/away pairs when the
/// match is stacked into team-perspective rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Season; falls back to the year of `date` when absent
    #[serde(default)]
    pub season: Option<i32>,
    /// Raw round label, e.g. "Round 3" or "Qualifying Final"
    pub round_label: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub venue: Option<String>,
    pub home_team: String,
    pub away_team: String,
    /// Absent for fixtures that haven't been played
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl MatchRecord {
    /// Season the match belongs to
    pub fn year(&self) -> i32 {
        self.season.unwrap_or_else(|| self.date.year())
    }
}

/// A cleaned match: year and round number resolved, team names canonical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub year: i32,
    pub round_number: u32,
    pub date: NaiveDate,
    pub venue: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub extra: BTreeMap<String, f64>,
}

impl MatchRow {
    /// Whether both scores are known
    pub fn has_been_played(&self) -> bool {
        self.home_score.is_some() && self.away_score.is_some()
    }

    /// Returns the winning team, or None for a draw or an unplayed match
    pub fn winner(&self) -> Option<&str> {
        match (self.home_score, self.away_score) {
            (Some(home), Some(away)) if home > away => Some(&self.home_team),
            (Some(home), Some(away)) if away > home => Some(&self.away_team),
            _ => None,
        }
    }

    /// Returns true if the match was played and ended level
    pub fn is_draw(&self) -> bool {
        matches!((self.home_score, self.away_score), (Some(h), Some(a)) if h == a)
    }

    /// Home score minus away score (positive = home win)
    pub fn margin(&self) -> Option<i64> {
        match (self.home_score, self.away_score) {
            (Some(home), Some(away)) => Some(home as i64 - away as i64),
            _ => None,
        }
    }
}

/// One model's predicted margin for one team in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub team: String,
    pub year: i32,
    pub round_number: u32,
    pub at_home: u8,
    pub oppo_team: String,
    pub ml_model: String,
    pub predicted_margin: f64,
}

impl fmt::Display for PredictionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} R{} {} v {} [{}]: {:+.1}",
            self.year, self.round_number, self.team, self.oppo_team, self.ml_model,
            self.predicted_margin
        )
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum TipError {
    #[error("Round label {0:?} doesn't match any known patterns")]
    UnrecognizedRoundLabel(String),

    #[error("Missing required columns {columns:?}: {context}")]
    MissingRequiredColumns {
        columns: Vec<String>,
        context: String,
    },

    #[error("No data for year range {years}: {detail}")]
    EmptyDataset { years: String, detail: String },

    #[error("No test rows for {year}{}, likely because data for the upcoming round isn't available yet", round_suffix(.round_number))]
    EmptyTestSet {
        year: i32,
        round_number: Option<u32>,
    },

    #[error("No mirror row for {team} v {oppo_team} in {year} round {round_number}")]
    UnresolvedMirror {
        team: String,
        oppo_team: String,
        year: i32,
        round_number: u32,
    },

    #[error("Duplicate row for {team} in {year} round {round_number}")]
    DuplicateRow {
        team: String,
        year: i32,
        round_number: u32,
    },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Feature step {step} failed: {message}")]
    FeatureStep { step: String, message: String },

    #[error("Model {model} failed: {message}")]
    Model { model: String, message: String },

    #[error("Model {model} returned {actual} predictions for {expected} rows")]
    PredictionLength {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn round_suffix(round_number: &Option<u32>) -> String {
    round_number
        .map(|round| format!(" round {}", round))
        .unwrap_or_default()
}

impl TipError {
    /// Conditions that are expected around season boundaries and should be
    /// skipped and reported rather than abort a run
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            TipError::MissingRequiredColumns { .. }
                | TipError::EmptyDataset { .. }
                | TipError::EmptyTestSet { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TipError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub features: FeaturesConfig,
    pub backtest: BacktestConfig,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
    pub matches_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Rolling window length in rounds
    pub rolling_window: usize,
    pub ladder_tie_break: LadderTieBreak,
    /// Columns copied from the opponent's row with an `oppo_` prefix;
    /// empty mirrors every derived column that is not a match column
    pub mirror_columns: Vec<String>,
}

/// How teams level on win points are ordered on the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderTieBreak {
    /// Higher season-to-date percentage ranks first
    Percentage,
    /// Level teams are ordered by name
    Alphabetical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Refit each model on all seasons before the predicted year
    pub train: bool,
    /// Seasons of history loaded for live tipping
    pub prediction_seasons: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub kind: ModelKind,
    /// Storage location; opaque to the pipeline
    #[serde(default)]
    pub filepath: Option<String>,
    /// L1 penalty for lasso models
    #[serde(default)]
    pub penalty: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Lasso,
    MeanMargin,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                database_path: "data/tipping.db".to_string(),
                matches_path: "data/matches.json".to_string(),
            },
            features: FeaturesConfig {
                rolling_window: 23,
                ladder_tie_break: LadderTieBreak::Percentage,
                mirror_columns: features::DEFAULT_MIRROR_COLUMNS
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            },
            backtest: BacktestConfig {
                train: true,
                prediction_seasons: 10,
            },
            models: vec![
                ModelConfig {
                    name: "betting_lasso".to_string(),
                    kind: ModelKind::Lasso,
                    filepath: None,
                    penalty: Some(0.1),
                },
                ModelConfig {
                    name: "mean_margin".to_string(),
                    kind: ModelKind::MeanMargin,
                    filepath: None,
                    penalty: None,
                },
            ],
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TipError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| TipError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TipError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_record_year_falls_back_to_date() {
        let json = r#"{
            "round_label": "Round 1",
            "date": "2016-03-24",
            "home_team": "Richmond",
            "away_team": "Carlton",
            "home_score": 100,
            "away_score": 80,
            "home_win_odds": 1.5,
            "away_win_odds": 2.6
        }"#;
        let record: MatchRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.year(), 2016);
        assert_eq!(record.extra.get("home_win_odds"), Some(&1.5));
        assert_eq!(record.extra.len(), 2);
    }

    #[test]
    fn test_match_row_winner() {
        let mut row = MatchRow {
            year: 2016,
            round_number: 5,
            date: NaiveDate::from_ymd_opt(2016, 4, 23).unwrap(),
            venue: None,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            home_score: Some(100),
            away_score: Some(80),
            extra: BTreeMap::new(),
        };
        assert_eq!(row.winner(), Some("Richmond"));
        assert_eq!(row.margin(), Some(20));

        row.away_score = Some(100);
        assert!(row.is_draw());
        assert_eq!(row.winner(), None);

        row.home_score = None;
        assert!(!row.has_been_played());
        assert!(!row.is_draw());
    }

    #[test]
    fn test_data_unavailable_classification() {
        let empty = TipError::EmptyTestSet {
            year: 2017,
            round_number: Some(3),
        };
        assert!(empty.is_data_unavailable());
        assert!(empty.to_string().contains("2017 round 3"));

        let mirror = TipError::UnresolvedMirror {
            team: "Richmond".to_string(),
            oppo_team: "Carlton".to_string(),
            year: 2016,
            round_number: 5,
        };
        assert!(!mirror.is_data_unavailable());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.features.rolling_window, 23);
        assert_eq!(parsed.features.ladder_tie_break, LadderTieBreak::Percentage);
        assert_eq!(parsed.models.len(), 2);
        assert_eq!(parsed.models[0].kind, ModelKind::Lasso);
    }
}

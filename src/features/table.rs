//! Team-perspective feature table
//!
//! One row per (team, year, round_number), kept sorted by that key. Rows of
//! the same team are therefore contiguous and in time order.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

use crate::{Result, TipError};

/// Columns that identify a row and can never be written by a feature step
pub const INDEX_COLUMNS: [&str; 3] = ["team", "year", "round_number"];

/// String-valued columns, one-hot encoded for estimators
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["team", "oppo_team", "venue"];

/// Numeric columns every stacked row carries
pub const BASE_NUMERIC_COLUMNS: [&str; 5] = ["year", "round_number", "at_home", "score", "oppo_score"];

/// Columns derived from the outcome of the row's own match
pub const LABEL_COLUMNS: [&str; 6] = [
    "score",
    "oppo_score",
    "result",
    "oppo_result",
    "margin",
    "oppo_margin",
];

pub fn is_label_column(column: &str) -> bool {
    LABEL_COLUMNS.contains(&column)
}

/// Sort key of a feature table row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub team: String,
    pub year: i32,
    pub round_number: u32,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R{}", self.team, self.year, self.round_number)
    }
}

/// One team's view of one match
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRoundRow {
    pub team: String,
    pub oppo_team: String,
    pub year: i32,
    pub round_number: u32,
    /// 1 for the home side, 0 for the away side
    pub at_home: u8,
    pub date: NaiveDate,
    pub venue: Option<String>,
    pub score: Option<f64>,
    pub oppo_score: Option<f64>,
    features: BTreeMap<String, f64>,
}

impl TeamRoundRow {
    pub fn new(
        team: &str,
        oppo_team: &str,
        year: i32,
        round_number: u32,
        at_home: u8,
        date: NaiveDate,
    ) -> Self {
        TeamRoundRow {
            team: team.to_string(),
            oppo_team: oppo_team.to_string(),
            year,
            round_number,
            at_home,
            date,
            venue: None,
            score: None,
            oppo_score: None,
            features: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey {
            team: self.team.clone(),
            year: self.year,
            round_number: self.round_number,
        }
    }

    /// Numeric value of a column; None when missing
    pub fn get(&self, column: &str) -> Option<f64> {
        match column {
            "year" => Some(self.year as f64),
            "round_number" => Some(self.round_number as f64),
            "at_home" => Some(self.at_home as f64),
            "score" => self.score,
            "oppo_score" => self.oppo_score,
            other => self.features.get(other).copied(),
        }
    }

    /// Write a numeric column; None marks the value missing
    pub fn set(&mut self, column: &str, value: Option<f64>) -> Result<()> {
        match column {
            "year" | "round_number" | "at_home" | "team" | "oppo_team" | "venue" => {
                return Err(TipError::FeatureStep {
                    step: "set".to_string(),
                    message: format!("column {} is not writable", column),
                })
            }
            "score" => self.score = value,
            "oppo_score" => self.oppo_score = value,
            other => match value.filter(|v| !v.is_nan()) {
                Some(v) => {
                    self.features.insert(other.to_string(), v);
                }
                None => {
                    self.features.remove(other);
                }
            },
        }
        Ok(())
    }

    /// String value of a categorical column
    pub fn category(&self, column: &str) -> Option<&str> {
        match column {
            "team" => Some(&self.team),
            "oppo_team" => Some(&self.oppo_team),
            "venue" => self.venue.as_deref(),
            _ => None,
        }
    }

    /// Score minus opponent's score, once the match has been played
    pub fn margin(&self) -> Option<f64> {
        Some(self.score? - self.oppo_score?)
    }
}

/// Sorted collection of team-perspective rows
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    /// Derived numeric columns in the order they were added
    columns: Vec<String>,
    rows: Vec<TeamRoundRow>,
}

impl FeatureTable {
    /// Build a table, sorting rows by key and rejecting duplicate keys
    ///
    /// `columns` fixes the order of the derived columns. Any other feature
    /// the rows carry is registered after them.
    pub fn from_rows(mut rows: Vec<TeamRoundRow>, columns: Vec<String>) -> Result<Self> {
        rows.sort_by(|a, b| {
            (&a.team, a.year, a.round_number).cmp(&(&b.team, b.year, b.round_number))
        });

        if let Some(pair) = rows.windows(2).find(|w| {
            w[0].team == w[1].team && w[0].year == w[1].year && w[0].round_number == w[1].round_number
        }) {
            return Err(TipError::DuplicateRow {
                team: pair[0].team.clone(),
                year: pair[0].year,
                round_number: pair[0].round_number,
            });
        }

        let carried: BTreeSet<String> = rows
            .iter()
            .flat_map(|r| r.features.keys().cloned())
            .collect();

        let mut table = FeatureTable {
            columns: Vec::new(),
            rows,
        };
        for column in columns.iter().chain(&carried) {
            table.add_column(column);
        }
        Ok(table)
    }

    pub fn rows(&self) -> &[TeamRoundRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [TeamRoundRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Derived (non-base) numeric columns
    pub fn derived_columns(&self) -> &[String] {
        &self.columns
    }

    /// Every numeric column: base columns then derived ones
    pub fn numeric_columns(&self) -> Vec<String> {
        BASE_NUMERIC_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        BASE_NUMERIC_COLUMNS.contains(&column)
            || CATEGORICAL_COLUMNS.contains(&column)
            || self.columns.iter().any(|c| c == column)
    }

    /// Register a derived column; existing columns are left in place
    pub fn add_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    /// Drop every derived column `keep` rejects, from the registry and
    /// from each row; returns the dropped names
    pub fn retain_columns<F>(&mut self, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let (kept, dropped): (Vec<String>, Vec<String>) =
            std::mem::take(&mut self.columns).into_iter().partition(|c| keep(c));
        self.columns = kept;
        for row in &mut self.rows {
            row.features.retain(|column, _| keep(column));
        }
        dropped
    }

    pub fn keys(&self) -> Vec<RowKey> {
        self.rows.iter().map(TeamRoundRow::key).collect()
    }

    /// Index ranges of each team's rows, in time order within a range
    pub fn team_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..=self.rows.len() {
            if i == self.rows.len() || self.rows[i].team != self.rows[start].team {
                if start < i {
                    ranges.push(start..i);
                }
                start = i;
            }
        }
        ranges
    }

    /// Rows satisfying a predicate, with the same columns
    pub fn filter<F>(&self, predicate: F) -> FeatureTable
    where
        F: Fn(&TeamRoundRow) -> bool,
    {
        FeatureTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Value of one column for every row
    pub fn column(&self, column: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.get(column)).collect()
    }

    /// Row for a key, found by binary search on the sort order
    pub fn get(&self, team: &str, year: i32, round_number: u32) -> Option<&TeamRoundRow> {
        self.rows
            .binary_search_by(|r| (r.team.as_str(), r.year, r.round_number).cmp(&(team, year, round_number)))
            .ok()
            .map(|i| &self.rows[i])
    }
}

//! Year-window train/test slicing and feature encoding

use std::collections::BTreeSet;

use crate::features::table::{is_label_column, CATEGORICAL_COLUMNS};
use crate::features::{FeatureTable, RowKey, TeamRoundRow};
use crate::{Result, TipError};

/// Inclusive `(min_year, max_year)`; `None` leaves that end open
pub type YearPair = (Option<i32>, Option<i32>);

fn contains(years: YearPair, year: i32) -> bool {
    years.0.map_or(true, |min| year >= min) && years.1.map_or(true, |max| year <= max)
}

fn describe(years: YearPair) -> String {
    let end = |y: Option<i32>| y.map_or_else(|| "..".to_string(), |y| y.to_string());
    format!("{}-{}", end(years.0), end(years.1))
}

/// Dense model input, one row per team-round
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
    pub keys: Vec<RowKey>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// Maps table rows onto a fixed column layout
///
/// Categories come from the whole table, so every slice of it encodes to
/// the same columns whatever teams or venues the slice contains.
#[derive(Debug, Clone)]
struct FeatureEncoder {
    numeric: Vec<String>,
    categories: Vec<(&'static str, Vec<String>)>,
}

impl FeatureEncoder {
    fn fit(table: &FeatureTable) -> Self {
        let numeric = table
            .numeric_columns()
            .into_iter()
            .filter(|c| !is_label_column(c))
            .collect();

        let categories = CATEGORICAL_COLUMNS
            .iter()
            .map(|&column| {
                let values: BTreeSet<String> = table
                    .rows()
                    .iter()
                    .filter_map(|r| r.category(column))
                    .map(str::to_string)
                    .collect();
                (column, values.into_iter().collect())
            })
            .collect();

        FeatureEncoder { numeric, categories }
    }

    fn columns(&self) -> Vec<String> {
        let dummies = self
            .categories
            .iter()
            .flat_map(|(column, values)| values.iter().map(move |v| format!("{}_{}", column, v)));
        self.numeric.iter().cloned().chain(dummies).collect()
    }

    fn encode(&self, row: &TeamRoundRow) -> Vec<f64> {
        let mut values: Vec<f64> = self.numeric.iter().map(|c| row.get(c).unwrap_or(0.0)).collect();
        for (column, categories) in &self.categories {
            let own = row.category(column);
            values.extend(categories.iter().map(|v| if Some(v.as_str()) == own { 1.0 } else { 0.0 }));
        }
        values
    }

    fn matrix<'a, I>(&self, rows: I) -> FeatureMatrix
    where
        I: IntoIterator<Item = &'a TeamRoundRow>,
    {
        let mut values = Vec::new();
        let mut keys = Vec::new();
        for row in rows {
            values.push(self.encode(row));
            keys.push(row.key());
        }
        FeatureMatrix {
            columns: self.columns(),
            values,
            keys,
        }
    }
}

/// Slices a feature table into train and test sets by year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearWindowSplitter {
    pub train_years: YearPair,
    pub test_years: YearPair,
}

impl YearWindowSplitter {
    pub fn new(train_years: YearPair, test_years: YearPair) -> Self {
        let splitter = YearWindowSplitter {
            train_years,
            test_years,
        };
        if splitter.windows_overlap() {
            log::warn!(
                "Train years {} overlap test years {}",
                describe(train_years),
                describe(test_years)
            );
        }
        splitter
    }

    /// Train on everything before `year`, test on `year` itself
    pub fn for_year(year: i32) -> Self {
        YearWindowSplitter::new((None, Some(year - 1)), (Some(year), Some(year)))
    }

    pub fn windows_overlap(&self) -> bool {
        let low = match (self.train_years.0, self.test_years.0) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let high = match (self.train_years.1, self.test_years.1) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match (low, high) {
            (Some(low), Some(high)) => low <= high,
            _ => true,
        }
    }

    /// Played rows of the train window with their margins
    pub fn train_data(&self, table: &FeatureTable) -> Result<(FeatureMatrix, Vec<f64>)> {
        let encoder = FeatureEncoder::fit(table);
        let rows: Vec<&TeamRoundRow> = table
            .rows()
            .iter()
            .filter(|r| contains(self.train_years, r.year) && r.margin().is_some())
            .collect();

        if rows.is_empty() {
            return Err(TipError::EmptyDataset {
                years: describe(self.train_years),
                detail: "no played matches to train on".to_string(),
            });
        }

        let y = rows.iter().filter_map(|r| r.margin()).collect();
        Ok((encoder.matrix(rows), y))
    }

    /// Every row of the test window, optionally one round only
    ///
    /// Rows not yet played are kept with a missing margin so fixtures can
    /// be predicted.
    pub fn test_data(
        &self,
        table: &FeatureTable,
        round_number: Option<u32>,
    ) -> Result<(FeatureMatrix, Vec<Option<f64>>)> {
        let encoder = FeatureEncoder::fit(table);
        let rows: Vec<&TeamRoundRow> = table
            .rows()
            .iter()
            .filter(|r| contains(self.test_years, r.year))
            .filter(|r| round_number.map_or(true, |round| r.round_number == round))
            .collect();

        if rows.is_empty() {
            let detail = match round_number {
                Some(round) => format!("no rows for round {}", round),
                None => "no rows in window".to_string(),
            };
            return Err(TipError::EmptyDataset {
                years: describe(self.test_years),
                detail,
            });
        }

        let y = rows.iter().map(|r| r.margin()).collect();
        Ok((encoder.matrix(rows), y))
    }
}

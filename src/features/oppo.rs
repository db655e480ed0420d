//! Opponent feature mirroring
//!
//! Copies selected columns from the opponent's row of the same match onto
//! each row as `oppo_<column>`.

use std::collections::{HashMap, HashSet};

use super::pipeline::TableStage;
use super::table::{is_label_column, FeatureTable, BASE_NUMERIC_COLUMNS, CATEGORICAL_COLUMNS};
use crate::{Result, TipError};

const OPPO_PREFIX: &str = "oppo_";

#[derive(Debug, Clone, PartialEq)]
enum MirrorColumns {
    Only(Vec<String>),
    AllExcept(Vec<String>),
}

/// Attaches the opponent's features to each team-round row
#[derive(Debug, Clone, PartialEq)]
pub struct OppoFeatureMirror {
    columns: MirrorColumns,
}

impl OppoFeatureMirror {
    /// Mirror exactly these columns
    pub fn with_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        OppoFeatureMirror {
            columns: MirrorColumns::Only(columns.iter().map(|c| c.as_ref().to_string()).collect()),
        }
    }

    /// Mirror every derived column except the given match columns
    ///
    /// Base columns, labels and columns that already have an `oppo_`
    /// counterpart are never mirrored.
    pub fn excluding<S: AsRef<str>>(match_columns: &[S]) -> Self {
        OppoFeatureMirror {
            columns: MirrorColumns::AllExcept(
                match_columns.iter().map(|c| c.as_ref().to_string()).collect(),
            ),
        }
    }

    /// Columns this mirror copies given the columns available to it
    fn resolve(&self, available: &[String]) -> Vec<String> {
        match &self.columns {
            MirrorColumns::Only(columns) => columns.clone(),
            MirrorColumns::AllExcept(excluded) => {
                let known: HashSet<&str> = available.iter().map(String::as_str).collect();
                available
                    .iter()
                    .filter(|c| {
                        !excluded.contains(*c)
                            && !BASE_NUMERIC_COLUMNS.contains(&c.as_str())
                            && !CATEGORICAL_COLUMNS.contains(&c.as_str())
                            && !is_label_column(c)
                            && !c.starts_with(OPPO_PREFIX)
                            && !known.contains(format!("{}{}", OPPO_PREFIX, c).as_str())
                    })
                    .cloned()
                    .collect()
            }
        }
    }

    /// Row index of every row's opponent, checking the pairing both ways
    fn mirror_index(table: &FeatureTable) -> Result<Vec<usize>> {
        let rows = table.rows();
        let index: HashMap<(i32, u32, &str), usize> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| ((r.year, r.round_number, r.team.as_str()), i))
            .collect();

        rows.iter()
            .map(|row| {
                index
                    .get(&(row.year, row.round_number, row.oppo_team.as_str()))
                    .copied()
                    .filter(|&j| rows[j].oppo_team == row.team)
                    .ok_or_else(|| TipError::UnresolvedMirror {
                        team: row.team.clone(),
                        oppo_team: row.oppo_team.clone(),
                        year: row.year,
                        round_number: row.round_number,
                    })
            })
            .collect()
    }

    /// Copy the mirrored columns across each match
    pub fn transform(&self, table: &FeatureTable) -> Result<FeatureTable> {
        let columns = self.resolve(&table.numeric_columns());
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !table.has_column(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TipError::MissingRequiredColumns {
                columns: missing,
                context: "opponent mirror".to_string(),
            });
        }

        let mirrors = Self::mirror_index(table)?;
        let mut output = table.clone();

        for column in &columns {
            let oppo_column = format!("{}{}", OPPO_PREFIX, column);
            let values: Vec<Option<f64>> = mirrors.iter().map(|&j| table.rows()[j].get(column)).collect();
            for (row, value) in output.rows_mut().iter_mut().zip(values) {
                row.set(&oppo_column, value)?;
            }
            output.add_column(&oppo_column);
        }

        log::debug!("Mirrored {} columns onto {} rows", columns.len(), output.len());
        Ok(output)
    }
}

impl TableStage for OppoFeatureMirror {
    fn name(&self) -> &str {
        "oppo_feature_mirror"
    }

    fn plan(&self, available: &[String]) -> Result<Vec<String>> {
        let columns = self.resolve(available);
        let mut known: HashSet<String> = available.iter().cloned().collect();
        let mut output = available.to_vec();

        for column in &columns {
            if is_label_column(column) {
                return Err(TipError::InvalidPipeline(format!(
                    "{} is an outcome column and cannot be mirrored",
                    column
                )));
            }
            if CATEGORICAL_COLUMNS.contains(&column.as_str()) {
                return Err(TipError::InvalidPipeline(format!(
                    "{} is categorical and cannot be mirrored",
                    column
                )));
            }
            if !known.contains(column) {
                return Err(TipError::InvalidPipeline(format!(
                    "mirror column {} is not produced by any earlier stage",
                    column
                )));
            }
            let oppo_column = format!("{}{}", OPPO_PREFIX, column);
            if !known.insert(oppo_column.clone()) {
                return Err(TipError::InvalidPipeline(format!(
                    "mirroring {} would overwrite existing column {}",
                    column, oppo_column
                )));
            }
            output.push(oppo_column);
        }

        Ok(output)
    }

    fn transform(&self, table: &FeatureTable) -> Result<FeatureTable> {
        OppoFeatureMirror::transform(self, table)
    }
}

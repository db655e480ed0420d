//! Rolling form over a team's prior rounds

use super::builder::FeatureStep;
use super::table::FeatureTable;
use crate::{Result, TipError};

/// How values inside the window are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingMode {
    /// Sum of the values
    Sum,
    /// Mean of the values
    Mean,
    /// Fraction of the values that are positive
    Rate,
}

/// Aggregates a column over each team's last `window` rounds before the
/// current one
///
/// Windows run across season boundaries. Missing values inside a window are
/// skipped; a window with nothing in it, including a team's very first
/// round, yields a missing value.
#[derive(Debug, Clone)]
pub struct RollingRateCalculator {
    column: String,
    window: usize,
    mode: RollingMode,
    output: String,
}

impl RollingRateCalculator {
    pub fn new(column: &str, window: usize, mode: RollingMode, output: &str) -> Result<Self> {
        if window == 0 {
            return Err(TipError::InvalidPipeline(format!(
                "rolling window for {} must be at least one round",
                column
            )));
        }
        Ok(RollingRateCalculator {
            column: column.to_string(),
            window,
            mode,
            output: output.to_string(),
        })
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Rolling values for every row, in table order
    pub fn calculate(&self, table: &FeatureTable) -> Vec<Option<f64>> {
        let mut result = vec![None; table.len()];

        for range in table.team_ranges() {
            let values: Vec<Option<f64>> = table.rows()[range.clone()]
                .iter()
                .map(|r| r.get(&self.column))
                .collect();

            for k in 1..values.len() {
                let window = &values[k.saturating_sub(self.window)..k];
                result[range.start + k] = self.aggregate(window);
            }
        }

        result
    }

    fn aggregate(&self, window: &[Option<f64>]) -> Option<f64> {
        let present: Vec<f64> = window.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }

        let n = present.len() as f64;
        Some(match self.mode {
            RollingMode::Sum => present.iter().sum(),
            RollingMode::Mean => present.iter().sum::<f64>() / n,
            RollingMode::Rate => present.iter().filter(|v| **v > 0.0).count() as f64 / n,
        })
    }

    /// Write the rolling column into the table
    pub fn apply(&self, table: &mut FeatureTable) -> Result<()> {
        let values = self.calculate(table);
        for (row, value) in table.rows_mut().iter_mut().zip(values) {
            row.set(&self.output, value)?;
        }
        table.add_column(&self.output);
        Ok(())
    }

    /// Wrap as a feature step reading `column` and producing `output`
    pub fn into_step(self) -> FeatureStep {
        let name = format!("rolling_{}", self.output);
        let requires = vec![self.column.clone()];
        let produces = vec![self.output.clone()];
        FeatureStep::with_columns(&name, requires, produces, move |table| self.apply(table))
    }
}

//! Year-by-year backtesting
//!
//! For each year in the range and each registered model, the model is
//! (optionally) refit on every season before that year and asked for the
//! margins of that year's rows.

use std::fmt;
use std::ops::Range;

use crate::features::FeatureTable;
use crate::training::{ModelHandle, ModelRegistry, YearWindowSplitter};
use crate::{PredictionRecord, Result, TipError};

/// A (year, model) pair that produced no predictions
#[derive(Debug)]
pub struct PairFailure {
    pub year: i32,
    pub ml_model: String,
    pub error: TipError,
}

impl fmt::Display for PairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.year, self.ml_model, self.error)
    }
}

/// Predictions from every pair that succeeded plus the failures
#[derive(Debug, Default)]
pub struct BacktestReport {
    pub predictions: Vec<PredictionRecord>,
    pub failures: Vec<PairFailure>,
}

impl BacktestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures that aren't just missing data
    pub fn fatal_failures(&self) -> impl Iterator<Item = &PairFailure> {
        self.failures.iter().filter(|f| !f.error.is_data_unavailable())
    }
}

/// Drives year-windowed fit/predict over a built feature table
pub struct BacktestOrchestrator<'a> {
    table: &'a FeatureTable,
}

impl<'a> BacktestOrchestrator<'a> {
    pub fn new(table: &'a FeatureTable) -> Self {
        BacktestOrchestrator { table }
    }

    /// Predictions for one (year, model) pair
    ///
    /// Either every test row gets a prediction or an error is returned.
    pub fn predict_year(
        &self,
        year: i32,
        round_number: Option<u32>,
        handle: &mut ModelHandle,
        train: bool,
    ) -> Result<Vec<PredictionRecord>> {
        let splitter = YearWindowSplitter::for_year(year);

        let (x_test, _) = splitter
            .test_data(self.table, round_number)
            .map_err(|e| match e {
                TipError::EmptyDataset { .. } => TipError::EmptyTestSet { year, round_number },
                other => other,
            })?;

        if train {
            let (x_train, y_train) = splitter.train_data(self.table)?;
            log::debug!("Fitting {} on {} rows before {}", handle.name, x_train.len(), year);
            handle.estimator.fit(&x_train, &y_train)?;
        } else if !handle.estimator.is_fitted() {
            return Err(TipError::Model {
                model: handle.name.clone(),
                message: "training is disabled and the model has not been fitted".to_string(),
            });
        }

        let margins = handle.estimator.predict(&x_test)?;
        if margins.len() != x_test.len() {
            return Err(TipError::PredictionLength {
                model: handle.name.clone(),
                expected: x_test.len(),
                actual: margins.len(),
            });
        }

        x_test
            .keys
            .iter()
            .zip(margins)
            .map(|(key, predicted_margin)| {
                let row = self
                    .table
                    .get(&key.team, key.year, key.round_number)
                    .ok_or_else(|| TipError::FeatureStep {
                        step: "backtest".to_string(),
                        message: format!("test row {} is not in the table", key),
                    })?;
                Ok(PredictionRecord {
                    team: row.team.clone(),
                    year: row.year,
                    round_number: row.round_number,
                    at_home: row.at_home,
                    oppo_team: row.oppo_team.clone(),
                    ml_model: handle.name.clone(),
                    predicted_margin,
                })
            })
            .collect()
    }

    /// Predictions for every year in `[start, end)` and every model
    ///
    /// Output is ordered by year, then model registration order, then table
    /// row order. A failing pair is recorded and the rest still run.
    pub fn make_predictions(
        &self,
        years: Range<i32>,
        round_number: Option<u32>,
        registry: &mut ModelRegistry,
        train: bool,
    ) -> Result<BacktestReport> {
        if years.is_empty() {
            return Err(TipError::Config(format!(
                "Year range {}..{} contains no years",
                years.start, years.end
            )));
        }

        let mut report = BacktestReport::default();
        for year in years {
            for handle in registry.iter_mut() {
                log::info!("Predicting {} with {}", year, handle.name);
                match self.predict_year(year, round_number, handle, train) {
                    Ok(predictions) => {
                        log::debug!("{} predictions for {} from {}", predictions.len(), year, handle.name);
                        report.predictions.extend(predictions);
                    }
                    Err(error) => {
                        log::warn!("Skipping {} for {}: {}", handle.name, year, error);
                        report.failures.push(PairFailure {
                            year,
                            ml_model: handle.name.clone(),
                            error,
                        });
                    }
                }
            }
        }

        Ok(report)
    }
}

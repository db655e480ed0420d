//! Table-building pipeline
//!
//! Raw records are cleaned, stacked into team rows and then passed through
//! an ordered list of stages. Stage ordering is checked once, when the
//! pipeline is built, against the columns each stage needs and adds.

use super::builder::FeatureBuilder;
use super::oppo::OppoFeatureMirror;
use super::rolling::{RollingMode, RollingRateCalculator};
use super::stacker::TeamPerspectiveStacker;
use super::table::{FeatureTable, BASE_NUMERIC_COLUMNS, CATEGORICAL_COLUMNS};
use super::team_stats::{
    add_betting_pred_win, add_cum_percent, add_cum_win_points, add_ladder_position,
    add_last_week_features, add_result, add_win_streak,
};
use crate::data::cleaning::clean_match_data;
use crate::{FeaturesConfig, MatchRecord, Result, TipError};

/// Betting columns the default pipeline expects on the stacked rows
pub const BETTING_COLUMNS: [&str; 4] = ["win_odds", "oppo_win_odds", "line_odds", "oppo_line_odds"];

/// Columns describing the match itself rather than either team's form
pub const MATCH_COLUMNS: [&str; 11] = [
    "year",
    "score",
    "oppo_score",
    "round_number",
    "team",
    "at_home",
    "line_odds",
    "oppo_line_odds",
    "win_odds",
    "oppo_win_odds",
    "oppo_team",
];

/// One whole-table transformation
pub trait TableStage: Send + Sync {
    fn name(&self) -> &str;

    /// Check the stage against the columns available before it and return
    /// the columns available after it
    fn plan(&self, available: &[String]) -> Result<Vec<String>>;

    fn transform(&self, table: &FeatureTable) -> Result<FeatureTable>;
}

/// Ordered, pre-validated list of stages
pub struct DataPipeline {
    base_columns: Vec<String>,
    stages: Vec<Box<dyn TableStage>>,
    output_columns: Vec<String>,
}

impl DataPipeline {
    /// Build a pipeline whose input carries `base_columns` on top of the
    /// stacked columns every table has
    pub fn new(base_columns: Vec<String>, stages: Vec<Box<dyn TableStage>>) -> Result<Self> {
        let mut available: Vec<String> = BASE_NUMERIC_COLUMNS
            .iter()
            .chain(CATEGORICAL_COLUMNS.iter())
            .map(|c| c.to_string())
            .collect();
        for column in &base_columns {
            if !available.contains(column) {
                available.push(column.clone());
            }
        }

        for stage in &stages {
            available = stage.plan(&available).map_err(|e| match e {
                TipError::InvalidPipeline(message) => {
                    TipError::InvalidPipeline(format!("{}: {}", stage.name(), message))
                }
                other => other,
            })?;
        }

        Ok(DataPipeline {
            base_columns,
            stages,
            output_columns: available,
        })
    }

    /// Columns present after the last stage
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over a stacked table
    ///
    /// Stacked match columns other than the declared base columns are
    /// dropped first. Match statistics such as goals describe the match
    /// being predicted and must never become features.
    pub fn run(&self, table: FeatureTable) -> Result<FeatureTable> {
        let missing: Vec<String> = self
            .base_columns
            .iter()
            .filter(|c| !table.has_column(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TipError::MissingRequiredColumns {
                columns: missing,
                context: "stacked match data".to_string(),
            });
        }

        let mut table = table;
        let dropped = table.retain_columns(|c| self.base_columns.iter().any(|b| b == c));
        if !dropped.is_empty() {
            log::debug!("Dropped undeclared match columns: {}", dropped.join(", "));
        }

        for stage in &self.stages {
            table = stage.transform(&table)?;
            log::debug!("Stage {} done, {} columns", stage.name(), table.derived_columns().len());
        }
        Ok(table)
    }
}

/// Clean, stack and run the pipeline over raw records
pub fn build_feature_table(records: &[MatchRecord], pipeline: &DataPipeline) -> Result<FeatureTable> {
    let matches = clean_match_data(records, None)?;
    if matches.is_empty() {
        return Err(TipError::EmptyDataset {
            years: "all".to_string(),
            detail: "no match records to build features from".to_string(),
        });
    }

    let table = TeamPerspectiveStacker::new().stack(&matches)?;
    let table = pipeline.run(table)?;
    log::info!("Built feature table: {} rows, {} features", table.len(), table.derived_columns().len());
    Ok(table)
}

/// The betting model's feature set
///
/// Team form first, then the opponent mirror, then the ladder features,
/// which rank every team and so sit after the mirror.
pub fn default_pipeline(config: &FeaturesConfig) -> Result<DataPipeline> {
    let window = config.rolling_window;

    let team_features = FeatureBuilder::new(
        "team_features",
        vec![
            add_result(),
            add_last_week_features(&["score", "oppo_score", "result"]),
            add_cum_win_points(),
            add_betting_pred_win(),
            add_win_streak(),
            RollingRateCalculator::new("betting_pred_win", window, RollingMode::Mean, "rolling_pred_win_rate")?
                .into_step(),
            RollingRateCalculator::new("result", window, RollingMode::Rate, "rolling_last_week_win_rate")?
                .into_step(),
        ],
    );

    let mirror = if config.mirror_columns.is_empty() {
        OppoFeatureMirror::excluding(&MATCH_COLUMNS)
    } else {
        OppoFeatureMirror::with_columns(&config.mirror_columns)
    };

    let ladder_features = FeatureBuilder::new(
        "ladder_features",
        vec![add_cum_percent(), add_ladder_position(config.ladder_tie_break)],
    );

    DataPipeline::new(
        BETTING_COLUMNS.iter().map(|c| c.to_string()).collect(),
        vec![Box::new(team_features), Box::new(mirror), Box::new(ladder_features)],
    )
}

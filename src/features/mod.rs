//! Feature engineering
//!
//! Turns cleaned matches into a team-perspective feature table.

pub mod builder;
pub mod oppo;
pub mod pipeline;
pub mod rolling;
pub mod stacker;
pub mod table;
pub mod team_stats;

pub use builder::{FeatureBuilder, FeatureStep};
pub use oppo::OppoFeatureMirror;
pub use pipeline::{build_feature_table, default_pipeline, DataPipeline, TableStage};
pub use rolling::{RollingMode, RollingRateCalculator};
pub use stacker::TeamPerspectiveStacker;
pub use table::{FeatureTable, RowKey, TeamRoundRow};

/// Team-form columns the default pipeline copies onto the opponent's row
pub const DEFAULT_MIRROR_COLUMNS: [&str; 6] = [
    "cum_win_points",
    "win_streak",
    "rolling_pred_win_rate",
    "rolling_last_week_win_rate",
    "last_week_score",
    "last_week_result",
];

//! Model training
//!
//! Year-window splits, margin estimators and evaluation metrics.

pub mod estimator;
pub mod metrics;
pub mod split;

pub use estimator::{Estimator, LassoModel, MeanMarginModel, ModelHandle, ModelRegistry};
pub use metrics::Metrics;
pub use split::{FeatureMatrix, YearPair, YearWindowSplitter};

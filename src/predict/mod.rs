//! Prediction
//!
//! Backtests over past seasons and live tips for the upcoming round.

pub mod backtest;
pub mod tipping;

pub use backtest::{BacktestOrchestrator, BacktestReport, PairFailure};
pub use tipping::{is_correct, tip, MatchTip, TipReport, TipRound};

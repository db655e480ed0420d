//! Tipping accuracy and margin error

use std::collections::BTreeMap;
use std::fmt;

use crate::data::database::StoredPrediction;
use crate::features::FeatureTable;
use crate::predict::tipping::MatchTip;
use crate::PredictionRecord;

/// Accumulated results for one model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    /// Tips on played matches that were right
    pub correct_tips: usize,
    /// Tips on played matches
    pub total_tips: usize,
    /// Sum of absolute margin errors over played team rows
    pub abs_error_sum: f64,
    /// Played team rows with a margin error
    pub margin_count: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tip; unplayed (None) tips are ignored
    pub fn update_tip(&mut self, correct: Option<bool>) {
        if let Some(correct) = correct {
            self.total_tips += 1;
            if correct {
                self.correct_tips += 1;
            }
        }
    }

    pub fn update_margin(&mut self, predicted: f64, actual: f64) {
        self.abs_error_sum += (predicted - actual).abs();
        self.margin_count += 1;
    }

    /// Fraction of played tips that were right
    pub fn accuracy(&self) -> f64 {
        if self.total_tips == 0 {
            0.0
        } else {
            self.correct_tips as f64 / self.total_tips as f64
        }
    }

    /// Mean absolute margin error
    pub fn mae(&self) -> f64 {
        if self.margin_count == 0 {
            0.0
        } else {
            self.abs_error_sum / self.margin_count as f64
        }
    }

    pub fn merge(&mut self, other: &Metrics) {
        self.correct_tips += other.correct_tips;
        self.total_tips += other.total_tips;
        self.abs_error_sum += other.abs_error_sum;
        self.margin_count += other.margin_count;
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tips: {}/{} ({:.2}%) | Margin MAE: {:.2}",
            self.correct_tips,
            self.total_tips,
            self.accuracy() * 100.0,
            self.mae()
        )
    }
}

/// Score backtest predictions against the outcomes in the table, per model
pub fn evaluate_predictions(
    predictions: &[PredictionRecord],
    table: &FeatureTable,
) -> BTreeMap<String, Metrics> {
    let mut by_model: BTreeMap<String, Metrics> = BTreeMap::new();

    for prediction in predictions {
        let actual = table
            .get(&prediction.team, prediction.year, prediction.round_number)
            .and_then(|row| row.margin());
        if let Some(actual) = actual {
            by_model
                .entry(prediction.ml_model.clone())
                .or_default()
                .update_margin(prediction.predicted_margin, actual);
        }
    }

    for tip in MatchTip::from_predictions(predictions) {
        by_model
            .entry(tip.ml_model.clone())
            .or_default()
            .update_tip(tip.outcome_in(table));
    }

    by_model
}

/// Correct tips per model in one round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTotals {
    pub year: i32,
    pub round_number: u32,
    pub correct: BTreeMap<String, usize>,
}

/// Correct-tip totals for each round with stored predictions, in round
/// order; a model with tips but none right shows zero
pub fn round_totals(predictions: &[StoredPrediction]) -> Vec<RoundTotals> {
    let mut rounds: BTreeMap<(i32, u32), BTreeMap<String, usize>> = BTreeMap::new();
    for prediction in predictions {
        let correct = rounds
            .entry((prediction.year, prediction.round_number))
            .or_default()
            .entry(prediction.ml_model.clone())
            .or_default();
        if prediction.is_correct == Some(true) {
            *correct += 1;
        }
    }

    rounds
        .into_iter()
        .map(|((year, round_number), correct)| RoundTotals {
            year,
            round_number,
            correct,
        })
        .collect()
}

/// Accuracy per model over stored predictions that have been scored
pub fn stored_accuracy(predictions: &[StoredPrediction]) -> BTreeMap<String, Metrics> {
    let mut by_model: BTreeMap<String, Metrics> = BTreeMap::new();
    for prediction in predictions {
        by_model
            .entry(prediction.ml_model.clone())
            .or_default()
            .update_tip(prediction.is_correct);
    }
    by_model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TeamPerspectiveStacker;
    use crate::MatchRow;
    use chrono::NaiveDate;

    fn make_match(round: u32, home: &str, away: &str, scores: Option<(u32, u32)>) -> MatchRow {
        MatchRow {
            year: 2016,
            round_number: round,
            date: NaiveDate::from_ymd_opt(2016, 4, round).unwrap(),
            venue: None,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_score: scores.map(|s| s.0),
            away_score: scores.map(|s| s.1),
            extra: Default::default(),
        }
    }

    fn make_prediction(team: &str, oppo: &str, round: u32, at_home: u8, margin: f64) -> PredictionRecord {
        PredictionRecord {
            team: team.to_string(),
            year: 2016,
            round_number: round,
            at_home,
            oppo_team: oppo.to_string(),
            ml_model: "mean_margin".to_string(),
            predicted_margin: margin,
        }
    }

    fn make_stored(round: u32, model: &str, is_correct: Option<bool>) -> StoredPrediction {
        StoredPrediction {
            year: 2016,
            round_number: round,
            ml_model: model.to_string(),
            predicted_winner: "Richmond".to_string(),
            predicted_margin: 10.0,
            is_correct,
        }
    }

    #[test]
    fn test_metrics_accumulate() {
        let mut metrics = Metrics::new();
        metrics.update_tip(Some(true));
        metrics.update_tip(Some(false));
        metrics.update_tip(None);
        metrics.update_margin(10.0, 4.0);
        metrics.update_margin(-2.0, 2.0);

        assert_eq!(metrics.total_tips, 2);
        assert_eq!(metrics.accuracy(), 0.5);
        assert_eq!(metrics.mae(), 5.0);

        let mut total = Metrics::new();
        total.merge(&metrics);
        total.merge(&metrics);
        assert_eq!(total.total_tips, 4);
    }

    #[test]
    fn test_evaluate_predictions() {
        let matches = vec![
            make_match(1, "Richmond", "Carlton", Some((100, 80))),
            make_match(2, "Carlton", "Richmond", Some((90, 70))),
            make_match(3, "Richmond", "Carlton", None),
        ];
        let table = TeamPerspectiveStacker::new().stack(&matches).unwrap();
        let predictions = vec![
            make_prediction("Richmond", "Carlton", 1, 1, 10.0),
            make_prediction("Carlton", "Richmond", 1, 0, -10.0),
            make_prediction("Carlton", "Richmond", 2, 1, -5.0),
            make_prediction("Richmond", "Carlton", 2, 0, 5.0),
            make_prediction("Richmond", "Carlton", 3, 1, 8.0),
        ];

        let metrics = evaluate_predictions(&predictions, &table);
        let mean_margin = &metrics["mean_margin"];
        assert_eq!(mean_margin.total_tips, 2);
        assert_eq!(mean_margin.correct_tips, 1);
        assert_eq!(mean_margin.margin_count, 4);
        assert_eq!(mean_margin.mae(), (10.0 + 10.0 + 25.0 + 25.0) / 4.0);
    }

    #[test]
    fn test_round_totals() {
        let stored = vec![
            make_stored(1, "betting_lasso", Some(true)),
            make_stored(1, "betting_lasso", Some(true)),
            make_stored(1, "mean_margin", Some(false)),
            make_stored(2, "betting_lasso", None),
        ];
        let totals = round_totals(&stored);

        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].correct["betting_lasso"], 2);
        assert_eq!(totals[0].correct["mean_margin"], 0);
        assert_eq!(totals[1].round_number, 2);

        let accuracy = stored_accuracy(&stored);
        assert_eq!(accuracy["betting_lasso"].total_tips, 2);
        assert_eq!(accuracy["mean_margin"].accuracy(), 0.0);
    }
}

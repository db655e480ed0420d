//! Live weekly tipping
//!
//! Picks the upcoming round from today's date, predicts it with every
//! registered model and collapses the per-team margins into one tip per
//! match.

use chrono::{Datelike, NaiveDate};
use std::fmt;

use super::backtest::{BacktestOrchestrator, PairFailure};
use crate::data::cleaning::clean_match_data;
use crate::data::import::{load_prediction_data, DataImporter};
use crate::features::{DataPipeline, FeatureTable, TeamPerspectiveStacker};
use crate::training::ModelRegistry;
use crate::{BacktestConfig, MatchRow, PredictionRecord, Result};

/// The round live tipping targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipRound {
    pub year: i32,
    pub round_number: u32,
}

impl TipRound {
    /// Earliest round of this year with a match on or after `today`
    ///
    /// None once every match of the season is in the past.
    pub fn upcoming(today: NaiveDate, matches: &[MatchRow]) -> Option<Self> {
        let year = today.year();
        matches
            .iter()
            .filter(|m| m.year == year && m.date >= today)
            .map(|m| m.round_number)
            .min()
            .map(|round_number| TipRound { year, round_number })
    }
}

impl fmt::Display for TipRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} round {}", self.year, self.round_number)
    }
}

/// One model's tip for one match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchTip {
    pub year: i32,
    pub round_number: u32,
    pub home_team: String,
    pub away_team: String,
    pub ml_model: String,
    pub predicted_winner: String,
    /// Predicted winning margin, never negative
    pub predicted_margin: f64,
}

impl MatchTip {
    /// Collapse team-perspective predictions into one tip per match and
    /// model, in first-seen order
    ///
    /// With both rows of a match the team with the higher predicted margin
    /// is tipped, home side on a tie, and the margin is the mean of the two
    /// rows' views. A lone row is tipped on its own sign.
    pub fn from_predictions(predictions: &[PredictionRecord]) -> Vec<MatchTip> {
        let mut groups: Vec<(&PredictionRecord, Option<&PredictionRecord>)> = Vec::new();

        for prediction in predictions {
            let counterpart = groups.iter_mut().find(|(first, second)| {
                second.is_none()
                    && first.ml_model == prediction.ml_model
                    && first.year == prediction.year
                    && first.round_number == prediction.round_number
                    && first.team == prediction.oppo_team
                    && first.oppo_team == prediction.team
            });
            match counterpart {
                Some(group) => group.1 = Some(prediction),
                None => groups.push((prediction, None)),
            }
        }

        groups
            .into_iter()
            .map(|(first, second)| {
                let (home, away) = match second {
                    Some(other) if other.at_home == 1 => (other, Some(first)),
                    Some(other) => (first, Some(other)),
                    None => (first, None),
                };
                let (home_team, away_team) = if home.at_home == 1 || away.is_some() {
                    (home.team.clone(), home.oppo_team.clone())
                } else {
                    (home.oppo_team.clone(), home.team.clone())
                };

                let (predicted_winner, predicted_margin) = match away {
                    Some(away) => {
                        let margin = (home.predicted_margin - away.predicted_margin) / 2.0;
                        if margin >= 0.0 {
                            (home.team.clone(), margin)
                        } else {
                            (away.team.clone(), -margin)
                        }
                    }
                    None if home.predicted_margin >= 0.0 => (home.team.clone(), home.predicted_margin),
                    None => (home.oppo_team.clone(), -home.predicted_margin),
                };

                MatchTip {
                    year: home.year,
                    round_number: home.round_number,
                    home_team,
                    away_team,
                    ml_model: home.ml_model.clone(),
                    predicted_winner,
                    predicted_margin,
                }
            })
            .collect()
    }

    /// Whether the tip was right, judged against a feature table
    pub fn outcome_in(&self, table: &FeatureTable) -> Option<bool> {
        let row = table.get(&self.home_team, self.year, self.round_number)?;
        let margin = row.margin()?;
        Some(if margin > 0.0 {
            self.predicted_winner == self.home_team
        } else if margin < 0.0 {
            self.predicted_winner == self.away_team
        } else {
            true
        })
    }
}

impl fmt::Display for MatchTip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v {}: {} by {:.1} [{}]",
            self.home_team, self.away_team, self.predicted_winner, self.predicted_margin, self.ml_model
        )
    }
}

/// Whether a tip was right: None until the match is played, and a draw
/// counts for everyone
pub fn is_correct(predicted_winner: &str, result: &MatchRow) -> Option<bool> {
    if !result.has_been_played() {
        return None;
    }
    Some(result.is_draw() || result.winner() == Some(predicted_winner))
}

/// Tips for the upcoming round
#[derive(Debug)]
pub struct TipReport {
    pub round: TipRound,
    pub tips: Vec<MatchTip>,
    pub failures: Vec<PairFailure>,
}

/// Predict the round after `today` with every registered model
///
/// Loads `prediction_seasons` seasons of history plus this season's
/// fixtures. Returns None when no round is left to tip this year.
pub fn tip(
    importer: &dyn DataImporter,
    pipeline: &DataPipeline,
    registry: &mut ModelRegistry,
    config: &BacktestConfig,
    today: NaiveDate,
) -> Result<Option<TipReport>> {
    let year = today.year();
    let start = NaiveDate::from_ymd_opt(year - config.prediction_seasons, 1, 1).unwrap_or(today);
    let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today);

    let records = load_prediction_data(importer, start, end, true)?;
    let matches = clean_match_data(&records, None)?;

    let round = match TipRound::upcoming(today, &matches) {
        Some(round) => round,
        None => {
            log::info!("No matches left to tip in {}", year);
            return Ok(None);
        }
    };
    log::info!("Tipping {}", round);

    let table = TeamPerspectiveStacker::new().stack(&matches)?;
    let table = pipeline.run(table)?;

    let report = BacktestOrchestrator::new(&table).make_predictions(
        round.year..round.year + 1,
        Some(round.round_number),
        registry,
        config.train,
    )?;

    Ok(Some(TipReport {
        round,
        tips: MatchTip::from_predictions(&report.predictions),
        failures: report.failures,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_match(round: u32, day: u32, scores: Option<(u32, u32)>) -> MatchRow {
        MatchRow {
            year: 2017,
            round_number: round,
            date: NaiveDate::from_ymd_opt(2017, 4, day).unwrap(),
            venue: None,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            home_score: scores.map(|s| s.0),
            away_score: scores.map(|s| s.1),
            extra: BTreeMap::new(),
        }
    }

    fn make_prediction(team: &str, oppo: &str, at_home: u8, margin: f64) -> PredictionRecord {
        PredictionRecord {
            team: team.to_string(),
            year: 2017,
            round_number: 3,
            at_home,
            oppo_team: oppo.to_string(),
            ml_model: "betting_lasso".to_string(),
            predicted_margin: margin,
        }
    }

    #[test]
    fn test_upcoming_round() {
        let matches = vec![make_match(1, 2, Some((90, 80))), make_match(2, 9, None), make_match(3, 16, None)];
        let today = NaiveDate::from_ymd_opt(2017, 4, 5).unwrap();
        assert_eq!(
            TipRound::upcoming(today, &matches),
            Some(TipRound {
                year: 2017,
                round_number: 2
            })
        );

        let after_season = NaiveDate::from_ymd_opt(2017, 10, 1).unwrap();
        assert_eq!(TipRound::upcoming(after_season, &matches), None);
    }

    #[test]
    fn test_tip_from_both_rows() {
        let predictions = vec![
            make_prediction("Carlton", "Richmond", 0, 4.0),
            make_prediction("Richmond", "Carlton", 1, -10.0),
        ];
        let tips = MatchTip::from_predictions(&predictions);

        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].home_team, "Richmond");
        assert_eq!(tips[0].away_team, "Carlton");
        assert_eq!(tips[0].predicted_winner, "Carlton");
        assert_eq!(tips[0].predicted_margin, 7.0);
    }

    #[test]
    fn test_tip_from_single_away_row() {
        let tips = MatchTip::from_predictions(&[make_prediction("Carlton", "Richmond", 0, -6.0)]);
        assert_eq!(tips[0].home_team, "Richmond");
        assert_eq!(tips[0].predicted_winner, "Richmond");
        assert_eq!(tips[0].predicted_margin, 6.0);
    }

    #[test]
    fn test_models_tipped_separately() {
        let mut other = make_prediction("Richmond", "Carlton", 1, 12.0);
        other.ml_model = "mean_margin".to_string();
        let predictions = vec![
            make_prediction("Richmond", "Carlton", 1, 3.0),
            other,
            make_prediction("Carlton", "Richmond", 0, -3.0),
        ];
        let tips = MatchTip::from_predictions(&predictions);

        assert_eq!(tips.len(), 2);
        assert_eq!(tips[0].ml_model, "betting_lasso");
        assert_eq!(tips[0].predicted_margin, 3.0);
        assert_eq!(tips[1].ml_model, "mean_margin");
        assert_eq!(tips[1].predicted_winner, "Richmond");
    }

    #[test]
    fn test_is_correct() {
        assert_eq!(is_correct("Richmond", &make_match(1, 2, None)), None);
        assert_eq!(is_correct("Richmond", &make_match(1, 2, Some((90, 80)))), Some(true));
        assert_eq!(is_correct("Carlton", &make_match(1, 2, Some((90, 80)))), Some(false));
        assert_eq!(is_correct("Carlton", &make_match(1, 2, Some((85, 85)))), Some(true));
    }
}

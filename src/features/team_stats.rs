//! Team form features
//!
//! Every function works on one team's rows of one season at a time, in round
//! order. Cumulative values describe the team going into a round, so they
//! only ever read the rounds before it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use super::builder::FeatureStep;
use super::table::{FeatureTable, TeamRoundRow};
use crate::LadderTieBreak;

const WIN_POINTS: f64 = 4.0;
const DRAW_POINTS: f64 = 2.0;

/// Index ranges of each team's rows per season
pub fn season_ranges(table: &FeatureTable) -> Vec<Range<usize>> {
    let rows = table.rows();
    let mut ranges = Vec::new();

    for team in table.team_ranges() {
        let mut start = team.start;
        for i in team.start + 1..=team.end {
            if i == team.end || rows[i].year != rows[start].year {
                ranges.push(start..i);
                start = i;
            }
        }
    }

    ranges
}

/// Each row's value of `column` from the team's previous round that season
fn shifted_values(table: &FeatureTable, column: &str) -> Vec<Option<f64>> {
    let rows = table.rows();
    let mut shifted = vec![None; rows.len()];
    for range in season_ranges(table) {
        for i in range.start + 1..range.end {
            shifted[i] = rows[i - 1].get(column);
        }
    }
    shifted
}

/// Ladder points earned by a played row
fn match_points(row: &TeamRoundRow) -> Option<f64> {
    let margin = row.margin()?;
    Some(match margin.partial_cmp(&0.0) {
        Some(Ordering::Greater) => WIN_POINTS,
        Some(Ordering::Equal) => DRAW_POINTS,
        _ => 0.0,
    })
}

/// `result`: 1 for a win, 0 for a draw or loss, missing until played
pub fn add_result() -> FeatureStep {
    FeatureStep::new("add_result", &["score", "oppo_score"], &["result"], |table| {
        for row in table.rows_mut() {
            let result = row.margin().map(|m| if m > 0.0 { 1.0 } else { 0.0 });
            row.set("result", result)?;
        }
        Ok(())
    })
}

/// `betting_pred_win`: 1 when the bookmakers favour the team on either
/// market, 0.5 when both markets are level
pub fn add_betting_pred_win() -> FeatureStep {
    FeatureStep::new(
        "add_betting_pred_win",
        &["win_odds", "oppo_win_odds", "line_odds", "oppo_line_odds"],
        &["betting_pred_win"],
        |table| {
            for row in table.rows_mut() {
                let win = (row.get("win_odds"), row.get("oppo_win_odds"));
                let line = (row.get("line_odds"), row.get("oppo_line_odds"));

                let favoured = |pair: (Option<f64>, Option<f64>)| match pair {
                    (Some(own), Some(oppo)) => own < oppo,
                    _ => false,
                };
                let level = |pair: (Option<f64>, Option<f64>)| match pair {
                    (Some(own), Some(oppo)) => own == oppo,
                    _ => false,
                };

                let value = if favoured(win) || favoured(line) {
                    1.0
                } else if level(win) && level(line) {
                    0.5
                } else {
                    0.0
                };
                row.set("betting_pred_win", Some(value))?;
            }
            Ok(())
        },
    )
}

/// `cum_win_points`: season-to-date ladder points before the round
pub fn add_cum_win_points() -> FeatureStep {
    FeatureStep::new(
        "add_cum_win_points",
        &["score", "oppo_score"],
        &["cum_win_points"],
        |table| {
            for range in season_ranges(table) {
                let mut total = 0.0;
                for row in &mut table.rows_mut()[range] {
                    row.set("cum_win_points", Some(total))?;
                    total += match_points(row).unwrap_or(0.0);
                }
            }
            Ok(())
        },
    )
}

/// `win_streak`: consecutive wins (positive) or losses (negative) before
/// the round; a draw resets it to zero
pub fn add_win_streak() -> FeatureStep {
    FeatureStep::new("add_win_streak", &["score", "oppo_score"], &["win_streak"], |table| {
        for range in season_ranges(table) {
            let mut streak: f64 = 0.0;
            for row in &mut table.rows_mut()[range] {
                row.set("win_streak", Some(streak))?;
                streak = match row.margin().and_then(|m| m.partial_cmp(&0.0)) {
                    Some(Ordering::Greater) => streak.max(0.0) + 1.0,
                    Some(Ordering::Less) => streak.min(0.0) - 1.0,
                    Some(Ordering::Equal) => 0.0,
                    None => streak,
                };
            }
        }
        Ok(())
    })
}

/// `cum_percent`: season-to-date points for over points against, times
/// 100, before the round; missing until anything has been conceded
pub fn add_cum_percent() -> FeatureStep {
    FeatureStep::new("add_cum_percent", &["score", "oppo_score"], &["cum_percent"], |table| {
        for range in season_ranges(table) {
            let mut tally = Tally::default();
            for row in &mut table.rows_mut()[range] {
                row.set("cum_percent", tally.percentage())?;
                tally.record(row);
            }
        }
        Ok(())
    })
}

/// Season-to-date totals for one team
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    points: f64,
    score_for: f64,
    score_against: f64,
}

impl Tally {
    fn record(&mut self, row: &TeamRoundRow) {
        if let (Some(points), Some(score), Some(oppo)) = (match_points(row), row.score, row.oppo_score) {
            self.points += points;
            self.score_for += score;
            self.score_against += oppo;
        }
    }

    /// Percentage for ranking: a team that has scored without conceding
    /// sits above any finite percentage
    fn ladder_percentage(&self) -> f64 {
        match self.percentage() {
            Some(percentage) => percentage,
            None if self.score_for > 0.0 => f64::INFINITY,
            None => 0.0,
        }
    }

    fn percentage(&self) -> Option<f64> {
        if self.score_against > 0.0 {
            Some(self.score_for / self.score_against * 100.0)
        } else {
            None
        }
    }
}

/// `ladder_position`: the team's place on the ladder going into the round
///
/// Every team seen in the season is ranked on ladder points, then by the
/// configured tie-break, then by name.
pub fn add_ladder_position(tie_break: LadderTieBreak) -> FeatureStep {
    FeatureStep::new(
        "add_ladder_position",
        &["score", "oppo_score"],
        &["ladder_position"],
        move |table| {
            let mut rounds: BTreeMap<(i32, u32), Vec<usize>> = BTreeMap::new();
            let mut teams: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
            for (i, row) in table.rows().iter().enumerate() {
                rounds.entry((row.year, row.round_number)).or_default().push(i);
                teams.entry(row.year).or_default().insert(row.team.clone());
            }

            let mut season = None;
            let mut tallies: HashMap<String, Tally> = HashMap::new();

            for ((year, _), indices) in rounds {
                if season != Some(year) {
                    season = Some(year);
                    tallies.clear();
                }

                let mut ladder: Vec<(&String, Tally)> = teams[&year]
                    .iter()
                    .map(|t| (t, tallies.get(t).copied().unwrap_or_default()))
                    .collect();
                ladder.sort_by(|(a_team, a), (b_team, b)| {
                    let by_points = b.points.total_cmp(&a.points);
                    let by_tie_break = match tie_break {
                        LadderTieBreak::Percentage => {
                            b.ladder_percentage().total_cmp(&a.ladder_percentage())
                        }
                        LadderTieBreak::Alphabetical => Ordering::Equal,
                    };
                    by_points.then(by_tie_break).then_with(|| a_team.cmp(b_team))
                });
                let positions: HashMap<String, f64> = ladder
                    .iter()
                    .enumerate()
                    .map(|(i, (team, _))| (team.to_string(), (i + 1) as f64))
                    .collect();

                let rows = table.rows_mut();
                for &i in &indices {
                    let position = positions.get(&rows[i].team).copied();
                    rows[i].set("ladder_position", position)?;
                }
                for &i in &indices {
                    tallies.entry(rows[i].team.clone()).or_default().record(&rows[i]);
                }
            }
            Ok(())
        },
    )
}

/// Replace each named column with the team's value from its previous
/// round that season; the first round of a season becomes missing
pub fn add_shifted_team_features(columns: &[&str]) -> FeatureStep {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let shifted = columns.clone();

    FeatureStep::with_columns("add_shifted_team_features", columns.clone(), vec![], move |table| {
        for column in &shifted {
            let values = shifted_values(table, column);
            for (row, value) in table.rows_mut().iter_mut().zip(values) {
                row.set(column, value)?;
            }
        }
        Ok(())
    })
    .overwriting(columns)
}

/// Like [`add_shifted_team_features`] but writes `last_week_<column>` and
/// leaves the source column alone
pub fn add_last_week_features(columns: &[&str]) -> FeatureStep {
    let requires: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let produces: Vec<String> = columns.iter().map(|c| format!("last_week_{}", c)).collect();
    let pairs: Vec<(String, String)> = requires.iter().cloned().zip(produces.iter().cloned()).collect();

    FeatureStep::with_columns("add_last_week_features", requires, produces, move |table| {
        for (column, output) in &pairs {
            let values = shifted_values(table, column);
            for (row, value) in table.rows_mut().iter_mut().zip(values) {
                row.set(output, value)?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::stacker::TeamPerspectiveStacker;
    use crate::MatchRow;
    use chrono::NaiveDate;

    fn make_match(year: i32, round: u32, home: &str, away: &str, scores: Option<(u32, u32)>) -> MatchRow {
        MatchRow {
            year,
            round_number: round,
            date: NaiveDate::from_ymd_opt(year, 3, 1).unwrap() + chrono::Duration::weeks(round as i64),
            venue: None,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_score: scores.map(|s| s.0),
            away_score: scores.map(|s| s.1),
            extra: Default::default(),
        }
    }

    fn season() -> FeatureTable {
        let matches = vec![
            make_match(2016, 1, "Richmond", "Carlton", Some((100, 80))),
            make_match(2016, 1, "Geelong", "Sydney", Some((70, 70))),
            make_match(2016, 2, "Carlton", "Geelong", Some((90, 60))),
            make_match(2016, 2, "Sydney", "Richmond", Some((110, 50))),
            make_match(2016, 3, "Richmond", "Geelong", Some((95, 94))),
            make_match(2016, 3, "Carlton", "Sydney", None),
            make_match(2017, 1, "Richmond", "Sydney", Some((60, 80))),
        ];
        TeamPerspectiveStacker::new().stack(&matches).unwrap()
    }

    fn run(step: FeatureStep) -> FeatureTable {
        let mut table = season();
        step.apply(&mut table).unwrap();
        for column in step.produces() {
            table.add_column(column);
        }
        table
    }

    fn value(table: &FeatureTable, team: &str, year: i32, round: u32, column: &str) -> Option<f64> {
        table.get(team, year, round).unwrap().get(column)
    }

    #[test]
    fn test_result() {
        let table = run(add_result());
        assert_eq!(value(&table, "Richmond", 2016, 1, "result"), Some(1.0));
        assert_eq!(value(&table, "Carlton", 2016, 1, "result"), Some(0.0));
        assert_eq!(value(&table, "Geelong", 2016, 1, "result"), Some(0.0));
        assert_eq!(value(&table, "Carlton", 2016, 3, "result"), None);
    }

    #[test]
    fn test_cum_win_points_reset_each_season() {
        let table = run(add_cum_win_points());
        assert_eq!(value(&table, "Richmond", 2016, 1, "cum_win_points"), Some(0.0));
        assert_eq!(value(&table, "Richmond", 2016, 2, "cum_win_points"), Some(4.0));
        assert_eq!(value(&table, "Richmond", 2016, 3, "cum_win_points"), Some(4.0));
        assert_eq!(value(&table, "Geelong", 2016, 2, "cum_win_points"), Some(2.0));
        assert_eq!(value(&table, "Richmond", 2017, 1, "cum_win_points"), Some(0.0));
    }

    #[test]
    fn test_win_streak_flips_sign() {
        let table = run(add_win_streak());
        assert_eq!(value(&table, "Richmond", 2016, 2, "win_streak"), Some(1.0));
        assert_eq!(value(&table, "Richmond", 2016, 3, "win_streak"), Some(-1.0));
        assert_eq!(value(&table, "Sydney", 2016, 2, "win_streak"), Some(0.0));
        assert_eq!(value(&table, "Carlton", 2016, 3, "win_streak"), Some(1.0));
        assert_eq!(value(&table, "Geelong", 2016, 3, "win_streak"), Some(-1.0));
        assert_eq!(value(&table, "Richmond", 2017, 1, "win_streak"), Some(0.0));
    }

    #[test]
    fn test_cum_percent() {
        let table = run(add_cum_percent());
        assert_eq!(value(&table, "Richmond", 2016, 1, "cum_percent"), None);
        assert_eq!(value(&table, "Richmond", 2016, 2, "cum_percent"), Some(125.0));
        assert_eq!(value(&table, "Richmond", 2016, 3, "cum_percent"), Some(150.0 / 190.0 * 100.0));
    }

    #[test]
    fn test_ladder_position_uses_percentage() {
        let table = run(add_ladder_position(LadderTieBreak::Percentage));

        // Round 1: nobody has played, so alphabetical order
        assert_eq!(value(&table, "Carlton", 2016, 1, "ladder_position"), Some(1.0));
        assert_eq!(value(&table, "Sydney", 2016, 1, "ladder_position"), Some(4.0));

        // After round 1: Richmond 4pts, Geelong and Sydney 2pts at 100%, Carlton 0
        assert_eq!(value(&table, "Richmond", 2016, 2, "ladder_position"), Some(1.0));
        assert_eq!(value(&table, "Geelong", 2016, 2, "ladder_position"), Some(2.0));
        assert_eq!(value(&table, "Sydney", 2016, 2, "ladder_position"), Some(3.0));
        assert_eq!(value(&table, "Carlton", 2016, 2, "ladder_position"), Some(4.0));

        // After round 2: Sydney 6pts; Richmond and Carlton 4pts, Carlton on
        // 170/210 ahead of Richmond on 150/190
        assert_eq!(value(&table, "Richmond", 2016, 3, "ladder_position"), Some(3.0));
        assert_eq!(value(&table, "Carlton", 2016, 3, "ladder_position"), Some(2.0));
        assert_eq!(value(&table, "Sydney", 2016, 3, "ladder_position"), Some(1.0));

        // New season starts level
        assert_eq!(value(&table, "Richmond", 2017, 1, "ladder_position"), Some(1.0));
    }

    #[test]
    fn test_unconceded_team_tops_level_teams() {
        let matches = vec![
            make_match(2018, 1, "Sydney", "Brisbane", Some((50, 0))),
            make_match(2018, 1, "Carlton", "Essendon", Some((100, 20))),
            make_match(2018, 2, "Sydney", "Carlton", None),
            make_match(2018, 2, "Brisbane", "Essendon", None),
        ];
        let mut table = TeamPerspectiveStacker::new().stack(&matches).unwrap();
        add_ladder_position(LadderTieBreak::Percentage).apply(&mut table).unwrap();

        assert_eq!(value(&table, "Sydney", 2018, 2, "ladder_position"), Some(1.0));
        assert_eq!(value(&table, "Carlton", 2018, 2, "ladder_position"), Some(2.0));
        // Essendon at 20% ahead of Brisbane, who never scored
        assert_eq!(value(&table, "Essendon", 2018, 2, "ladder_position"), Some(3.0));
        assert_eq!(value(&table, "Brisbane", 2018, 2, "ladder_position"), Some(4.0));
    }

    #[test]
    fn test_ladder_position_alphabetical() {
        let table = run(add_ladder_position(LadderTieBreak::Alphabetical));
        // Carlton and Richmond level on points; Carlton first by name
        assert_eq!(value(&table, "Carlton", 2016, 3, "ladder_position"), Some(2.0));
        assert_eq!(value(&table, "Richmond", 2016, 3, "ladder_position"), Some(3.0));
    }

    #[test]
    fn test_shifted_features_overwrite_in_place() {
        let table = run(add_shifted_team_features(&["score"]));
        assert_eq!(value(&table, "Richmond", 2016, 1, "score"), None);
        assert_eq!(value(&table, "Richmond", 2016, 2, "score"), Some(100.0));
        assert_eq!(value(&table, "Richmond", 2016, 3, "score"), Some(50.0));
        assert_eq!(value(&table, "Richmond", 2017, 1, "score"), None);
    }

    #[test]
    fn test_last_week_features() {
        let table = run(add_last_week_features(&["score", "oppo_score"]));
        assert_eq!(value(&table, "Richmond", 2016, 2, "score"), Some(50.0));
        assert_eq!(value(&table, "Richmond", 2016, 2, "last_week_score"), Some(100.0));
        assert_eq!(value(&table, "Richmond", 2016, 2, "last_week_oppo_score"), Some(80.0));
        assert_eq!(value(&table, "Richmond", 2016, 1, "last_week_score"), None);
        assert!(table.has_column("last_week_oppo_score"));
    }

    #[test]
    fn test_betting_pred_win() {
        let mut table = season();
        for row in table.rows_mut() {
            let (win, oppo_win) = if row.team == "Richmond" { (1.5, 2.6) } else { (2.0, 2.0) };
            row.set("win_odds", Some(win)).unwrap();
            row.set("oppo_win_odds", Some(oppo_win)).unwrap();
            row.set("line_odds", Some(0.0)).unwrap();
            row.set("oppo_line_odds", Some(0.0)).unwrap();
        }
        add_betting_pred_win().apply(&mut table).unwrap();

        assert_eq!(value(&table, "Richmond", 2016, 1, "betting_pred_win"), Some(1.0));
        assert_eq!(value(&table, "Carlton", 2016, 1, "betting_pred_win"), Some(0.5));

        let row = table.rows_mut().iter_mut().find(|r| r.team == "Geelong").unwrap();
        row.set("line_odds", Some(6.5)).unwrap();
        let mut geelong = FeatureTable::from_rows(vec![row.clone()], vec![]).unwrap();
        add_betting_pred_win().apply(&mut geelong).unwrap();
        assert_eq!(geelong.rows()[0].get("betting_pred_win"), Some(0.0));
    }

    #[test]
    fn test_cumulative_features_ignore_own_round() {
        let mut changed = season();
        let row = changed
            .rows_mut()
            .iter_mut()
            .find(|r| r.team == "Richmond" && r.year == 2016 && r.round_number == 2)
            .unwrap();
        row.score = Some(150.0);

        for step in [add_cum_win_points(), add_win_streak(), add_cum_percent(), add_ladder_position(LadderTieBreak::Percentage)] {
            let column = step.produces()[0].clone();
            let mut original = season();
            step.apply(&mut original).unwrap();
            let mut altered = changed.clone();
            step.apply(&mut altered).unwrap();
            assert_eq!(
                value(&original, "Richmond", 2016, 2, &column),
                value(&altered, "Richmond", 2016, 2, &column),
                "{} leaked the current round",
                column
            );
        }
    }
}

//! Match-to-team stacking
//!
//! Each match becomes two rows, one per team, so the unit of analysis is a
//! team's round rather than a fixture.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::table::{FeatureTable, TeamRoundRow};
use crate::{MatchRow, Result, TipError};

const HOME_PREFIX: &str = "home_";
const AWAY_PREFIX: &str = "away_";

/// How an extra match column lands on the stacked rows
#[derive(Debug, Clone, PartialEq)]
enum ExtraColumn {
    /// `home_<name>`/`away_<name>` pair: `<name>` is the team's own value,
    /// `oppo_<name>` the opponent's
    Pair(String),
    /// Copied verbatim to both rows
    Shared(String),
}

/// Converts home/away match rows into team-perspective rows
#[derive(Debug, Default, Clone)]
pub struct TeamPerspectiveStacker;

impl TeamPerspectiveStacker {
    pub fn new() -> Self {
        TeamPerspectiveStacker
    }

    /// Stack matches into a sorted feature table
    ///
    /// Played matches need both scores; fixtures have neither. A match with
    /// only one score cannot yield `score`/`oppo_score` for both rows.
    pub fn stack(&self, matches: &[MatchRow]) -> Result<FeatureTable> {
        let layout = Self::extra_layout(matches)?;
        let columns = Self::output_columns(&layout);

        let mut rows = Vec::with_capacity(matches.len() * 2);
        for m in matches {
            let (home_score, away_score) = match (m.home_score, m.away_score) {
                (Some(h), Some(a)) => (Some(h as f64), Some(a as f64)),
                (None, None) => (None, None),
                (home, _) => {
                    let missing = if home.is_none() { "score" } else { "oppo_score" };
                    return Err(TipError::MissingRequiredColumns {
                        columns: vec![missing.to_string()],
                        context: format!(
                            "{} v {} in {} round {}",
                            m.home_team, m.away_team, m.year, m.round_number
                        ),
                    });
                }
            };

            let mut home = TeamRoundRow::new(&m.home_team, &m.away_team, m.year, m.round_number, 1, m.date);
            home.venue = m.venue.clone();
            home.score = home_score;
            home.oppo_score = away_score;

            let mut away = TeamRoundRow::new(&m.away_team, &m.home_team, m.year, m.round_number, 0, m.date);
            away.venue = m.venue.clone();
            away.score = away_score;
            away.oppo_score = home_score;

            for (key, kind) in &layout {
                match kind {
                    ExtraColumn::Pair(name) => {
                        let home_value = m.extra.get(&format!("{}{}", HOME_PREFIX, name)).copied();
                        let away_value = m.extra.get(&format!("{}{}", AWAY_PREFIX, name)).copied();
                        let oppo_name = format!("oppo_{}", name);
                        home.set(name, home_value)?;
                        home.set(&oppo_name, away_value)?;
                        away.set(name, away_value)?;
                        away.set(&oppo_name, home_value)?;
                    }
                    ExtraColumn::Shared(name) => {
                        let value = m.extra.get(key).copied();
                        home.set(name, value)?;
                        away.set(name, value)?;
                    }
                }
            }

            rows.push(home);
            rows.push(away);
        }

        log::debug!("Stacked {} matches into {} team rows", matches.len(), rows.len());
        FeatureTable::from_rows(rows, columns)
    }

    /// Classify every extra column seen across the matches
    fn extra_layout(matches: &[MatchRow]) -> Result<BTreeMap<String, ExtraColumn>> {
        let keys: BTreeSet<&str> = matches
            .iter()
            .flat_map(|m| m.extra.keys().map(String::as_str))
            .collect();

        let mut layout = BTreeMap::new();
        for key in &keys {
            if let Some(name) = key.strip_prefix(HOME_PREFIX) {
                if keys.contains(format!("{}{}", AWAY_PREFIX, name).as_str()) {
                    layout.insert(key.to_string(), ExtraColumn::Pair(name.to_string()));
                    continue;
                }
            }
            if let Some(name) = key.strip_prefix(AWAY_PREFIX) {
                // Handled with its home_ half
                if keys.contains(format!("{}{}", HOME_PREFIX, name).as_str()) {
                    continue;
                }
            }
            layout.insert(key.to_string(), ExtraColumn::Shared(key.to_string()));
        }

        let outputs = Self::output_columns(&layout);
        let mut seen = HashSet::new();
        for column in &outputs {
            if is_reserved(column) || !seen.insert(column.as_str()) {
                return Err(TipError::InvalidPipeline(format!(
                    "match column {} collides with another stacked column",
                    column
                )));
            }
        }

        Ok(layout)
    }

    fn output_columns(layout: &BTreeMap<String, ExtraColumn>) -> Vec<String> {
        layout
            .values()
            .flat_map(|kind| match kind {
                ExtraColumn::Pair(name) => vec![name.clone(), format!("oppo_{}", name)],
                ExtraColumn::Shared(name) => vec![name.clone()],
            })
            .collect()
    }
}

fn is_reserved(column: &str) -> bool {
    matches!(
        column,
        "team" | "oppo_team" | "year" | "round_number" | "at_home" | "score" | "oppo_score" | "venue"
    )
}

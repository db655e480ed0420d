//! Match data cleaning
//!
//! Resolves season years and round labels into ordinal round numbers and
//! translates team nicknames into canonical names.

use regex::Regex;
use std::collections::BTreeMap;

use crate::{MatchRecord, MatchRow, Result, TipError};

/// Maps betting-site nicknames onto the names used in match data
pub const TEAM_TRANSLATIONS: &[(&str, &str)] = &[
    ("Tigers", "Richmond"),
    ("Blues", "Carlton"),
    ("Demons", "Melbourne"),
    ("Giants", "GWS"),
    ("Suns", "Gold Coast"),
    ("Bombers", "Essendon"),
    ("Swans", "Sydney"),
    ("Magpies", "Collingwood"),
    ("Kangaroos", "North Melbourne"),
    ("Crows", "Adelaide"),
    ("Bulldogs", "Western Bulldogs"),
    ("Dockers", "Fremantle"),
    ("Power", "Port Adelaide"),
    ("Saints", "St Kilda"),
    ("Eagles", "West Coast"),
    ("Lions", "Brisbane"),
    ("Cats", "Geelong"),
    ("Hawks", "Hawthorn"),
    ("Adelaide Crows", "Adelaide"),
    ("Brisbane Lions", "Brisbane"),
    ("Gold Coast Suns", "Gold Coast"),
    ("GWS Giants", "GWS"),
    ("Geelong Cats", "Geelong"),
    ("West Coast Eagles", "West Coast"),
    ("Sydney Swans", "Sydney"),
];

/// Canonical team name for a raw name or nickname
pub fn canonical_team_name(name: &str) -> String {
    let trimmed = name.trim();
    TEAM_TRANSLATIONS
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Turns round labels into round numbers
///
/// Finals are numbered contiguously after the season's last regular round:
/// qualifying/elimination +1, semi +2, preliminary +3, grand +4. Patterns are
/// tried in that order and the first match wins.
pub struct RoundLabelResolver {
    regular: Regex,
    any_digits: Regex,
    qualifying: Regex,
    elimination: Regex,
    semi: Regex,
    preliminary: Regex,
    grand: Regex,
}

impl Default for RoundLabelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundLabelResolver {
    pub fn new() -> Self {
        RoundLabelResolver {
            regular: Regex::new(r"(?i)round\s+(\d+)$").unwrap(),
            any_digits: Regex::new(r"(\d+)").unwrap(),
            qualifying: Regex::new(r"(?i)qualifying").unwrap(),
            elimination: Regex::new(r"(?i)elimination").unwrap(),
            semi: Regex::new(r"(?i)semi").unwrap(),
            preliminary: Regex::new(r"(?i)preliminary").unwrap(),
            grand: Regex::new(r"(?i)grand").unwrap(),
        }
    }

    /// Resolve a single label given the season's last regular round
    pub fn resolve(&self, label: &str, max_regular_round: u32) -> Result<u32> {
        let label = label.trim();

        if let Some(caps) = self.regular.captures(label) {
            return caps[1]
                .parse()
                .map_err(|_| TipError::UnrecognizedRoundLabel(label.to_string()));
        }
        if self.qualifying.is_match(label) || self.elimination.is_match(label) {
            return Ok(max_regular_round + 1);
        }
        if self.semi.is_match(label) {
            return Ok(max_regular_round + 2);
        }
        if self.preliminary.is_match(label) {
            return Ok(max_regular_round + 3);
        }
        if self.grand.is_match(label) {
            return Ok(max_regular_round + 4);
        }

        Err(TipError::UnrecognizedRoundLabel(label.to_string()))
    }

    /// Largest number found in any of a season's labels
    pub fn max_regular_round<'a, I>(&self, labels: I) -> Option<u32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels
            .into_iter()
            .filter_map(|label| self.any_digits.captures(label))
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .max()
    }
}

/// Clean raw match records into rows with resolved year and round number
///
/// `max_regular_round` is computed per season before any label in that
/// season is resolved. `years` optionally keeps only seasons in an inclusive
/// range.
pub fn clean_match_data(
    records: &[MatchRecord],
    years: Option<(i32, i32)>,
) -> Result<Vec<MatchRow>> {
    clean_with_known_labels(records, years, &BTreeMap::new())
}

/// [`clean_match_data`] for a partial season
///
/// `known_labels` holds round labels already seen for each season, such as
/// those of stored matches. They count towards `max_regular_round`, so a
/// batch holding only finals still resolves them past the last regular
/// round.
pub fn clean_with_known_labels(
    records: &[MatchRecord],
    years: Option<(i32, i32)>,
    known_labels: &BTreeMap<i32, Vec<String>>,
) -> Result<Vec<MatchRow>> {
    let resolver = RoundLabelResolver::new();

    let in_range = |year: i32| match years {
        Some((min_year, max_year)) => year >= min_year && year <= max_year,
        None => true,
    };

    let mut labels_by_year: BTreeMap<i32, Vec<&str>> = BTreeMap::new();
    for record in records.iter().filter(|r| in_range(r.year())) {
        let labels = labels_by_year.entry(record.year()).or_default();
        if labels.is_empty() {
            if let Some(known) = known_labels.get(&record.year()) {
                labels.extend(known.iter().map(String::as_str));
            }
        }
        labels.push(record.round_label.as_str());
    }

    let max_rounds: BTreeMap<i32, u32> = labels_by_year
        .into_iter()
        .map(|(year, labels)| {
            let max_round = resolver.max_regular_round(labels).unwrap_or_else(|| {
                log::warn!("No numbered rounds in {}, finals will start at round 1", year);
                0
            });
            (year, max_round)
        })
        .collect();

    let mut rows = Vec::with_capacity(records.len());
    for record in records.iter().filter(|r| in_range(r.year())) {
        let year = record.year();
        let max_regular_round = max_rounds.get(&year).copied().unwrap_or(0);
        let round_number = resolver.resolve(&record.round_label, max_regular_round)?;

        rows.push(MatchRow {
            year,
            round_number,
            date: record.date,
            venue: record.venue.clone(),
            home_team: canonical_team_name(&record.home_team),
            away_team: canonical_team_name(&record.away_team),
            home_score: record.home_score,
            away_score: record.away_score,
            extra: record.extra.clone(),
        });
    }

    log::debug!("Cleaned {} of {} match records", rows.len(), records.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_record(season: i32, label: &str) -> MatchRecord {
        MatchRecord {
            season: Some(season),
            round_label: label.to_string(),
            date: NaiveDate::from_ymd_opt(season, 6, 1).unwrap(),
            venue: None,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            home_score: Some(100),
            away_score: Some(80),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_resolve_regular_round() {
        let resolver = RoundLabelResolver::new();
        assert_eq!(resolver.resolve("Round 3", 23).unwrap(), 3);
        assert_eq!(resolver.resolve("round  17", 23).unwrap(), 17);
    }

    #[test]
    fn test_resolve_finals() {
        let resolver = RoundLabelResolver::new();
        assert_eq!(resolver.resolve("Qualifying Final", 23).unwrap(), 24);
        assert_eq!(resolver.resolve("Elimination Final", 23).unwrap(), 24);
        assert_eq!(resolver.resolve("Semi Final", 23).unwrap(), 25);
        assert_eq!(resolver.resolve("Preliminary Final", 23).unwrap(), 26);
        assert_eq!(resolver.resolve("Grand Final", 23).unwrap(), 27);
    }

    #[test]
    fn test_unrecognized_label() {
        let resolver = RoundLabelResolver::new();
        let err = resolver.resolve("Pre-season Cup", 23).unwrap_err();
        assert!(matches!(err, TipError::UnrecognizedRoundLabel(ref l) if l == "Pre-season Cup"));
    }

    #[test]
    fn test_first_pattern_wins() {
        // A label naming two finals resolves by the earlier pattern
        let resolver = RoundLabelResolver::new();
        assert_eq!(resolver.resolve("Semi Grand", 20).unwrap(), 22);
    }

    #[test]
    fn test_max_round_computed_per_season() {
        let records = vec![
            make_record(2015, "Round 1"),
            make_record(2015, "Round 22"),
            make_record(2015, "Grand Final"),
            make_record(2016, "Round 1"),
            make_record(2016, "Round 23"),
            make_record(2016, "Qualifying Final"),
            make_record(2016, "Grand Final"),
        ];

        let rows = clean_match_data(&records, None).unwrap();
        let rounds: Vec<(i32, u32)> = rows.iter().map(|r| (r.year, r.round_number)).collect();

        assert_eq!(
            rounds,
            vec![
                (2015, 1),
                (2015, 22),
                (2015, 26),
                (2016, 1),
                (2016, 23),
                (2016, 24),
                (2016, 27)
            ]
        );
    }

    #[test]
    fn test_regular_rounds_precede_finals() {
        let labels = [
            "Round 1",
            "Round 12",
            "Round 23",
            "Elimination Final",
            "Semi Final",
            "Preliminary Final",
            "Grand Final",
        ];
        let records: Vec<MatchRecord> = labels.iter().map(|l| make_record(2017, l)).collect();
        let rows = clean_match_data(&records, None).unwrap();

        let max_regular = rows[..3].iter().map(|r| r.round_number).max().unwrap();
        let min_finals = rows[3..].iter().map(|r| r.round_number).min().unwrap();
        assert!(max_regular < min_finals);
        assert!(rows.windows(2).all(|w| w[0].round_number <= w[1].round_number));
    }

    #[test]
    fn test_year_filter_and_team_translation() {
        let mut record = make_record(2014, "Round 1");
        record.home_team = "Tigers".to_string();
        record.away_team = "West Coast Eagles".to_string();
        let records = vec![record, make_record(2012, "Round 1")];

        let rows = clean_match_data(&records, Some((2013, 2016))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].home_team, "Richmond");
        assert_eq!(rows[0].away_team, "West Coast");
    }

    #[test]
    fn test_unknown_label_fails_cleaning() {
        let records = vec![make_record(2016, "Round 1"), make_record(2016, "Bye")];
        assert!(matches!(
            clean_match_data(&records, None),
            Err(TipError::UnrecognizedRoundLabel(_))
        ));
    }

    #[test]
    fn test_known_labels_place_finals_only_batch() {
        let mut known = BTreeMap::new();
        known.insert(2016, vec!["Round 1".to_string(), "Round 23".to_string()]);
        let records = vec![make_record(2016, "Qualifying Final")];

        let rows = clean_with_known_labels(&records, None, &known).unwrap();
        assert_eq!(rows[0].round_number, 24);

        // Without the stored labels the final has nothing to follow
        let rows = clean_match_data(&records, None).unwrap();
        assert_eq!(rows[0].round_number, 1);
    }
}

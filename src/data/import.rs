//! Data import collaborators
//!
//! The pipeline never fetches data itself; it asks a [`DataImporter`] for
//! raw match records over a date range.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::{MatchRecord, Result, TipError};

/// Source of raw match and fixture records
pub trait DataImporter {
    /// Played matches dated within `[start, end]`
    ///
    /// `fetch_data` asks for fresh data rather than a cached copy; sources
    /// without a remote side may ignore it.
    fn match_results(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        fetch_data: bool,
    ) -> Result<Vec<MatchRecord>>;

    /// Scheduled matches dated within `[start, end]`, played or not
    fn fixtures(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MatchRecord>>;
}

/// Results plus any fixtures in the range that have no result yet
///
/// This is the input for live tipping: history to build features from and
/// the upcoming rows to predict.
pub fn load_prediction_data(
    importer: &dyn DataImporter,
    start: NaiveDate,
    end: NaiveDate,
    fetch_data: bool,
) -> Result<Vec<MatchRecord>> {
    let mut records = importer.match_results(start, end, fetch_data)?;
    let fixtures = importer.fixtures(start, end)?;

    let mut added = 0;
    for fixture in fixtures {
        let known = records.iter().any(|r| {
            r.date == fixture.date
                && r.home_team == fixture.home_team
                && r.away_team == fixture.away_team
        });
        if !known {
            records.push(fixture);
            added += 1;
        }
    }

    records.sort_by(|a, b| a.date.cmp(&b.date));
    log::info!(
        "Loaded {} records ({} upcoming fixtures) from {} to {}",
        records.len(),
        added,
        start,
        end
    );
    Ok(records)
}

/// Reads match records from a JSON array on disk
pub struct JsonFileImporter {
    path: PathBuf,
}

impl JsonFileImporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonFileImporter {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Every record in the file
    pub fn read_all(&self) -> Result<Vec<MatchRecord>> {
        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<MatchRecord> = serde_json::from_str(&content).map_err(|e| {
            TipError::Parse(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;
        log::debug!("Read {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    fn in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<impl Iterator<Item = MatchRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(move |r| r.date >= start && r.date <= end))
    }
}

impl DataImporter for JsonFileImporter {
    fn match_results(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        fetch_data: bool,
    ) -> Result<Vec<MatchRecord>> {
        if fetch_data {
            log::debug!("{} is a local file; using it as-is", self.path.display());
        }
        Ok(self
            .in_range(start, end)?
            .filter(|r| r.home_score.is_some() && r.away_score.is_some())
            .collect())
    }

    fn fixtures(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MatchRecord>> {
        Ok(self.in_range(start, end)?.collect())
    }
}

//! Ordered feature functions over a stacked table

use std::collections::HashSet;
use std::fmt;

use super::pipeline::TableStage;
use super::table::{FeatureTable, INDEX_COLUMNS};
use crate::{Result, TipError};

type StepFn = Box<dyn Fn(&mut FeatureTable) -> Result<()> + Send + Sync>;

/// A named feature function with its declared column contract
///
/// The function may add columns listed in `produces` and rewrite columns
/// listed in `overwrites`; it must not reorder, add or drop rows.
pub struct FeatureStep {
    name: String,
    requires: Vec<String>,
    produces: Vec<String>,
    overwrites: Vec<String>,
    func: StepFn,
}

impl FeatureStep {
    pub fn new<F>(name: &str, requires: &[&str], produces: &[&str], func: F) -> Self
    where
        F: Fn(&mut FeatureTable) -> Result<()> + Send + Sync + 'static,
    {
        FeatureStep {
            name: name.to_string(),
            requires: requires.iter().map(|c| c.to_string()).collect(),
            produces: produces.iter().map(|c| c.to_string()).collect(),
            overwrites: Vec::new(),
            func: Box::new(func),
        }
    }

    /// Same as `new` with owned column lists
    pub fn with_columns<F>(name: &str, requires: Vec<String>, produces: Vec<String>, func: F) -> Self
    where
        F: Fn(&mut FeatureTable) -> Result<()> + Send + Sync + 'static,
    {
        FeatureStep {
            name: name.to_string(),
            requires,
            produces,
            overwrites: Vec::new(),
            func: Box::new(func),
        }
    }

    /// Declare columns the step rewrites in place; they must already exist
    pub fn overwriting(mut self, columns: Vec<String>) -> Self {
        self.overwrites = columns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    pub fn overwrites(&self) -> &[String] {
        &self.overwrites
    }

    /// Run the function on a table in place
    pub fn apply(&self, table: &mut FeatureTable) -> Result<()> {
        (self.func)(table)
    }
}

impl fmt::Debug for FeatureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureStep")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field("produces", &self.produces)
            .field("overwrites", &self.overwrites)
            .finish()
    }
}

/// Applies feature steps strictly in order
///
/// Later steps may read columns written by earlier ones. The first failing
/// step's error is returned as-is and no partially built table escapes.
#[derive(Debug)]
pub struct FeatureBuilder {
    name: String,
    steps: Vec<FeatureStep>,
}

impl FeatureBuilder {
    pub fn new(name: &str, steps: Vec<FeatureStep>) -> Self {
        FeatureBuilder {
            name: name.to_string(),
            steps,
        }
    }

    pub fn steps(&self) -> &[FeatureStep] {
        &self.steps
    }

    /// Run every step over a copy of the table
    pub fn transform(&self, table: &FeatureTable) -> Result<FeatureTable> {
        let mut output = table.clone();
        let keys = output.keys();

        for step in &self.steps {
            step.apply(&mut output)?;

            if output.len() != keys.len() || output.keys() != keys {
                return Err(TipError::FeatureStep {
                    step: step.name().to_string(),
                    message: "rows were added, dropped or reordered".to_string(),
                });
            }
            for column in step.produces() {
                output.add_column(column);
            }
            log::debug!("Applied feature step {}", step.name());
        }

        Ok(output)
    }
}

impl TableStage for FeatureBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn plan(&self, available: &[String]) -> Result<Vec<String>> {
        let mut columns: Vec<String> = available.to_vec();
        let mut known: HashSet<String> = available.iter().cloned().collect();

        for step in &self.steps {
            for column in step.requires().iter().chain(step.overwrites()) {
                if !known.contains(column) {
                    return Err(TipError::InvalidPipeline(format!(
                        "step {} needs column {} before any stage provides it",
                        step.name(),
                        column
                    )));
                }
            }
            for column in step.overwrites() {
                if INDEX_COLUMNS.contains(&column.as_str()) {
                    return Err(TipError::InvalidPipeline(format!(
                        "step {} cannot overwrite index column {}",
                        step.name(),
                        column
                    )));
                }
            }
            for column in step.produces() {
                if !known.insert(column.clone()) {
                    return Err(TipError::InvalidPipeline(format!(
                        "step {} produces {} which already exists",
                        step.name(),
                        column
                    )));
                }
                columns.push(column.clone());
            }
        }

        Ok(columns)
    }

    fn transform(&self, table: &FeatureTable) -> Result<FeatureTable> {
        FeatureBuilder::transform(self, table)
    }
}

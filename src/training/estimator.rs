//! Margin estimators and the model registry

use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2};

use super::split::FeatureMatrix;
use crate::{ModelConfig, ModelKind, Result, TipError};

const DEFAULT_PENALTY: f64 = 0.1;

/// A model that predicts a team's margin from a feature matrix
pub trait Estimator: Send {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> Result<()>;

    /// One predicted margin per row of `x`
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>>;

    fn is_fitted(&self) -> bool;
}

/// Per-column z-score parameters
#[derive(Debug, Clone)]
struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Standardizer {
    fn fit(x: &FeatureMatrix) -> Self {
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; x.n_features()];
        let mut std = vec![0.0; x.n_features()];

        for row in &x.values {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        for row in &x.values {
            for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        // Constant columns pass through centred
        let std = std
            .into_iter()
            .map(|variance| if variance > 1e-12 { variance.sqrt() } else { 1.0 })
            .collect();

        Standardizer { mean, std }
    }

    fn transform(&self, x: &FeatureMatrix) -> Array2<f64> {
        Array2::from_shape_fn((x.len(), x.n_features()), |(i, j)| {
            (x.values[i][j] - self.mean[j]) / self.std[j]
        })
    }
}

struct FittedLasso {
    columns: Vec<String>,
    scaler: Standardizer,
    model: ElasticNet<f64>,
}

/// Standardised features fed to an L1-penalised linear model
pub struct LassoModel {
    name: String,
    penalty: f64,
    fitted: Option<FittedLasso>,
}

impl LassoModel {
    pub fn new(name: &str, penalty: f64) -> Self {
        LassoModel {
            name: name.to_string(),
            penalty,
            fitted: None,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> TipError {
        TipError::Model {
            model: self.name.clone(),
            message: message.to_string(),
        }
    }
}

impl Estimator for LassoModel {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(self.error(format!("cannot fit {} rows against {} targets", x.len(), y.len())));
        }

        let scaler = Standardizer::fit(x);
        let records = scaler.transform(x);
        let targets = Array1::from(y.to_vec());
        let dataset = Dataset::new(records, targets);

        let model = ElasticNet::<f64>::params()
            .penalty(self.penalty)
            .l1_ratio(1.0)
            .fit(&dataset)
            .map_err(|e| self.error(e))?;

        log::debug!(
            "Fitted {} on {} rows, {} of {} coefficients non-zero",
            self.name,
            x.len(),
            model.hyperplane().iter().filter(|c| c.abs() > 0.0).count(),
            x.n_features()
        );

        self.fitted = Some(FittedLasso {
            columns: x.columns.clone(),
            scaler,
            model,
        });
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| self.error("model has not been fitted"))?;
        if fitted.columns != x.columns {
            return Err(self.error("feature columns differ from those the model was fitted on"));
        }

        let records = fitted.scaler.transform(x);
        let predictions = fitted.model.predict(&records);
        Ok(predictions.to_vec())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// Predicts the average training margin for home and away sides
#[derive(Debug, Clone, Default)]
pub struct MeanMarginModel {
    name: String,
    home: Option<f64>,
    away: Option<f64>,
}

impl MeanMarginModel {
    pub fn new(name: &str) -> Self {
        MeanMarginModel {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn at_home_index(&self, x: &FeatureMatrix) -> Result<usize> {
        x.column_index("at_home").ok_or_else(|| TipError::Model {
            model: self.name.clone(),
            message: "feature matrix has no at_home column".to_string(),
        })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl Estimator for MeanMarginModel {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> Result<()> {
        let at_home = self.at_home_index(x)?;
        if x.len() != y.len() {
            return Err(TipError::Model {
                model: self.name.clone(),
                message: format!("cannot fit {} rows against {} targets", x.len(), y.len()),
            });
        }
        let (home, away): (Vec<(usize, &f64)>, Vec<(usize, &f64)>) =
            y.iter().enumerate().partition(|(i, _)| x.values[*i][at_home] > 0.5);

        let all = mean(y);
        self.home = mean(&home.iter().map(|(_, m)| **m).collect::<Vec<_>>()).or(all);
        self.away = mean(&away.iter().map(|(_, m)| **m).collect::<Vec<_>>()).or(all);

        if self.home.is_none() {
            return Err(TipError::Model {
                model: self.name.clone(),
                message: "no margins to average".to_string(),
            });
        }
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        let at_home = self.at_home_index(x)?;
        let (home, away) = self.home.zip(self.away).ok_or_else(|| TipError::Model {
            model: self.name.clone(),
            message: "model has not been fitted".to_string(),
        })?;

        Ok(x.values
            .iter()
            .map(|row| if row[at_home] > 0.5 { home } else { away })
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.home.is_some()
    }
}

/// A named estimator and where it is stored
pub struct ModelHandle {
    pub name: String,
    pub filepath: Option<String>,
    pub estimator: Box<dyn Estimator>,
}

/// Estimators in registration order
#[derive(Default)]
pub struct ModelRegistry {
    models: Vec<ModelHandle>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(models: &[ModelConfig]) -> Result<Self> {
        let mut registry = ModelRegistry::new();
        for model in models {
            let estimator: Box<dyn Estimator> = match model.kind {
                ModelKind::Lasso => Box::new(LassoModel::new(
                    &model.name,
                    model.penalty.unwrap_or(DEFAULT_PENALTY),
                )),
                ModelKind::MeanMargin => Box::new(MeanMarginModel::new(&model.name)),
            };
            registry.register(&model.name, model.filepath.clone(), estimator)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: &str,
        filepath: Option<String>,
        estimator: Box<dyn Estimator>,
    ) -> Result<()> {
        if self.models.iter().any(|m| m.name == name) {
            return Err(TipError::Config(format!("Model {} registered twice", name)));
        }
        self.models.push(ModelHandle {
            name: name.to_string(),
            filepath,
            estimator,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelHandle> {
        self.models.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ModelHandle> {
        self.models.iter_mut()
    }

    pub fn get(&self, name: &str) -> Option<&ModelHandle> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::RowKey;

    fn make_matrix(rows: &[(f64, f64)]) -> FeatureMatrix {
        FeatureMatrix {
            columns: vec!["at_home".to_string(), "win_streak".to_string()],
            values: rows.iter().map(|(h, s)| vec![*h, *s]).collect(),
            keys: (0..rows.len())
                .map(|i| RowKey {
                    team: format!("Team {}", i),
                    year: 2016,
                    round_number: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_mean_margin_by_venue() {
        let x = make_matrix(&[(1.0, 0.0), (0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]);
        let y = [20.0, -20.0, 10.0, -10.0];
        let mut model = MeanMarginModel::new("mean_margin");
        assert!(!model.is_fitted());
        model.fit(&x, &y).unwrap();

        let predictions = model.predict(&make_matrix(&[(1.0, 3.0), (0.0, -2.0)])).unwrap();
        assert_eq!(predictions, vec![15.0, -15.0]);
    }

    #[test]
    fn test_unfitted_models_fail() {
        let x = make_matrix(&[(1.0, 0.0)]);
        assert!(MeanMarginModel::new("mean").predict(&x).is_err());
        assert!(matches!(
            LassoModel::new("lasso", 0.1).predict(&x),
            Err(TipError::Model { .. })
        ));
    }

    #[test]
    fn test_lasso_follows_signal() {
        let rows: Vec<(f64, f64)> = (0..40).map(|i| ((i % 2) as f64, (i % 7) as f64 - 3.0)).collect();
        let y: Vec<f64> = rows.iter().map(|(h, s)| 6.0 * h + 10.0 * s).collect();
        let x = make_matrix(&rows);

        let mut model = LassoModel::new("lasso", 0.01);
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&make_matrix(&[(1.0, 3.0), (0.0, -3.0)])).unwrap();

        assert_eq!(predictions.len(), 2);
        assert!(predictions[0] > 20.0);
        assert!(predictions[1] < -20.0);
    }

    #[test]
    fn test_lasso_rejects_other_columns() {
        let rows: Vec<(f64, f64)> = (0..10).map(|i| ((i % 2) as f64, i as f64)).collect();
        let y: Vec<f64> = rows.iter().map(|(_, s)| *s).collect();
        let mut model = LassoModel::new("lasso", 0.1);
        model.fit(&make_matrix(&rows), &y).unwrap();

        let mut other = make_matrix(&rows);
        other.columns[1] = "ladder_position".to_string();
        assert!(model.predict(&other).is_err());
    }

    #[test]
    fn test_registry_from_config() {
        let registry = ModelRegistry::from_config(&crate::Config::default().models).unwrap();
        assert_eq!(registry.names(), vec!["betting_lasso", "mean_margin"]);
        assert!(registry.get("mean_margin").is_some());

        let mut registry = ModelRegistry::new();
        registry.register("a", None, Box::new(MeanMarginModel::new("a"))).unwrap();
        assert!(registry.register("a", None, Box::new(MeanMarginModel::new("a"))).is_err());
    }
}

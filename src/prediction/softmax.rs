//! File-backed multinomial logistic classifier.
//!
//! Loads per-class weight vectors and biases from JSON and scores with a
//! numerically stable softmax. Training happens elsewhere; this is only
//! the inference side of an exported model.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::Classifier;
use crate::types::{ClassProbabilities, Outcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxModel {
    pub version: String,
    /// Input order the weights were trained against.
    pub feature_names: Vec<String>,
    pub weights: BTreeMap<Outcome, Vec<f64>>,
    #[serde(default)]
    pub bias: BTreeMap<Outcome, f64>,
}

impl SoftmaxModel {
    /// Load and validate a model against the expected feature order.
    pub fn load(path: impl AsRef<Path>, expected_features: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model from {}", path.display()))?;
        let model: SoftmaxModel = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse model from {}", path.display()))?;
        model.validate(expected_features)?;

        info!(
            path = %path.display(),
            version = %model.version,
            classes = model.weights.len(),
            features = model.feature_names.len(),
            "Model loaded"
        );
        Ok(model)
    }

    pub fn validate(&self, expected_features: &[&str]) -> Result<()> {
        if self.weights.len() < 2 {
            bail!("Model {} needs at least two classes", self.version);
        }
        if self.feature_names.iter().map(String::as_str).ne(expected_features.iter().copied()) {
            bail!(
                "Model {} feature order {:?} does not match extractor order {:?}",
                self.version,
                self.feature_names,
                expected_features
            );
        }
        for (outcome, w) in &self.weights {
            if w.len() != self.feature_names.len() {
                bail!(
                    "Model {}: {} weights for {outcome}, expected {}",
                    self.version,
                    w.len(),
                    self.feature_names.len()
                );
            }
            if w.iter().any(|x| !x.is_finite()) {
                bail!("Model {}: non-finite weight for {outcome}", self.version);
            }
        }
        Ok(())
    }
}

impl Classifier for SoftmaxModel {
    fn arity(&self) -> usize {
        self.feature_names.len()
    }

    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities> {
        if features.len() != self.arity() {
            bail!("Expected {} features, got {}", self.arity(), features.len());
        }

        let logits: Vec<(Outcome, f64)> = self
            .weights
            .iter()
            .map(|(outcome, w)| {
                let dot: f64 = w.iter().zip(features).map(|(a, b)| a * b).sum();
                (*outcome, dot + self.bias.get(outcome).copied().unwrap_or(0.0))
            })
            .collect();

        let max = logits.iter().map(|(_, z)| *z).fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<(Outcome, f64)> = logits.iter().map(|(o, z)| (*o, (z - max).exp())).collect();
        let total: f64 = exps.iter().map(|(_, e)| e).sum();

        Ok(exps.into_iter().map(|(o, e)| (o, e / total)).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

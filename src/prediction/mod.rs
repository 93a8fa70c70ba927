//! Prediction adapter over an injected classifier.
//!
//! The classifier is a black box that maps a numeric vector to class
//! probabilities. The adapter owns the contract at that boundary: arity is
//! checked before the model is called, and the returned distribution must
//! be a valid probability distribution. Classifier calls are local and
//! deterministic, so nothing here retries.

pub mod softmax;

use std::sync::Arc;

use tracing::debug;

use crate::types::{ClassProbabilities, EngineError, FeatureVector, Outcome, Prediction};

/// Tolerance on the sum of class probabilities.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Anything that turns a feature vector into class probabilities.
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    /// Number of features the model was trained on.
    fn arity(&self) -> usize;

    /// Class probabilities summing to 1.
    fn predict_proba(&self, features: &[f64]) -> anyhow::Result<ClassProbabilities>;
}

#[derive(Clone)]
pub struct PredictionAdapter {
    classifier: Arc<dyn Classifier>,
    reduced_history_penalty: f64,
}

impl PredictionAdapter {
    pub fn new(classifier: Arc<dyn Classifier>, reduced_history_penalty: f64) -> Self {
        Self {
            classifier,
            reduced_history_penalty: reduced_history_penalty.clamp(0.0, 1.0),
        }
    }

    pub fn arity(&self) -> usize {
        self.classifier.arity()
    }

    /// Score one feature vector. `reduced_history` comes from the extractor
    /// and lowers the reported confidence.
    pub fn predict(&self, features: &FeatureVector, reduced_history: bool) -> Result<Prediction, EngineError> {
        let expected = self.classifier.arity();
        if features.len() != expected {
            return Err(EngineError::InvalidFeatureVector {
                expected,
                actual: features.len(),
            });
        }

        let probs = self
            .classifier
            .predict_proba(features.as_slice())
            .map_err(|e| EngineError::Classifier(format!("{e:#}")))?;
        validate_distribution(&probs)?;

        // First maximum in Home, Draw, Away order.
        let (outcome, probability) = Outcome::ALL
            .iter()
            .filter_map(|o| probs.get(o).map(|p| (*o, *p)))
            .fold(None, |best: Option<(Outcome, f64)>, (o, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((o, p)),
            })
            .ok_or_else(|| EngineError::InvalidClassifierOutput("no classes returned".into()))?;

        let confidence = if reduced_history {
            probability * (1.0 - self.reduced_history_penalty)
        } else {
            probability
        };

        debug!(
            outcome = %outcome,
            probability = format!("{:.3}", probability),
            confidence = format!("{:.3}", confidence),
            reduced_history,
            "Prediction"
        );

        Ok(Prediction {
            class_probabilities: probs,
            outcome,
            probability,
            confidence,
            reduced_history,
        })
    }
}

fn validate_distribution(probs: &ClassProbabilities) -> Result<(), EngineError> {
    if probs.is_empty() {
        return Err(EngineError::InvalidClassifierOutput("no classes returned".into()));
    }
    for (outcome, p) in probs {
        if !p.is_finite() || !(0.0..=1.0).contains(p) {
            return Err(EngineError::InvalidClassifierOutput(format!(
                "probability for {outcome} out of range: {p}"
            )));
        }
    }
    let sum: f64 = probs.values().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(EngineError::InvalidClassifierOutput(format!(
            "probabilities sum to {sum}, not 1"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features;
use crate::ingest::RecordRow;
use crate::models::{FeatureMatrix, FeatureVector, ModelVariant, StatisticalSummary};

pub const FEATURE_DIM: usize = 4;

/// Normalized estimator inputs for one machine: log game count, net
/// difference per thousand coins, bonuses per hundred games, positive flag.
pub fn machine_inputs(vector: &FeatureVector) -> [f64; FEATURE_DIM] {
    [
        ((vector.game_count.max(0) as f64) + 1.0).ln() / 10.0,
        vector.net_difference as f64 / 1000.0,
        vector.bonus_rate * 100.0,
        if vector.positive { 1.0 } else { 0.0 },
    ]
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `clamp(avg_difference / 1000 * 0.5 + positive_ratio * 0.5, 0, 1)`, or the
/// prior when nothing was observed.
pub fn heuristic_probability(summary: &StatisticalSummary, prior: f64) -> f64 {
    if summary.total_machines == 0 {
        return prior.clamp(0.0, 1.0);
    }
    let diff_factor = (summary.average_difference / 1000.0) * 0.5;
    (diff_factor + summary.positive_ratio() * 0.5).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: bool,
}

/// One example per labeled row. Rows without a `high_setting` label or with
/// invalid counts are skipped.
pub fn examples_from_rows(rows: &[RecordRow]) -> Vec<TrainingExample> {
    rows.iter()
        .filter_map(|row| {
            let label = row.high_setting?;
            let record = row.to_record(0);
            features::validate_record(&record).ok()?;
            Some(TrainingExample {
                features: features::vector_from_records(record.machine_number, &[&record]),
                label,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticEstimator {
    pub weights: [f64; FEATURE_DIM],
    pub bias: f64,
    pub samples_seen: u64,
}

impl LogisticEstimator {
    pub fn new(weights: [f64; FEATURE_DIM], bias: f64) -> Self {
        Self {
            weights,
            bias,
            samples_seen: 0,
        }
    }

    pub fn predict_proba(&self, vector: &FeatureVector) -> f64 {
        let inputs = machine_inputs(vector);
        let logit: f64 = inputs
            .iter()
            .zip(self.weights.iter())
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.bias;
        sigmoid(logit)
    }

    /// Full-batch gradient descent from zero weights, so identical examples
    /// always produce identical estimators.
    pub fn train(
        examples: &[TrainingExample],
        epochs: usize,
        learning_rate: f64,
        l2_reg: f64,
    ) -> Self {
        let mut estimator = Self::new([0.0; FEATURE_DIM], 0.0);
        if examples.is_empty() {
            return estimator;
        }

        let inputs: Vec<([f64; FEATURE_DIM], f64)> = examples
            .iter()
            .map(|e| (machine_inputs(&e.features), if e.label { 1.0 } else { 0.0 }))
            .collect();
        let n = inputs.len() as f64;

        for epoch in 0..epochs {
            let mut grad = [0.0; FEATURE_DIM];
            let mut grad_bias = 0.0;
            let mut loss = 0.0;

            for (x, y) in &inputs {
                let logit: f64 = x
                    .iter()
                    .zip(estimator.weights.iter())
                    .map(|(x, w)| x * w)
                    .sum::<f64>()
                    + estimator.bias;
                let p = sigmoid(logit);
                let error = p - y;
                for (g, xi) in grad.iter_mut().zip(x.iter()) {
                    *g += error * xi;
                }
                grad_bias += error;
                let p = p.clamp(1e-12, 1.0 - 1e-12);
                loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
            }

            for (w, g) in estimator.weights.iter_mut().zip(grad.iter()) {
                *w -= learning_rate * (g / n + l2_reg * *w);
            }
            estimator.bias -= learning_rate * grad_bias / n;

            if (epoch + 1) % 100 == 0 {
                debug!(epoch = epoch + 1, loss = loss / n, "training progress");
            }
        }

        estimator.samples_seen = examples.len() as u64;
        estimator
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read estimator from {}", path.display()))?;
        let estimator: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse estimator in {}", path.display()))?;
        if !estimator.bias.is_finite() || estimator.weights.iter().any(|w| !w.is_finite()) {
            anyhow::bail!("estimator in {} has non-finite weights", path.display());
        }
        Ok(estimator)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write estimator to {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Estimator<'a> {
    Trained(&'a LogisticEstimator),
    Heuristic { prior: f64 },
}

impl Estimator<'_> {
    pub fn variant(&self) -> ModelVariant {
        match self {
            Estimator::Trained(_) => ModelVariant::Trained,
            Estimator::Heuristic { .. } => ModelVariant::Heuristic,
        }
    }

    fn score(
        &self,
        matrix: &FeatureMatrix,
        summary: &StatisticalSummary,
    ) -> (f64, Option<BTreeMap<i32, f64>>) {
        match self {
            Estimator::Trained(estimator) => {
                let relevance: BTreeMap<i32, f64> = matrix
                    .machines
                    .iter()
                    .map(|m| (m.machine_number, estimator.predict_proba(m)))
                    .collect();
                let probability = if relevance.is_empty() {
                    0.0
                } else {
                    relevance.values().sum::<f64>() / relevance.len() as f64
                };
                (probability.clamp(0.0, 1.0), Some(relevance))
            }
            Estimator::Heuristic { prior } => (heuristic_probability(summary, *prior), None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub probability: f64,
    pub relevance: Option<BTreeMap<i32, f64>>,
    pub confidence: f64,
    pub variant: ModelVariant,
}

/// Store-independent scorer. Holds no mutable state, so one instance can
/// serve concurrent runs for different stores.
#[derive(Debug, Clone)]
pub struct PredictionModel {
    trained: Option<Arc<LogisticEstimator>>,
    config: EngineConfig,
}

impl PredictionModel {
    pub fn new(trained: Option<LogisticEstimator>, config: EngineConfig) -> Self {
        Self {
            trained: trained.map(Arc::new),
            config,
        }
    }

    pub fn heuristic(config: EngineConfig) -> Self {
        Self::new(None, config)
    }

    /// Loads the estimator named by `model_path`, falling back to the
    /// heuristic when none is configured.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let Some(path) = &config.model_path else {
            return Ok(Self::heuristic(config.clone()));
        };
        let estimator = LogisticEstimator::load(path)?;
        info!(path = %path.display(), samples = estimator.samples_seen, "loaded trained estimator");
        Ok(Self::new(Some(estimator), config.clone()))
    }

    pub fn has_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn select(&self, machines: usize) -> Estimator<'_> {
        match &self.trained {
            Some(estimator) if machines >= self.config.min_trusted_machines => {
                Estimator::Trained(estimator)
            }
            _ => Estimator::Heuristic {
                prior: self.config.prior_probability,
            },
        }
    }

    pub fn confidence(&self, variant: ModelVariant, machines: usize) -> f64 {
        let ceiling = match variant {
            ModelVariant::Trained => self.config.trained_confidence_ceiling,
            ModelVariant::Heuristic => self.config.heuristic_confidence_ceiling,
        };
        let size_factor =
            (machines as f64 / self.config.full_confidence_machines as f64).min(1.0);
        (ceiling * size_factor).clamp(0.0, 1.0)
    }

    pub fn score(
        &self,
        matrix: Option<&FeatureMatrix>,
        summary: &StatisticalSummary,
    ) -> Result<ModelOutput, EngineError> {
        let matrix = matrix.ok_or_else(|| EngineError::ModelUnavailable {
            reason: "no feature matrix supplied".to_string(),
        })?;
        let estimator = self.select(matrix.len());
        let (probability, relevance) = estimator.score(matrix, summary);
        let variant = estimator.variant();
        Ok(ModelOutput {
            probability,
            relevance,
            confidence: self.confidence(variant, matrix.len()),
            variant,
        })
    }

    pub fn fallback(&self, summary: &StatisticalSummary) -> ModelOutput {
        let variant = ModelVariant::Heuristic;
        ModelOutput {
            probability: heuristic_probability(summary, self.config.prior_probability),
            relevance: None,
            confidence: self.confidence(variant, summary.total_machines),
            variant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::summarize;
    use crate::stats::tests::{machine, matrix, ten_machine_store};

    fn favoring_winners() -> LogisticEstimator {
        LogisticEstimator::new([0.0, 2.0, 0.0, 1.0], -1.0)
    }

    #[test]
    fn sigmoid_is_bounded() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-9);
        assert!(sigmoid(40.0) <= 1.0);
        assert!(sigmoid(-40.0) >= 0.0);
    }

    #[test]
    fn heuristic_uses_prior_for_empty_store() {
        let summary = summarize(&matrix(Vec::new()));
        assert_eq!(heuristic_probability(&summary, 0.0), 0.0);
        assert_eq!(heuristic_probability(&summary, 0.2), 0.2);
    }

    #[test]
    fn heuristic_matches_formula() {
        let summary = summarize(&ten_machine_store());
        let expected = 120.0 / 1000.0 * 0.5 + 0.6 * 0.5;
        assert!((heuristic_probability(&summary, 0.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_matrix_is_model_unavailable() {
        let model = PredictionModel::heuristic(EngineConfig::default());
        let summary = summarize(&matrix(Vec::new()));
        let err = model.score(None, &summary).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn small_matrix_uses_heuristic_even_with_estimator() {
        let model = PredictionModel::new(Some(favoring_winners()), EngineConfig::default());
        let store = matrix(vec![machine(1, 1000, 500), machine(2, 1000, -200)]);
        let output = model.score(Some(&store), &summarize(&store)).unwrap();
        assert_eq!(output.variant, ModelVariant::Heuristic);
        assert!(output.relevance.is_none());
    }

    #[test]
    fn trained_estimator_scores_each_machine() {
        let model = PredictionModel::new(Some(favoring_winners()), EngineConfig::default());
        let store = ten_machine_store();
        let output = model.score(Some(&store), &summarize(&store)).unwrap();
        assert_eq!(output.variant, ModelVariant::Trained);
        let relevance = output.relevance.unwrap();
        assert_eq!(relevance.len(), 10);
        let best = relevance
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(n, _)| *n);
        assert_eq!(best, Some(14));
        assert!((0.0..=1.0).contains(&output.probability));
    }

    #[test]
    fn trained_confidence_exceeds_heuristic() {
        let model = PredictionModel::heuristic(EngineConfig::default());
        for machines in [0, 5, 10, 50, 200] {
            let trained = model.confidence(ModelVariant::Trained, machines);
            let heuristic = model.confidence(ModelVariant::Heuristic, machines);
            assert!(trained >= heuristic);
            assert!((0.0..=1.0).contains(&trained));
        }
        assert!(
            model.confidence(ModelVariant::Trained, 5) < model.confidence(ModelVariant::Trained, 10)
        );
        assert_eq!(model.confidence(ModelVariant::Heuristic, 0), 0.0);
    }

    #[test]
    fn training_separates_winners_from_losers() {
        let examples: Vec<TrainingExample> = (0..40)
            .map(|i| {
                let label = i % 2 == 0;
                let diff = if label { 1500 + i * 10 } else { -800 - i * 10 };
                TrainingExample {
                    features: machine(i as i32, 6000, diff),
                    label,
                }
            })
            .collect();
        let estimator = LogisticEstimator::train(&examples, 500, 0.5, 0.001);
        assert_eq!(estimator.samples_seen, 40);
        assert!(estimator.predict_proba(&machine(99, 6000, 2000)) > 0.5);
        assert!(estimator.predict_proba(&machine(98, 6000, -1000)) < 0.5);

        let again = LogisticEstimator::train(&examples, 500, 0.5, 0.001);
        assert_eq!(estimator, again);
    }

    #[test]
    fn only_labeled_valid_rows_become_examples() {
        let data = "\
store_name,area,machine_number,model_name,game_count,big_bonus,regular_bonus,art_count,net_difference,observed_on,high_setting
Espace Ikebukuro,Tokyo,101,Juggler,6500,28,20,0,1850,2026-03-01,true
Espace Ikebukuro,Tokyo,102,Juggler,3000,8,6,0,-700,2026-03-01,false
Espace Ikebukuro,Tokyo,103,Juggler,2000,5,4,0,100,2026-03-01,
Espace Ikebukuro,Tokyo,104,Juggler,-1,5,4,0,100,2026-03-01,true
";
        let rows = crate::ingest::read_rows_from(csv::Reader::from_reader(data.as_bytes())).unwrap();
        let examples = examples_from_rows(&rows);
        assert_eq!(examples.len(), 2);
        assert!(examples[0].label);
        assert_eq!(examples[0].features.net_difference, 1850);
        assert!(!examples[1].label);
    }

    #[test]
    fn estimator_survives_save_and_load() {
        let path = std::env::temp_dir().join(format!("estimator-{}.json", uuid::Uuid::new_v4()));
        let estimator = favoring_winners();
        estimator.save(&path).unwrap();
        let loaded = LogisticEstimator::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(estimator, loaded);
    }
}

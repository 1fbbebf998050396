use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::model::{heuristic_probability, ModelOutput};
use crate::models::{FeatureMatrix, StatisticalSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub probability: f64,
    pub confidence: f64,
    pub machines: Vec<i32>,
}

/// Blends model and statistical signals. The model's share grows with its
/// confidence, capped at `model_weight`.
pub fn combine(
    matrix: &FeatureMatrix,
    summary: &StatisticalSummary,
    output: &ModelOutput,
    config: &EngineConfig,
) -> Recommendation {
    let statistical = heuristic_probability(summary, config.prior_probability);
    let confidence = output.confidence.clamp(0.0, 1.0);
    let weight = (config.model_weight * confidence).clamp(0.0, 1.0);
    let probability =
        (weight * output.probability + (1.0 - weight) * statistical).clamp(0.0, 1.0);

    Recommendation {
        probability,
        confidence,
        machines: recommend(matrix, output, config),
    }
}

/// Machines ranked by model relevance when available, otherwise by net
/// difference. Only machines above the threshold are kept.
pub fn recommend(matrix: &FeatureMatrix, output: &ModelOutput, config: &EngineConfig) -> Vec<i32> {
    let mut scored: Vec<(i32, f64)> = match &output.relevance {
        Some(relevance) => relevance
            .iter()
            .filter(|(_, score)| **score >= config.min_relevance)
            .map(|(number, score)| (*number, *score))
            .collect(),
        None => matrix
            .machines
            .iter()
            .filter(|m| m.net_difference > 0)
            .map(|m| (m.machine_number, m.net_difference as f64))
            .collect(),
    };

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut seen = HashSet::new();
    scored
        .into_iter()
        .filter(|(number, _)| seen.insert(*number))
        .map(|(number, _)| number)
        .take(config.top_n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::models::ModelVariant;
    use crate::stats::summarize;
    use crate::stats::tests::{machine, matrix, ten_machine_store};

    fn heuristic_output(probability: f64, confidence: f64) -> ModelOutput {
        ModelOutput {
            probability,
            relevance: None,
            confidence,
            variant: ModelVariant::Heuristic,
        }
    }

    #[test]
    fn falls_back_to_net_difference_ranking() {
        let store = ten_machine_store();
        let summary = summarize(&store);
        let result = combine(&store, &summary, &heuristic_output(0.4, 0.12), &EngineConfig::default());
        assert_eq!(result.machines, vec![14, 13, 11, 20, 18]);
    }

    #[test]
    fn relevance_ranking_applies_threshold_and_ties() {
        let store = ten_machine_store();
        let summary = summarize(&store);
        let relevance: BTreeMap<i32, f64> =
            [(11, 0.9), (12, 0.4), (13, 0.9), (14, 0.7), (15, 0.5)].into_iter().collect();
        let output = ModelOutput {
            probability: 0.7,
            relevance: Some(relevance),
            confidence: 0.9,
            variant: ModelVariant::Trained,
        };
        let result = combine(&store, &summary, &output, &EngineConfig::default());
        assert_eq!(result.machines, vec![11, 13, 14, 15]);
    }

    #[test]
    fn low_confidence_leans_on_statistics() {
        let store = ten_machine_store();
        let summary = summarize(&store);
        let statistical = heuristic_probability(&summary, 0.0);
        let config = EngineConfig::default();

        let confident = combine(&store, &summary, &heuristic_output(1.0, 1.0), &config);
        let unsure = combine(&store, &summary, &heuristic_output(1.0, 0.1), &config);
        assert!(confident.probability > unsure.probability);
        assert!((unsure.probability - statistical).abs() < 0.1);
    }

    #[test]
    fn outputs_stay_in_unit_range() {
        let config = EngineConfig::default();
        let stores = vec![
            matrix(Vec::new()),
            matrix(vec![machine(1, 9000, 50_000)]),
            matrix(vec![machine(1, 9000, -50_000), machine(2, 0, 0)]),
            ten_machine_store(),
        ];
        for store in stores {
            let summary = summarize(&store);
            for (p, c) in [(0.0, 0.0), (1.0, 1.0), (0.5, 0.3)] {
                let result = combine(&store, &summary, &heuristic_output(p, c), &config);
                assert!((0.0..=1.0).contains(&result.probability));
                assert!((0.0..=1.0).contains(&result.confidence));
                assert!(result.machines.len() <= config.top_n);
                let unique: HashSet<i32> = result.machines.iter().copied().collect();
                assert_eq!(unique.len(), result.machines.len());
            }
        }
    }

    #[test]
    fn combining_is_deterministic() {
        let store = ten_machine_store();
        let summary = summarize(&store);
        let output = heuristic_output(0.4, 0.12);
        let config = EngineConfig::default();
        assert_eq!(
            combine(&store, &summary, &output, &config),
            combine(&store, &summary, &output, &config)
        );
    }
}

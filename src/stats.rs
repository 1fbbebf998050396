use std::cmp::Ordering;

use crate::models::{FeatureMatrix, FeatureVector, HighPerformer, StatisticalSummary};

pub const TOP_PERFORMERS: usize = 5;

/// Net difference descending, then lower machine number, then higher game count.
pub fn performer_order(a: &FeatureVector, b: &FeatureVector) -> Ordering {
    b.net_difference
        .cmp(&a.net_difference)
        .then_with(|| a.machine_number.cmp(&b.machine_number))
        .then_with(|| b.game_count.cmp(&a.game_count))
}

pub fn summarize(matrix: &FeatureMatrix) -> StatisticalSummary {
    let total = matrix.len();
    let (average_game_count, average_difference) = if total == 0 {
        (0.0, 0.0)
    } else {
        let games: i64 = matrix.machines.iter().map(|m| m.game_count).sum();
        let difference: i64 = matrix.machines.iter().map(|m| m.net_difference).sum();
        (games as f64 / total as f64, difference as f64 / total as f64)
    };

    let positive_machines_count = matrix.machines.iter().filter(|m| m.positive).count();

    let mut ranked: Vec<&FeatureVector> = matrix.machines.iter().collect();
    ranked.sort_by(|a, b| performer_order(a, b));
    let high_performers = ranked
        .into_iter()
        .take(TOP_PERFORMERS)
        .map(|m| HighPerformer {
            machine_number: m.machine_number,
            model_name: m.model_name.clone(),
            net_difference: m.net_difference,
            game_count: m.game_count,
        })
        .collect();

    StatisticalSummary {
        average_game_count,
        average_difference,
        positive_machines_count,
        high_performers,
        total_machines: total,
        window_end: matrix.window_end,
    }
}

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::models::{FeatureMatrix, FeatureVector, MachineRecord};

const FAVORABLE_SCORE: f64 = 60.0;
const DEFAULT_POSITION_SCORE: f64 = 50.0;
const FAVORABLE_MODEL_BONUS: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionScore {
    pub machine_number: i32,
    pub score: f64,
    pub data_count: u32,
    pub average_difference: f64,
    pub positive_rate: f64,
    pub total_difference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInsight {
    pub model_name: String,
    pub score: f64,
    pub days_analyzed: usize,
    pub average_difference: f64,
    pub positive_rate: f64,
    pub is_favorable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayInsight {
    pub weekday: Weekday,
    pub data_count: usize,
    pub average_difference: f64,
    pub positive_rate: f64,
    pub is_favorable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineDetail {
    pub machine_number: i32,
    pub data_count: usize,
    pub total_difference: i64,
    pub average_difference: f64,
    pub max_difference: i32,
    pub min_difference: i32,
    pub positive_days: usize,
    pub negative_days: usize,
    pub positive_rate: f64,
    pub recommendation_score: f64,
    pub daily: Vec<MachineRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationLevel {
    High,
    Medium,
    Low,
}

impl RecommendationLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RecommendationLevel::High
        } else if score >= 60.0 {
            RecommendationLevel::Medium
        } else {
            RecommendationLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationLevel::High => "high",
            RecommendationLevel::Medium => "medium",
            RecommendationLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineRecommendation {
    pub machine_number: i32,
    pub model_name: String,
    pub total_score: f64,
    pub position_score: f64,
    pub model_bonus: f64,
    pub level: RecommendationLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInsights {
    pub top_positions: Vec<PositionScore>,
    pub hot_suffixes: Vec<i32>,
    pub models: Vec<ModelInsight>,
    pub weekdays: Vec<WeekdayInsight>,
    pub recommendations: Vec<MachineRecommendation>,
}

fn data_bonus(count: usize) -> f64 {
    if count >= 20 {
        10.0
    } else if count >= 10 {
        5.0
    } else {
        0.0
    }
}

/// Positive-day rate (percent) plus an average-difference bonus of up to 20
/// and a data-volume bonus, capped at 100.
pub fn position_score(average_difference: f64, positive_rate_pct: f64, data_count: usize) -> f64 {
    let mut score = positive_rate_pct;
    if average_difference > 0.0 {
        score += (average_difference / 100.0).min(20.0);
    }
    (score + data_bonus(data_count)).min(100.0)
}

fn model_score(average_difference: f64, positive_rate_pct: f64, days: usize) -> f64 {
    let mut score = positive_rate_pct;
    if average_difference > 0.0 {
        score += (average_difference / 50.0).min(20.0);
    }
    (score + data_bonus(days)).min(100.0)
}

fn score_order(a: f64, b: f64) -> std::cmp::Ordering {
    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
}

pub fn position_for(vector: &FeatureVector) -> PositionScore {
    let positive_rate = vector.positive_rate() * 100.0;
    let average_difference = vector.average_daily_difference();
    PositionScore {
        machine_number: vector.machine_number,
        score: position_score(average_difference, positive_rate, vector.days_observed as usize),
        data_count: vector.days_observed,
        average_difference,
        positive_rate,
        total_difference: vector.net_difference,
    }
}

pub fn position_scores(matrix: &FeatureMatrix) -> Vec<PositionScore> {
    let mut scores: Vec<PositionScore> = matrix.machines.iter().map(position_for).collect();
    scores.sort_by(|a, b| score_order(a.score, b.score).then_with(|| a.machine_number.cmp(&b.machine_number)));
    scores
}

/// Last digits of machine numbers whose positions average at least 60 points,
/// best three first.
pub fn hot_suffixes(scores: &[PositionScore]) -> Vec<i32> {
    let mut by_suffix: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for score in scores {
        by_suffix
            .entry(score.machine_number.rem_euclid(10))
            .or_default()
            .push(score.score);
    }

    let mut hot: Vec<(i32, f64)> = by_suffix
        .into_iter()
        .map(|(suffix, values)| (suffix, values.iter().sum::<f64>() / values.len() as f64))
        .filter(|(_, average)| *average >= FAVORABLE_SCORE)
        .collect();
    hot.sort_by(|a, b| score_order(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
    hot.into_iter().take(3).map(|(suffix, _)| suffix).collect()
}

#[derive(Default)]
struct DailyTally {
    machines: usize,
    positive: usize,
    difference: i64,
}

impl DailyTally {
    fn add(&mut self, record: &MachineRecord) {
        self.machines += 1;
        self.difference += record.net_difference as i64;
        if record.net_difference > 0 {
            self.positive += 1;
        }
    }

    fn average(&self) -> f64 {
        if self.machines == 0 {
            0.0
        } else {
            self.difference as f64 / self.machines as f64
        }
    }
}

fn rate_pct(positive: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        positive as f64 / total as f64 * 100.0
    }
}

pub fn model_breakdown(records: &[MachineRecord]) -> Vec<ModelInsight> {
    let mut daily: BTreeMap<&str, BTreeMap<NaiveDate, DailyTally>> = BTreeMap::new();
    for record in records {
        daily
            .entry(record.model_name.as_str())
            .or_default()
            .entry(record.observed_on)
            .or_default()
            .add(record);
    }

    let mut models: Vec<ModelInsight> = daily
        .into_iter()
        .map(|(model_name, days)| {
            let days_analyzed = days.len();
            let machines: usize = days.values().map(|d| d.machines).sum();
            let positive: usize = days.values().map(|d| d.positive).sum();
            let average_difference =
                days.values().map(DailyTally::average).sum::<f64>() / days_analyzed as f64;
            let positive_rate = rate_pct(positive, machines);
            let score = model_score(average_difference, positive_rate, days_analyzed);
            ModelInsight {
                model_name: model_name.to_string(),
                score,
                days_analyzed,
                average_difference,
                positive_rate,
                is_favorable: score >= FAVORABLE_SCORE,
            }
        })
        .collect();
    models.sort_by(|a, b| score_order(a.score, b.score).then_with(|| a.model_name.cmp(&b.model_name)));
    models
}

pub fn weekday_breakdown(records: &[MachineRecord]) -> Vec<WeekdayInsight> {
    let mut daily: BTreeMap<NaiveDate, DailyTally> = BTreeMap::new();
    for record in records {
        daily.entry(record.observed_on).or_default().add(record);
    }

    let mut by_weekday: HashMap<Weekday, Vec<&DailyTally>> = HashMap::new();
    for (date, tally) in &daily {
        by_weekday.entry(date.weekday()).or_default().push(tally);
    }

    let mut weekdays: Vec<WeekdayInsight> = by_weekday
        .into_iter()
        .map(|(weekday, days)| {
            let average_difference =
                days.iter().map(|d| d.average()).sum::<f64>() / days.len() as f64;
            let machines: usize = days.iter().map(|d| d.machines).sum();
            let positive: usize = days.iter().map(|d| d.positive).sum();
            let positive_rate = rate_pct(positive, machines);
            WeekdayInsight {
                weekday,
                data_count: days.len(),
                average_difference,
                positive_rate,
                is_favorable: average_difference > 0.0 && positive_rate >= 40.0,
            }
        })
        .collect();
    weekdays.sort_by(|a, b| {
        score_order(a.average_difference, b.average_difference)
            .then_with(|| a.weekday.num_days_from_monday().cmp(&b.weekday.num_days_from_monday()))
    });
    weekdays
}

/// Day-by-day history and totals for one machine, newest first. `None` when
/// the machine has no records.
pub fn machine_detail(records: &[MachineRecord], machine_number: i32) -> Option<MachineDetail> {
    let mut daily: Vec<MachineRecord> = records
        .iter()
        .filter(|r| r.machine_number == machine_number)
        .cloned()
        .collect();
    if daily.is_empty() {
        return None;
    }
    daily.sort_by(|a, b| b.observed_on.cmp(&a.observed_on));

    let data_count = daily.len();
    let total_difference: i64 = daily.iter().map(|r| r.net_difference as i64).sum();
    let positive_days = daily.iter().filter(|r| r.net_difference > 0).count();
    let average_difference = total_difference as f64 / data_count as f64;
    let positive_rate = rate_pct(positive_days, data_count);

    Some(MachineDetail {
        machine_number,
        data_count,
        total_difference,
        average_difference,
        max_difference: daily.iter().map(|r| r.net_difference).max().unwrap_or(0),
        min_difference: daily.iter().map(|r| r.net_difference).min().unwrap_or(0),
        positive_days,
        negative_days: data_count - positive_days,
        positive_rate,
        recommendation_score: position_score(average_difference, positive_rate, data_count),
        daily,
    })
}

/// Machines on the floor on the latest observed day, scored by position
/// (50 when the machine has no position score) plus a bonus for favorable
/// models, capped at 100. Best `top_n` first.
pub fn machine_recommendations(
    records: &[MachineRecord],
    positions: &[PositionScore],
    models: &[ModelInsight],
    top_n: usize,
) -> Vec<MachineRecommendation> {
    let Some(latest) = records.iter().map(|r| r.observed_on).max() else {
        return Vec::new();
    };
    let by_machine: HashMap<i32, f64> = positions
        .iter()
        .map(|p| (p.machine_number, p.score))
        .collect();
    let favorable: HashSet<&str> = models
        .iter()
        .filter(|m| m.is_favorable)
        .map(|m| m.model_name.as_str())
        .collect();

    let on_floor: BTreeMap<i32, &MachineRecord> = records
        .iter()
        .filter(|r| r.observed_on == latest)
        .map(|r| (r.machine_number, r))
        .collect();

    let mut recommendations: Vec<MachineRecommendation> = on_floor
        .into_values()
        .map(|record| {
            let position_score = by_machine
                .get(&record.machine_number)
                .copied()
                .unwrap_or(DEFAULT_POSITION_SCORE);
            let model_bonus = if favorable.contains(record.model_name.as_str()) {
                FAVORABLE_MODEL_BONUS
            } else {
                0.0
            };
            let total_score = (position_score + model_bonus).min(100.0);
            MachineRecommendation {
                machine_number: record.machine_number,
                model_name: record.model_name.clone(),
                total_score,
                position_score,
                model_bonus,
                level: RecommendationLevel::from_score(total_score),
            }
        })
        .collect();
    recommendations.sort_by(|a, b| {
        score_order(a.total_score, b.total_score).then_with(|| a.machine_number.cmp(&b.machine_number))
    });
    recommendations.truncate(top_n);
    recommendations
}

pub fn build(records: &[MachineRecord], matrix: &FeatureMatrix, top_n: usize) -> StoreInsights {
    let positions = position_scores(matrix);
    let hot = hot_suffixes(&positions);
    let models = model_breakdown(records);
    let recommendations = machine_recommendations(records, &positions, &models, top_n);
    StoreInsights {
        top_positions: positions.into_iter().take(10).collect(),
        hot_suffixes: hot,
        models,
        weekdays: weekday_breakdown(records),
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::record;
    use crate::features::{extract, ObservationWindow};

    fn history() -> Vec<MachineRecord> {
        let mut records = Vec::new();
        for day in 1..=21 {
            records.push(record(101, day, 7000, 900));
            records.push(record(102, day, 4000, if day % 2 == 0 { 200 } else { -300 }));
            let mut other = record(203, day, 2000, -500);
            other.model_name = "Hanahana".to_string();
            records.push(other);
        }
        records
    }

    #[test]
    fn position_score_applies_bonuses_and_cap() {
        assert_eq!(position_score(0.0, 50.0, 3), 50.0);
        assert_eq!(position_score(500.0, 50.0, 10), 60.0);
        assert_eq!(position_score(5000.0, 50.0, 25), 80.0);
        assert_eq!(position_score(5000.0, 100.0, 25), 100.0);
        assert_eq!(position_score(-400.0, 0.0, 1), 0.0);
    }

    #[test]
    fn consistent_winner_ranks_first() {
        let records = history();
        let window = ObservationWindow::all_until(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        let matrix = extract(1, &records, &window).unwrap();
        let scores = position_scores(&matrix);

        assert_eq!(scores[0].machine_number, 101);
        assert_eq!(scores[0].score, 100.0);
        assert_eq!(scores[0].data_count, 21);
        assert_eq!(scores.last().map(|s| s.machine_number), Some(203));
    }

    #[test]
    fn hot_suffixes_require_sixty_points() {
        let scores = vec![
            PositionScore {
                machine_number: 11,
                score: 90.0,
                data_count: 5,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
            PositionScore {
                machine_number: 21,
                score: 40.0,
                data_count: 5,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
            PositionScore {
                machine_number: 7,
                score: 70.0,
                data_count: 5,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
            PositionScore {
                machine_number: 3,
                score: 59.0,
                data_count: 5,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
        ];
        assert_eq!(hot_suffixes(&scores), vec![7, 1]);
    }

    #[test]
    fn model_breakdown_flags_favorable_models() {
        let models = model_breakdown(&history());
        assert_eq!(models.len(), 2);
        let juggler = models.iter().find(|m| m.model_name == "Juggler").unwrap();
        let hanahana = models.iter().find(|m| m.model_name == "Hanahana").unwrap();

        assert_eq!(juggler.days_analyzed, 21);
        assert!(juggler.is_favorable);
        assert!(!hanahana.is_favorable);
        assert_eq!(hanahana.positive_rate, 0.0);
        assert_eq!(models[0].model_name, "Juggler");
    }

    #[test]
    fn weekday_breakdown_covers_each_day_once() {
        let weekdays = weekday_breakdown(&history());
        assert_eq!(weekdays.len(), 7);
        assert!(weekdays.iter().all(|w| w.data_count == 3));
        for pair in weekdays.windows(2) {
            assert!(pair[0].average_difference >= pair[1].average_difference);
        }
    }

    fn model(name: &str, is_favorable: bool) -> ModelInsight {
        ModelInsight {
            model_name: name.to_string(),
            score: if is_favorable { 70.0 } else { 30.0 },
            days_analyzed: 5,
            average_difference: 0.0,
            positive_rate: 0.0,
            is_favorable,
        }
    }

    #[test]
    fn unscored_machine_starts_at_fifty() {
        let records = vec![record(5, 3, 3000, 100), record(6, 3, 3000, 100), record(7, 2, 3000, 900)];
        let positions = vec![PositionScore {
            machine_number: 6,
            score: 72.0,
            data_count: 3,
            average_difference: 100.0,
            positive_rate: 66.0,
            total_difference: 300,
        }];

        let picks = machine_recommendations(&records, &positions, &[model("Juggler", false)], 5);

        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].machine_number, 6);
        assert_eq!(picks[0].level, RecommendationLevel::Medium);
        assert_eq!(picks[1].machine_number, 5);
        assert_eq!(picks[1].position_score, 50.0);
        assert_eq!(picks[1].total_score, 50.0);
        assert_eq!(picks[1].level, RecommendationLevel::Low);
    }

    #[test]
    fn favorable_model_adds_bonus_up_to_cap() {
        let mut hanahana = record(9, 4, 3000, 0);
        hanahana.model_name = "Hanahana".to_string();
        let records = vec![record(8, 4, 3000, 0), hanahana];
        let positions = vec![
            PositionScore {
                machine_number: 8,
                score: 95.0,
                data_count: 20,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
            PositionScore {
                machine_number: 9,
                score: 70.0,
                data_count: 20,
                average_difference: 0.0,
                positive_rate: 0.0,
                total_difference: 0,
            },
        ];
        let models = vec![model("Juggler", true), model("Hanahana", true)];

        let picks = machine_recommendations(&records, &positions, &models, 1);

        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].machine_number, 8);
        assert_eq!(picks[0].model_bonus, 15.0);
        assert_eq!(picks[0].total_score, 100.0);
        assert_eq!(picks[0].level, RecommendationLevel::High);

        let all = machine_recommendations(&records, &positions, &models, 5);
        assert_eq!(all[1].total_score, 85.0);
        assert!(machine_recommendations(&[], &positions, &models, 5).is_empty());
    }

    #[test]
    fn machine_detail_summarizes_history() {
        let detail = machine_detail(&history(), 102).unwrap();
        assert_eq!(detail.data_count, 21);
        assert_eq!(detail.positive_days, 10);
        assert_eq!(detail.negative_days, 11);
        assert_eq!(detail.max_difference, 200);
        assert_eq!(detail.min_difference, -300);
        assert_eq!(detail.total_difference, 10 * 200 - 11 * 300);
        assert_eq!(detail.daily[0].observed_on, NaiveDate::from_ymd_opt(2026, 3, 21).unwrap());
        assert!(machine_detail(&history(), 999).is_none());
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type StoreId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    pub area: Option<String>,
    pub source_url: Option<String>,
}

/// One machine's play statistics for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub store_id: StoreId,
    pub machine_number: i32,
    pub model_name: String,
    pub game_count: i32,
    pub big_bonus: i32,
    pub regular_bonus: i32,
    pub art_count: i32,
    pub net_difference: i32,
    pub observed_on: NaiveDate,
}

impl MachineRecord {
    pub fn bonus_count(&self) -> i64 {
        self.big_bonus as i64 + self.regular_bonus as i64 + self.art_count as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub machine_number: i32,
    pub model_name: String,
    pub days_observed: u32,
    pub positive_days: u32,
    pub game_count: i64,
    pub net_difference: i64,
    pub bonus_count: i64,
    pub bonus_rate: f64,
    pub positive: bool,
}

impl FeatureVector {
    pub fn average_daily_difference(&self) -> f64 {
        if self.days_observed == 0 {
            0.0
        } else {
            self.net_difference as f64 / self.days_observed as f64
        }
    }

    pub fn positive_rate(&self) -> f64 {
        if self.days_observed == 0 {
            0.0
        } else {
            self.positive_days as f64 / self.days_observed as f64
        }
    }
}

/// Feature vectors for every machine seen in a window, ordered by machine number.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub store_id: StoreId,
    pub window_end: NaiveDate,
    pub machines: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighPerformer {
    pub machine_number: i32,
    pub model_name: String,
    pub net_difference: i64,
    pub game_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub average_game_count: f64,
    pub average_difference: f64,
    pub positive_machines_count: usize,
    pub high_performers: Vec<HighPerformer>,
    pub total_machines: usize,
    pub window_end: NaiveDate,
}

impl StatisticalSummary {
    pub fn positive_ratio(&self) -> f64 {
        if self.total_machines == 0 {
            0.0
        } else {
            self.positive_machines_count as f64 / self.total_machines as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    Trained,
    Heuristic,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Trained => "trained",
            ModelVariant::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    Sufficient,
    Insufficient,
}

impl DataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStatus::Sufficient => "sufficient",
            DataStatus::Insufficient => "insufficient",
        }
    }
}

/// Persisted outcome of one analysis run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub store_id: StoreId,
    pub prediction_date: DateTime<Utc>,
    pub high_setting_probability: f64,
    pub confidence_score: f64,
    pub recommended_machines: Vec<i32>,
    pub statistical_analysis: StatisticalSummary,
    pub total_machines: usize,
    pub model_variant: ModelVariant,
    pub data_status: DataStatus,
}

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::{MachineRecord, StoreId};

/// One CSV row as produced by the scraper export. `high_setting` is only
/// present in labeled training files.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordRow {
    pub store_name: String,
    pub area: Option<String>,
    pub machine_number: i32,
    pub model_name: String,
    pub game_count: i32,
    pub big_bonus: i32,
    pub regular_bonus: i32,
    #[serde(default)]
    pub art_count: Option<i32>,
    pub net_difference: i32,
    pub observed_on: NaiveDate,
    #[serde(default)]
    pub high_setting: Option<bool>,
}

impl RecordRow {
    pub fn to_record(&self, store_id: StoreId) -> MachineRecord {
        MachineRecord {
            store_id,
            machine_number: self.machine_number,
            model_name: self.model_name.clone(),
            game_count: self.game_count,
            big_bonus: self.big_bonus,
            regular_bonus: self.regular_bonus,
            art_count: self.art_count.unwrap_or(0),
            net_difference: self.net_difference,
            observed_on: self.observed_on,
        }
    }
}

pub fn read_rows(csv_path: &Path) -> anyhow::Result<Vec<RecordRow>> {
    read_rows_from(csv::Reader::from_path(csv_path)?)
}

pub fn read_rows_from<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Vec<RecordRow>> {
    let mut rows = Vec::new();
    for result in reader.deserialize::<RecordRow>() {
        rows.push(result?);
    }
    Ok(rows)
}

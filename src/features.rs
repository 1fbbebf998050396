use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate, Utc};

use crate::error::EngineError;
use crate::models::{FeatureMatrix, FeatureVector, MachineRecord, StoreId};

/// Inclusive date range of records fed into an analysis. An open start means
/// "all history up to `end`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationWindow {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl ObservationWindow {
    pub fn new(start: Option<NaiveDate>, end: NaiveDate) -> Result<Self, EngineError> {
        if let Some(start) = start {
            if end < start {
                return Err(EngineError::InvalidWindow { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn all_until(end: NaiveDate) -> Self {
        Self { start: None, end }
    }

    /// The last `days` days ending at `end`, both ends inclusive. A span
    /// reaching past the earliest representable date leaves the start open.
    pub fn last_days(days: i64, end: NaiveDate) -> Self {
        let start = Duration::try_days(days.max(1) - 1)
            .and_then(|span| end.checked_sub_signed(span));
        Self { start, end }
    }

    /// Window for CLI-style arguments: an explicit start wins over
    /// `since_days`, and the end defaults to today.
    pub fn resolve(
        since_days: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Self, EngineError> {
        let end = to.unwrap_or_else(|| Utc::now().date_naive());
        match (from, since_days) {
            (Some(start), _) => Self::new(Some(start), end),
            (None, Some(days)) => Ok(Self::last_days(days, end)),
            (None, None) => Ok(Self::all_until(end)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date <= self.end && self.start.map_or(true, |start| date >= start)
    }
}

pub fn validate_record(record: &MachineRecord) -> Result<(), EngineError> {
    let checks = [
        ("game count", record.game_count),
        ("big bonus count", record.big_bonus),
        ("regular bonus count", record.regular_bonus),
        ("ART count", record.art_count),
    ];
    for (label, value) in checks {
        if value < 0 {
            return Err(EngineError::MalformedRecord {
                machine_number: record.machine_number,
                observed_on: record.observed_on,
                reason: format!("{label} is negative ({value})"),
            });
        }
    }
    Ok(())
}

/// Aggregates one machine's records into a feature vector. Records are
/// assumed to belong to the same machine.
pub fn vector_from_records(machine_number: i32, records: &[&MachineRecord]) -> FeatureVector {
    let mut game_count = 0i64;
    let mut net_difference = 0i64;
    let mut bonus_count = 0i64;
    let mut positive_days = 0u32;
    let mut latest: Option<&MachineRecord> = None;

    for record in records {
        game_count += record.game_count as i64;
        net_difference += record.net_difference as i64;
        bonus_count += record.bonus_count();
        if record.net_difference > 0 {
            positive_days += 1;
        }
        if latest.map_or(true, |current| record.observed_on >= current.observed_on) {
            latest = Some(record);
        }
    }

    let bonus_rate = if game_count == 0 {
        0.0
    } else {
        bonus_count as f64 / game_count as f64
    };

    FeatureVector {
        machine_number,
        model_name: latest.map(|r| r.model_name.clone()).unwrap_or_default(),
        days_observed: records.len() as u32,
        positive_days,
        game_count,
        net_difference,
        bonus_count,
        bonus_rate,
        positive: net_difference > 0,
    }
}

/// Builds the store's feature matrix from raw records. Records from other
/// stores or outside the window are ignored; the record slice is not modified.
pub fn extract(
    store_id: StoreId,
    records: &[MachineRecord],
    window: &ObservationWindow,
) -> Result<FeatureMatrix, EngineError> {
    let mut seen: HashSet<(i32, NaiveDate)> = HashSet::new();
    let mut by_machine: BTreeMap<i32, Vec<&MachineRecord>> = BTreeMap::new();

    for record in records {
        if record.store_id != store_id || !window.contains(record.observed_on) {
            continue;
        }
        validate_record(record)?;
        if !seen.insert((record.machine_number, record.observed_on)) {
            return Err(EngineError::MalformedRecord {
                machine_number: record.machine_number,
                observed_on: record.observed_on,
                reason: "duplicate record for machine and date".to_string(),
            });
        }
        by_machine
            .entry(record.machine_number)
            .or_default()
            .push(record);
    }

    let machines = by_machine
        .iter()
        .map(|(machine_number, records)| vector_from_records(*machine_number, records))
        .collect();

    Ok(FeatureMatrix {
        store_id,
        window_end: window.end,
        machines,
    })
}

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::features::ObservationWindow;
use crate::ingest::RecordRow;
use crate::models::{MachineRecord, Prediction, Store, StoreId};
use crate::repository::{PredictionStore, RecordSource};

/// Process-local repository backing offline analysis and tests.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    stores: RwLock<HashMap<StoreId, Store>>,
    records: RwLock<Vec<MachineRecord>>,
    predictions: RwLock<Vec<Prediction>>,
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::persistence("in-memory repository lock poisoned")
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_store(&self, store: Store) -> Result<(), EngineError> {
        self.stores.write().map_err(poisoned)?.insert(store.id, store);
        Ok(())
    }

    /// Appends records, skipping any (store, machine, date) already present.
    /// Returns how many were inserted.
    pub fn add_records(&self, records: Vec<MachineRecord>) -> Result<usize, EngineError> {
        let mut stored = self.records.write().map_err(poisoned)?;
        let mut inserted = 0usize;
        for record in records {
            let exists = stored.iter().any(|r| {
                r.store_id == record.store_id
                    && r.machine_number == record.machine_number
                    && r.observed_on == record.observed_on
            });
            if !exists {
                stored.push(record);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Registers a store by name, returning the existing id when the name is
    /// already known.
    pub fn upsert_store(&self, name: &str, area: Option<String>) -> Result<StoreId, EngineError> {
        let mut stores = self.stores.write().map_err(poisoned)?;
        if let Some(existing) = stores.values().find(|s| s.name == name) {
            return Ok(existing.id);
        }
        let id = stores.keys().max().copied().unwrap_or(0) + 1;
        stores.insert(
            id,
            Store {
                id,
                name: name.to_string(),
                area,
                source_url: None,
            },
        );
        Ok(id)
    }

    /// Loads scraper CSV rows, registering stores by name.
    pub fn load_rows(&self, rows: &[RecordRow]) -> Result<usize, EngineError> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let store_id = self.upsert_store(&row.store_name, row.area.clone())?;
            records.push(row.to_record(store_id));
        }
        self.add_records(records)
    }

    pub fn find_store(&self, name: &str) -> Result<Option<Store>, EngineError> {
        Ok(self
            .stores
            .read()
            .map_err(poisoned)?
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    pub fn store(&self, store_id: StoreId) -> Result<Option<Store>, EngineError> {
        Ok(self.stores.read().map_err(poisoned)?.get(&store_id).cloned())
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions.read().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordSource for InMemoryRepository {
    async fn records_for(
        &self,
        store_id: StoreId,
        window: &ObservationWindow,
    ) -> Result<Vec<MachineRecord>, EngineError> {
        if !self.stores.read().map_err(poisoned)?.contains_key(&store_id) {
            return Err(EngineError::StoreNotFound { store_id });
        }
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .filter(|r| r.store_id == store_id && window.contains(r.observed_on))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PredictionStore for InMemoryRepository {
    async fn persist(&self, prediction: Prediction) -> Result<Prediction, EngineError> {
        self.predictions
            .write()
            .map_err(poisoned)?
            .push(prediction.clone());
        Ok(prediction)
    }

    async fn latest_prediction(
        &self,
        store_id: StoreId,
    ) -> Result<Option<Prediction>, EngineError> {
        let predictions = self.predictions.read().map_err(poisoned)?;
        Ok(predictions
            .iter()
            .filter(|p| p.store_id == store_id)
            .max_by_key(|p| p.prediction_date)
            .cloned())
    }

    async fn prediction_history(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<Prediction>, EngineError> {
        let predictions = self.predictions.read().map_err(poisoned)?;
        let mut history: Vec<Prediction> = predictions
            .iter()
            .filter(|p| p.store_id == store_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.prediction_date.cmp(&a.prediction_date));
        history.truncate(limit);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::record;
    use chrono::NaiveDate;

    fn repository_with_store() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.add_store(Store {
            id: 1,
            name: "Maruhan Shinjuku".to_string(),
            area: Some("Tokyo".to_string()),
            source_url: None,
        })
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn unknown_store_is_reported() {
        let repo = InMemoryRepository::new();
        let window = ObservationWindow::all_until(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        let err = repo.records_for(42, &window).await.unwrap_err();
        assert_eq!(err, EngineError::StoreNotFound { store_id: 42 });
    }

    #[tokio::test]
    async fn duplicate_records_are_skipped() {
        let repo = repository_with_store();
        let inserted = repo
            .add_records(vec![record(1, 1, 100, 10), record(1, 1, 200, 20), record(2, 1, 100, 5)])
            .unwrap();
        assert_eq!(inserted, 2);

        let window = ObservationWindow::all_until(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        assert_eq!(repo.records_for(1, &window).await.unwrap().len(), 2);
    }

    #[test]
    fn stores_are_registered_by_name() {
        let data = "\
store_name,area,machine_number,model_name,game_count,big_bonus,regular_bonus,art_count,net_difference,observed_on
Espace Ikebukuro,Tokyo,101,Juggler,6500,28,20,0,1850,2026-03-01
Rakuen Kamata,Tokyo,5,Juggler,3000,10,8,0,-200,2026-03-01
Espace Ikebukuro,Tokyo,102,Juggler,4000,12,9,0,300,2026-03-01
";
        let rows = crate::ingest::read_rows_from(csv::Reader::from_reader(data.as_bytes())).unwrap();
        let repo = InMemoryRepository::new();
        assert_eq!(repo.load_rows(&rows).unwrap(), 3);

        let espace = repo.find_store("Espace Ikebukuro").unwrap().unwrap();
        let rakuen = repo.find_store("Rakuen Kamata").unwrap().unwrap();
        assert_ne!(espace.id, rakuen.id);
        assert_eq!(repo.store(espace.id).unwrap().unwrap().area.as_deref(), Some("Tokyo"));
    }

    #[tokio::test]
    async fn records_respect_window() {
        let repo = repository_with_store();
        repo.add_records(vec![record(1, 1, 100, 10), record(1, 20, 100, 10)])
            .unwrap();
        let window = ObservationWindow::last_days(5, NaiveDate::from_ymd_opt(2026, 3, 21).unwrap());
        let records = repo.records_for(1, &window).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].observed_on.format("%d").to_string(), "20");
    }
}

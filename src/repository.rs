//! Narrow persistence seams used by the analysis engine.
//!
//! The engine reads machine records and appends predictions. It never updates
//! or deletes either. Implementations live in `db` (Postgres) and `memory`.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::features::ObservationWindow;
use crate::models::{MachineRecord, Prediction, StoreId};

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Records for the store within the window. Fails with `StoreNotFound`
    /// when the store id is unknown.
    async fn records_for(
        &self,
        store_id: StoreId,
        window: &ObservationWindow,
    ) -> Result<Vec<MachineRecord>, EngineError>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Appends a fully built prediction in a single write.
    async fn persist(&self, prediction: Prediction) -> Result<Prediction, EngineError>;

    async fn latest_prediction(&self, store_id: StoreId)
        -> Result<Option<Prediction>, EngineError>;

    /// Most recent first.
    async fn prediction_history(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<Prediction>, EngineError>;
}

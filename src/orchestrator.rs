use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::combiner;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::{self, ObservationWindow};
use crate::model::{ModelOutput, PredictionModel};
use crate::models::{DataStatus, FeatureMatrix, Prediction, StatisticalSummary, StoreId};
use crate::repository::{PredictionStore, RecordSource};
use crate::stats;

/// Lifecycle of one store's analysis run. `Idle` is the absence of an entry
/// in the in-flight map.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Running,
    Completed(Prediction),
    Failed(EngineError),
}

/// Awaitable view of an in-flight or finished run. Dropping it does not
/// cancel the run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    store_id: StoreId,
    state: watch::Receiver<RunState>,
}

impl RunHandle {
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub async fn wait(mut self) -> Result<Prediction, EngineError> {
        let store_id = self.store_id;
        let finished = self
            .state
            .wait_for(|state| !matches!(state, RunState::Running))
            .await
            .map_err(|_| EngineError::RunAborted { store_id })?;
        match &*finished {
            RunState::Completed(prediction) => Ok(prediction.clone()),
            RunState::Failed(err) => Err(err.clone()),
            RunState::Running => Err(EngineError::RunAborted { store_id }),
        }
    }
}

/// Runs store-scoped analyses, allowing at most one in flight per store.
#[derive(Clone)]
pub struct Orchestrator {
    records: Arc<dyn RecordSource>,
    predictions: Arc<dyn PredictionStore>,
    model: Arc<PredictionModel>,
    config: Arc<EngineConfig>,
    in_flight: Arc<Mutex<HashMap<StoreId, watch::Receiver<RunState>>>>,
}

impl Orchestrator {
    pub fn new(
        records: Arc<dyn RecordSource>,
        predictions: Arc<dyn PredictionStore>,
        model: PredictionModel,
        config: EngineConfig,
    ) -> Self {
        Self {
            records,
            predictions,
            model: Arc::new(model),
            config: Arc::new(config),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_running(&self, store_id: StoreId) -> bool {
        self.in_flight
            .lock()
            .map(|runs| runs.contains_key(&store_id))
            .unwrap_or(false)
    }

    pub fn start(
        &self,
        store_id: StoreId,
        window: ObservationWindow,
    ) -> Result<RunHandle, EngineError> {
        let mut runs = self
            .in_flight
            .lock()
            .map_err(|_| EngineError::RunAborted { store_id })?;
        if runs.contains_key(&store_id) {
            return Err(EngineError::ConcurrentRunRejected { store_id });
        }
        Ok(self.spawn_run(&mut runs, store_id, window))
    }

    pub async fn run(
        &self,
        store_id: StoreId,
        window: ObservationWindow,
    ) -> Result<Prediction, EngineError> {
        self.start(store_id, window)?.wait().await
    }

    /// Like [`Orchestrator::run`], but a caller arriving while a run is in
    /// flight waits for that run's result instead of being rejected.
    pub async fn run_or_join(
        &self,
        store_id: StoreId,
        window: ObservationWindow,
    ) -> Result<Prediction, EngineError> {
        let handle = {
            let mut runs = self
                .in_flight
                .lock()
                .map_err(|_| EngineError::RunAborted { store_id })?;
            match runs.get(&store_id) {
                Some(state) => RunHandle {
                    store_id,
                    state: state.clone(),
                },
                None => self.spawn_run(&mut runs, store_id, window),
            }
        };
        handle.wait().await
    }

    fn spawn_run(
        &self,
        runs: &mut HashMap<StoreId, watch::Receiver<RunState>>,
        store_id: StoreId,
        window: ObservationWindow,
    ) -> RunHandle {
        let (tx, rx) = watch::channel(RunState::Running);
        runs.insert(store_id, rx.clone());
        info!(store_id, "analysis started");

        let this = self.clone();
        tokio::spawn(async move {
            let worker = this.clone();
            let outcome = tokio::spawn(async move { worker.execute(store_id, window).await })
                .await
                .unwrap_or_else(|join_err| {
                    warn!(store_id, error = %join_err, "analysis task aborted");
                    Err(EngineError::RunAborted { store_id })
                });
            let state = match outcome {
                Ok(prediction) => {
                    info!(
                        store_id,
                        probability = prediction.high_setting_probability,
                        confidence = prediction.confidence_score,
                        variant = prediction.model_variant.as_str(),
                        "analysis completed"
                    );
                    RunState::Completed(prediction)
                }
                Err(err) => {
                    warn!(store_id, kind = err.kind(), error = %err, "analysis failed");
                    RunState::Failed(err)
                }
            };
            if let Ok(mut runs) = this.in_flight.lock() {
                runs.remove(&store_id);
            }
            tx.send_replace(state);
        });

        RunHandle { store_id, state: rx }
    }

    async fn execute(
        &self,
        store_id: StoreId,
        window: ObservationWindow,
    ) -> Result<Prediction, EngineError> {
        let records = self.records.records_for(store_id, &window).await?;
        let matrix = features::extract(store_id, &records, &window)?;
        let summary = stats::summarize(&matrix);

        let data_status = if matrix.is_empty() {
            info!(store_id, "no records in window, using heuristic prior");
            DataStatus::Insufficient
        } else {
            DataStatus::Sufficient
        };

        let output = self.score(store_id, &matrix, &summary).await;
        let recommendation = combiner::combine(&matrix, &summary, &output, &self.config);

        let prediction = Prediction {
            id: Uuid::new_v4(),
            store_id,
            prediction_date: Utc::now(),
            high_setting_probability: recommendation.probability,
            confidence_score: recommendation.confidence,
            recommended_machines: recommendation.machines,
            total_machines: summary.total_machines,
            statistical_analysis: summary,
            model_variant: output.variant,
            data_status,
        };

        self.predictions.persist(prediction).await
    }

    /// Model inference runs on the blocking pool. Any failure there degrades
    /// to the heuristic instead of failing the run.
    async fn score(
        &self,
        store_id: StoreId,
        matrix: &FeatureMatrix,
        summary: &StatisticalSummary,
    ) -> ModelOutput {
        let model = Arc::clone(&self.model);
        let owned_matrix = matrix.clone();
        let owned_summary = summary.clone();
        let scored = tokio::task::spawn_blocking(move || {
            model.score(Some(&owned_matrix), &owned_summary)
        })
        .await
        .unwrap_or_else(|join_err| {
            Err(EngineError::ModelUnavailable {
                reason: join_err.to_string(),
            })
        });

        match scored {
            Ok(output) => output,
            Err(err) => {
                warn!(store_id, error = %err, "model unavailable, using heuristic fallback");
                self.model.fallback(summary)
            }
        }
    }
}

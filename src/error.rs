use chrono::NaiveDate;
use thiserror::Error;

use crate::models::StoreId;

/// Failure kinds produced by the analysis engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("invalid window: end {end} precedes start {start}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("store {store_id} not found")]
    StoreNotFound { store_id: StoreId },

    #[error("malformed record for machine {machine_number} on {observed_on}: {reason}")]
    MalformedRecord {
        machine_number: i32,
        observed_on: NaiveDate,
        reason: String,
    },

    #[error("prediction model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("analysis already running for store {store_id}")]
    ConcurrentRunRejected { store_id: StoreId },

    #[error("persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("analysis for store {store_id} ended without a result")]
    RunAborted { store_id: StoreId },
}

impl EngineError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        EngineError::Persistence {
            reason: err.to_string(),
        }
    }

    /// Stable identifier for the failure kind, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidWindow { .. } => "invalid_window",
            EngineError::StoreNotFound { .. } => "store_not_found",
            EngineError::MalformedRecord { .. } => "malformed_record",
            EngineError::ModelUnavailable { .. } => "model_unavailable",
            EngineError::ConcurrentRunRejected { .. } => "concurrent_run_rejected",
            EngineError::Persistence { .. } => "persistence_error",
            EngineError::RunAborted { .. } => "run_aborted",
        }
    }
}

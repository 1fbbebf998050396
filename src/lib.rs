//! High-setting forecasting for slot machine stores.
//!
//! Raw per-machine daily records flow through [`features`] into a feature
//! matrix, which [`stats`] and [`model`] score independently. [`combiner`]
//! merges both signals and [`orchestrator`] runs the whole pipeline once per
//! store, persisting a [`models::Prediction`] through the traits in
//! [`repository`].

pub mod combiner;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod insights;
pub mod memory;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod repository;
pub mod stats;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};

/// Tunables for scoring and recommendation. Every field can be overridden
/// with an `ENGINE_*` environment variable.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub top_n: usize,
    pub min_trusted_machines: usize,
    pub full_confidence_machines: usize,
    pub trained_confidence_ceiling: f64,
    pub heuristic_confidence_ceiling: f64,
    pub model_weight: f64,
    pub prior_probability: f64,
    pub min_relevance: f64,
    pub model_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_trusted_machines: 10,
            full_confidence_machines: 50,
            trained_confidence_ceiling: 0.95,
            heuristic_confidence_ceiling: 0.6,
            model_weight: 0.6,
            prior_probability: 0.0,
            min_relevance: 0.5,
            model_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            top_n: env_or("ENGINE_TOP_N", defaults.top_n)?,
            min_trusted_machines: env_or(
                "ENGINE_MIN_TRUSTED_MACHINES",
                defaults.min_trusted_machines,
            )?,
            full_confidence_machines: env_or(
                "ENGINE_FULL_CONFIDENCE_MACHINES",
                defaults.full_confidence_machines,
            )?,
            trained_confidence_ceiling: defaults.trained_confidence_ceiling,
            heuristic_confidence_ceiling: defaults.heuristic_confidence_ceiling,
            model_weight: env_or("ENGINE_MODEL_WEIGHT", defaults.model_weight)?,
            prior_probability: env_or("ENGINE_PRIOR_PROBABILITY", defaults.prior_probability)?,
            min_relevance: env_or("ENGINE_MIN_RELEVANCE", defaults.min_relevance)?,
            model_path: std::env::var("ENGINE_MODEL_PATH").ok().map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.top_n == 0 {
            bail!("ENGINE_TOP_N must be at least 1");
        }
        if self.full_confidence_machines == 0 {
            bail!("ENGINE_FULL_CONFIDENCE_MACHINES must be at least 1");
        }
        for (name, value) in [
            ("ENGINE_MODEL_WEIGHT", self.model_weight),
            ("ENGINE_PRIOR_PROBABILITY", self.prior_probability),
            ("ENGINE_MIN_RELEVANCE", self.min_relevance),
            ("trained confidence ceiling", self.trained_confidence_ceiling),
            ("heuristic confidence ceiling", self.heuristic_confidence_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

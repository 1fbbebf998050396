use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::features::{self, ObservationWindow};
use crate::ingest;
use crate::models::{
    DataStatus, MachineRecord, ModelVariant, Prediction, StatisticalSummary, Store, StoreId,
};
use crate::repository::{PredictionStore, RecordSource};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_store(
    pool: &PgPool,
    name: &str,
    area: Option<&str>,
    source_url: Option<&str>,
) -> anyhow::Result<StoreId> {
    let id: StoreId = sqlx::query(
        r#"
        INSERT INTO slot_forecast.stores (name, area, source_url)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET area = COALESCE(EXCLUDED.area, slot_forecast.stores.area),
            source_url = COALESCE(EXCLUDED.source_url, slot_forecast.stores.source_url)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(area)
    .bind(source_url)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

/// Inserts a record unless (store, machine, date) already exists. Returns
/// whether a row was written.
async fn insert_record(pool: &PgPool, record: &MachineRecord) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO slot_forecast.machine_records
        (id, store_id, machine_number, model_name, game_count, big_bonus,
         regular_bonus, art_count, net_difference, observed_on)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (store_id, machine_number, observed_on) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(record.store_id)
    .bind(record.machine_number)
    .bind(&record.model_name)
    .bind(record.game_count)
    .bind(record.big_bonus)
    .bind(record.regular_bonus)
    .bind(record.art_count)
    .bind(record.net_difference)
    .bind(record.observed_on)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let stores = vec![
        (
            "Espace Ikebukuro",
            "Tokyo",
            "https://ana-slo.com/hall/espace-ikebukuro",
            ["Juggler", "Hanahana", "Monkey Turn"],
        ),
        (
            "Rakuen Kamata",
            "Tokyo",
            "https://ana-slo.com/hall/rakuen-kamata",
            ["Juggler", "Tokyo Ghoul", "Hokuto"],
        ),
    ];

    let today = Utc::now().date_naive();
    let mut inserted = 0usize;

    for (store_index, (name, area, url, models)) in stores.into_iter().enumerate() {
        let store_id = upsert_store(pool, name, Some(area), Some(url)).await?;

        for days_ago in 1..=14i64 {
            let observed_on = today - Duration::days(days_ago);
            for machine_number in 101..=124 {
                let swing = (machine_number * 37 + days_ago as i32 * 53 + store_index as i32 * 11) % 23 - 11;
                let favored = machine_number % 10 == 7;
                let net_difference = swing * 120 + if favored { 900 } else { 0 };
                let game_count = 2500 + (swing.abs() * 310) + if favored { 2000 } else { 0 };
                let record = MachineRecord {
                    store_id,
                    machine_number,
                    model_name: models[(machine_number as usize) % models.len()].to_string(),
                    game_count,
                    big_bonus: game_count / if favored { 220 } else { 290 },
                    regular_bonus: game_count / if favored { 300 } else { 420 },
                    art_count: 0,
                    net_difference,
                    observed_on,
                };
                if insert_record(pool, &record).await? {
                    inserted += 1;
                }
            }
        }
    }

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let rows = ingest::read_rows(csv_path)?;
    let mut inserted = 0usize;

    for row in rows {
        let store_id = upsert_store(pool, &row.store_name, row.area.as_deref(), None).await?;
        let record = row.to_record(store_id);
        features::validate_record(&record)?;
        if insert_record(pool, &record).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_store(pool: &PgPool, store_id: StoreId) -> anyhow::Result<Option<Store>> {
    let row = sqlx::query(
        "SELECT id, name, area, source_url FROM slot_forecast.stores WHERE id = $1",
    )
    .bind(store_id)
    .fetch_optional(pool)
    .await
    .context("failed to load store")?;

    Ok(row.map(|row| Store {
        id: row.get("id"),
        name: row.get("name"),
        area: row.get("area"),
        source_url: row.get("source_url"),
    }))
}

fn variant_from_db(raw: &str) -> Result<ModelVariant, EngineError> {
    match raw {
        "trained" => Ok(ModelVariant::Trained),
        "heuristic" => Ok(ModelVariant::Heuristic),
        other => Err(EngineError::persistence(format!("unknown model variant {other}"))),
    }
}

fn status_from_db(raw: &str) -> Result<DataStatus, EngineError> {
    match raw {
        "sufficient" => Ok(DataStatus::Sufficient),
        "insufficient" => Ok(DataStatus::Insufficient),
        other => Err(EngineError::persistence(format!("unknown data status {other}"))),
    }
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction, EngineError> {
    let recommended: String = row.try_get("recommended_machines").map_err(EngineError::persistence)?;
    let analysis: String = row.try_get("statistical_analysis").map_err(EngineError::persistence)?;
    let variant: String = row.try_get("model_variant").map_err(EngineError::persistence)?;
    let status: String = row.try_get("data_status").map_err(EngineError::persistence)?;
    let total_machines: i32 = row.try_get("total_machines").map_err(EngineError::persistence)?;

    let recommended_machines: Vec<i32> =
        serde_json::from_str(&recommended).map_err(EngineError::persistence)?;
    let statistical_analysis: StatisticalSummary =
        serde_json::from_str(&analysis).map_err(EngineError::persistence)?;

    Ok(Prediction {
        id: row.try_get("id").map_err(EngineError::persistence)?,
        store_id: row.try_get("store_id").map_err(EngineError::persistence)?,
        prediction_date: row.try_get("prediction_date").map_err(EngineError::persistence)?,
        high_setting_probability: row
            .try_get("high_setting_probability")
            .map_err(EngineError::persistence)?,
        confidence_score: row.try_get("confidence_score").map_err(EngineError::persistence)?,
        recommended_machines,
        statistical_analysis,
        total_machines: total_machines.max(0) as usize,
        model_variant: variant_from_db(&variant)?,
        data_status: status_from_db(&status)?,
    })
}

fn record_from_row(row: &PgRow) -> Result<MachineRecord, EngineError> {
    Ok(MachineRecord {
        store_id: row.try_get("store_id").map_err(EngineError::persistence)?,
        machine_number: row.try_get("machine_number").map_err(EngineError::persistence)?,
        model_name: row.try_get("model_name").map_err(EngineError::persistence)?,
        game_count: row.try_get("game_count").map_err(EngineError::persistence)?,
        big_bonus: row.try_get("big_bonus").map_err(EngineError::persistence)?,
        regular_bonus: row.try_get("regular_bonus").map_err(EngineError::persistence)?,
        art_count: row.try_get("art_count").map_err(EngineError::persistence)?,
        net_difference: row.try_get("net_difference").map_err(EngineError::persistence)?,
        observed_on: row
            .try_get::<NaiveDate, _>("observed_on")
            .map_err(EngineError::persistence)?,
    })
}

const PREDICTION_COLUMNS: &str = "id, store_id, prediction_date, high_setting_probability, \
     confidence_score, recommended_machines, statistical_analysis, total_machines, \
     model_variant, data_status";

/// Postgres-backed record source and prediction store.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn store_exists(&self, store_id: StoreId) -> Result<bool, EngineError> {
        let row = sqlx::query("SELECT 1 FROM slot_forecast.stores WHERE id = $1")
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::persistence)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RecordSource for PgRepository {
    async fn records_for(
        &self,
        store_id: StoreId,
        window: &ObservationWindow,
    ) -> Result<Vec<MachineRecord>, EngineError> {
        if !self.store_exists(store_id).await? {
            return Err(EngineError::StoreNotFound { store_id });
        }

        let rows = sqlx::query(
            r#"
            SELECT store_id, machine_number, model_name, game_count, big_bonus,
                   regular_bonus, art_count, net_difference, observed_on
            FROM slot_forecast.machine_records
            WHERE store_id = $1
              AND observed_on <= $2
              AND ($3::date IS NULL OR observed_on >= $3)
            ORDER BY observed_on, machine_number
            "#,
        )
        .bind(store_id)
        .bind(window.end)
        .bind(window.start)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::persistence)?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl PredictionStore for PgRepository {
    async fn persist(&self, prediction: Prediction) -> Result<Prediction, EngineError> {
        let recommended =
            serde_json::to_string(&prediction.recommended_machines).map_err(EngineError::persistence)?;
        let analysis =
            serde_json::to_string(&prediction.statistical_analysis).map_err(EngineError::persistence)?;

        sqlx::query(
            r#"
            INSERT INTO slot_forecast.predictions
            (id, store_id, prediction_date, high_setting_probability, confidence_score,
             recommended_machines, statistical_analysis, total_machines, model_variant, data_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(prediction.id)
        .bind(prediction.store_id)
        .bind(prediction.prediction_date)
        .bind(prediction.high_setting_probability)
        .bind(prediction.confidence_score)
        .bind(recommended)
        .bind(analysis)
        .bind(prediction.total_machines as i32)
        .bind(prediction.model_variant.as_str())
        .bind(prediction.data_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(EngineError::persistence)?;

        Ok(prediction)
    }

    async fn latest_prediction(
        &self,
        store_id: StoreId,
    ) -> Result<Option<Prediction>, EngineError> {
        let query = format!(
            "SELECT {PREDICTION_COLUMNS} FROM slot_forecast.predictions \
             WHERE store_id = $1 ORDER BY prediction_date DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::persistence)?;

        row.as_ref().map(prediction_from_row).transpose()
    }

    async fn prediction_history(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<Prediction>, EngineError> {
        let query = format!(
            "SELECT {PREDICTION_COLUMNS} FROM slot_forecast.predictions \
             WHERE store_id = $1 ORDER BY prediction_date DESC LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(store_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::persistence)?;

        rows.iter().map(prediction_from_row).collect()
    }
}

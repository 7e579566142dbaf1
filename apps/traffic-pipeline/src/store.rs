use crate::config::SqlConfig;
use crate::reading::Reading;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store connection itself is gone or exhausted. Retrying the next message cannot help.
    #[error("store connection unavailable: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("store write failed: {0}")]
    Write(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Connection(err),
            other => StoreError::Write(other),
        }
    }
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Append-only sink for readings. `insert_reading` returns only once the row is durable.
#[async_trait]
pub trait SensorStore: Send + Sync {
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDataRow {
    pub sensor_id: i32,
    pub vehicle_count: i32,
    pub average_speed: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgSensorStore {
    pool: PgPool,
}

pub async fn build_pool(config: &SqlConfig) -> Result<PgPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await
        .context("failed to connect to the SensorData store")?;
    Ok(pool)
}

impl PgSensorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS SensorData (
                sensor_id integer not null,
                vehicle_count integer not null,
                average_speed double precision not null,
                timestamp timestamptz not null
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("create SensorData")?;
        Ok(())
    }

    pub async fn fetch_rows(&self) -> Result<Vec<SensorDataRow>> {
        let rows = sqlx::query(
            r#"
            SELECT sensor_id, vehicle_count, average_speed, timestamp
            FROM SensorData
            ORDER BY timestamp
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load SensorData")?;

        rows.into_iter()
            .map(|row| -> Result<SensorDataRow> {
                Ok(SensorDataRow {
                    sensor_id: row.try_get("sensor_id")?,
                    vehicle_count: row.try_get("vehicle_count")?,
                    average_speed: row.try_get("average_speed")?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO SensorData (sensor_id, vehicle_count, average_speed, timestamp) VALUES ($1, $2, $3, $4)",
        )
        .bind(reading.sensor_id)
        .bind(reading.vehicle_count)
        .bind(reading.average_speed)
        .bind(reading.timestamp)
        .execute(&mut *tx)
        .await?;
        // Dropping an uncommitted transaction rolls it back, so an error above never leaves a
        // partial write behind.
        tx.commit().await?;
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::{
    EscalationRecord, EscalationStore, NodeHours, NodeMax, RateData, SourceSinkStore, StoreError,
    TelemetryStore,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS failure_counts (
        pair_key TEXT PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 0,
        first_failure TIMESTAMPTZ,
        message_sent BOOLEAN NOT NULL DEFAULT FALSE,
        callout_invoked BOOLEAN NOT NULL DEFAULT FALSE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rate_data (
        id BIGSERIAL PRIMARY KEY,
        recorded_at TIMESTAMPTZ NOT NULL,
        approved BIGINT NOT NULL,
        declined BIGINT NOT NULL,
        failed BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS response_codes (
        id BIGSERIAL PRIMARY KEY,
        recorded_at TIMESTAMPTZ NOT NULL,
        codes TEXT[] NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS node_hours (
        node_name TEXT PRIMARY KEY,
        business_hours TEXT NOT NULL,
        business_hours_impact TEXT NOT NULL,
        after_hours TEXT NOT NULL,
        after_hours_impact TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS node_max (
        node_name TEXT PRIMARY KEY,
        max_connections BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS connection_counts (
        id BIGSERIAL PRIMARY KEY,
        node_name TEXT NOT NULL,
        connections BIGINT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        recorded_hour INTEGER NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS connection_counts_node_hour
        ON connection_counts (node_name, recorded_hour)"#,
];

/// PostgreSQL backed store. One row per pair key in `failure_counts`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Store schema is up to date.");
        Ok(())
    }

    async fn record(&self, pair_key: &str) -> Result<Option<EscalationRecord>, StoreError> {
        let record = sqlx::query_as::<_, EscalationRecord>(
            "SELECT count, first_failure, message_sent, callout_invoked FROM failure_counts WHERE pair_key = $1",
        )
        .bind(pair_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[async_trait]
impl EscalationStore for PgStore {
    async fn increase_count(&self, pair_key: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO failure_counts (pair_key, count, first_failure)
            VALUES ($1, 1, $2)
            ON CONFLICT (pair_key) DO UPDATE SET
                count = failure_counts.count + 1,
                first_failure = CASE WHEN failure_counts.count = 0 THEN $2 ELSE failure_counts.first_failure END
            "#,
        )
        .bind(pair_key)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zero_count(&self, pair_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO failure_counts (pair_key, count, first_failure, message_sent, callout_invoked)
            VALUES ($1, 0, NULL, FALSE, FALSE)
            ON CONFLICT (pair_key) DO UPDATE SET
                count = 0, first_failure = NULL, message_sent = FALSE, callout_invoked = FALSE
            "#,
        )
        .bind(pair_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_count(
        &self,
        pair_key: &str,
    ) -> Result<(i32, Option<DateTime<Utc>>), StoreError> {
        Ok(self
            .record(pair_key)
            .await?
            .map(|r| (r.count, r.first_failure))
            .unwrap_or((0, None)))
    }

    async fn is_message_sent(&self, pair_key: &str) -> Result<bool, StoreError> {
        Ok(self.record(pair_key).await?.is_some_and(|r| r.message_sent))
    }

    async fn set_message_sent(&self, pair_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO failure_counts (pair_key, message_sent) VALUES ($1, TRUE)
            ON CONFLICT (pair_key) DO UPDATE SET message_sent = TRUE
            "#,
        )
        .bind(pair_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_callout_invoked(&self, pair_key: &str) -> Result<bool, StoreError> {
        Ok(self.record(pair_key).await?.is_some_and(|r| r.callout_invoked))
    }

    async fn set_callout_invoked(&self, pair_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO failure_counts (pair_key, callout_invoked) VALUES ($1, TRUE)
            ON CONFLICT (pair_key) DO UPDATE SET callout_invoked = TRUE
            "#,
        )
        .bind(pair_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn save_rate_data(&self, data: RateData, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rate_data (recorded_at, approved, declined, failed) VALUES ($1, $2, $3, $4)",
        )
        .bind(at)
        .bind(data.approved)
        .bind(data.declined)
        .bind(data.failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_response_code_data(
        &self,
        codes: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO response_codes (recorded_at, codes) VALUES ($1, $2)")
            .bind(at)
            .bind(codes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceSinkStore for PgStore {
    async fn set_node_hours(&self, hours: NodeHours) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_hours (node_name, business_hours, business_hours_impact, after_hours, after_hours_impact)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (node_name) DO UPDATE SET
                business_hours = EXCLUDED.business_hours,
                business_hours_impact = EXCLUDED.business_hours_impact,
                after_hours = EXCLUDED.after_hours,
                after_hours_impact = EXCLUDED.after_hours_impact
            "#,
        )
        .bind(&hours.node_name)
        .bind(&hours.business_hours)
        .bind(&hours.business_hours_impact)
        .bind(&hours.after_hours)
        .bind(&hours.after_hours_impact)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn node_hours(&self) -> Result<Vec<NodeHours>, StoreError> {
        let hours = sqlx::query_as::<_, NodeHours>(
            "SELECT node_name, business_hours, business_hours_impact, after_hours, after_hours_impact FROM node_hours ORDER BY node_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(hours)
    }

    async fn set_node_max(&self, max: NodeMax) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_max (node_name, max_connections) VALUES ($1, $2)
            ON CONFLICT (node_name) DO UPDATE SET max_connections = EXCLUDED.max_connections
            "#,
        )
        .bind(&max.node_name)
        .bind(max.max_connections)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn node_max(&self) -> Result<Vec<NodeMax>, StoreError> {
        let max = sqlx::query_as::<_, NodeMax>(
            "SELECT node_name, max_connections FROM node_max ORDER BY node_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(max)
    }

    async fn save_connection_count(
        &self,
        node_name: &str,
        connections: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO connection_counts (node_name, connections, recorded_at, recorded_hour) VALUES ($1, $2, $3, $4)",
        )
        .bind(node_name)
        .bind(connections)
        .bind(at)
        .bind(at.hour() as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn average_connection_count(
        &self,
        node_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let average = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(connections)::FLOAT8 FROM connection_counts WHERE node_name = $1 AND recorded_hour = $2",
        )
        .bind(node_name)
        .bind(at.hour() as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(average)
    }
}

//! Persistence for escalation state and check telemetry.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Escalation state for one pair key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EscalationRecord {
    pub count: i32,
    pub first_failure: Option<DateTime<Utc>>,
    pub message_sent: bool,
    pub callout_invoked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateData {
    pub approved: i64,
    pub declined: i64,
    pub failed: i64,
}

/// Business-hours criticality of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct NodeHours {
    pub node_name: String,
    pub business_hours: String,
    pub business_hours_impact: String,
    pub after_hours: String,
    pub after_hours_impact: String,
}

/// Hard connection ceiling of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct NodeMax {
    #[serde(rename = "Nodename")]
    pub node_name: String,
    #[serde(rename = "Maxval")]
    pub max_connections: i64,
}

/// Per pair key failure bookkeeping.
#[async_trait]
pub trait EscalationStore: Send + Sync {
    /// Adds one failure; stamps the first failure time when the count leaves zero.
    async fn increase_count(&self, pair_key: &str, now: DateTime<Utc>) -> Result<(), StoreError>;
    /// Ends the episode: count, message and callout flags all reset.
    async fn zero_count(&self, pair_key: &str) -> Result<(), StoreError>;
    async fn get_count(
        &self,
        pair_key: &str,
    ) -> Result<(i32, Option<DateTime<Utc>>), StoreError>;
    async fn is_message_sent(&self, pair_key: &str) -> Result<bool, StoreError>;
    async fn set_message_sent(&self, pair_key: &str) -> Result<(), StoreError>;
    async fn is_callout_invoked(&self, pair_key: &str) -> Result<bool, StoreError>;
    async fn set_callout_invoked(&self, pair_key: &str) -> Result<(), StoreError>;
}

/// History written by the rate and response code checks.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn save_rate_data(&self, data: RateData, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn save_response_code_data(
        &self,
        codes: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Tables behind the connectivity and capacity check.
#[async_trait]
pub trait SourceSinkStore: Send + Sync {
    async fn set_node_hours(&self, hours: NodeHours) -> Result<(), StoreError>;
    async fn node_hours(&self) -> Result<Vec<NodeHours>, StoreError>;
    async fn set_node_max(&self, max: NodeMax) -> Result<(), StoreError>;
    async fn node_max(&self) -> Result<Vec<NodeMax>, StoreError>;
    async fn save_connection_count(
        &self,
        node_name: &str,
        connections: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Mean of the samples recorded for the node during the same hour of day as `at`.
    async fn average_connection_count(
        &self,
        node_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;
}

/// Everything the monitor persists.
pub trait MonitorStore: EscalationStore + TelemetryStore + SourceSinkStore {}

impl<T: EscalationStore + TelemetryStore + SourceSinkStore> MonitorStore for T {}

/// One backing store seen through each of its roles.
#[derive(Clone)]
pub struct Stores {
    pub escalation: Arc<dyn EscalationStore>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub source_sink: Arc<dyn SourceSinkStore>,
}

impl Stores {
    pub fn from_shared<S: MonitorStore + 'static>(store: Arc<S>) -> Self {
        Self {
            escalation: store.clone(),
            telemetry: store.clone(),
            source_sink: store,
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{
    EscalationRecord, EscalationStore, NodeHours, NodeMax, RateData, SourceSinkStore, StoreError,
    TelemetryStore,
};

/// Telemetry entries kept per history.
pub const HISTORY_LIMIT: usize = 1440;
/// Connection samples older than this, relative to the one being saved, are dropped.
pub const SAMPLE_RETENTION_DAYS: i64 = 7;

fn push_bounded<T>(history: &mut VecDeque<T>, entry: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(entry);
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    escalations: DashMap<String, EscalationRecord>,
    node_hours: DashMap<String, NodeHours>,
    node_max: DashMap<String, NodeMax>,
    connection_samples: DashMap<String, VecDeque<(DateTime<Utc>, i64)>>,
    rate_history: Mutex<VecDeque<(DateTime<Utc>, RateData)>>,
    response_code_history: Mutex<VecDeque<(DateTime<Utc>, Vec<String>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pair_key: &str) -> Option<EscalationRecord> {
        self.escalations.get(pair_key).map(|r| r.clone())
    }

    pub fn rate_history(&self) -> Vec<(DateTime<Utc>, RateData)> {
        self.rate_history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn response_code_history(&self) -> Vec<(DateTime<Utc>, Vec<String>)> {
        self.response_code_history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_error<E>(_: E) -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl EscalationStore for MemoryStore {
    async fn increase_count(&self, pair_key: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut record = self.escalations.entry(pair_key.to_string()).or_default();
        record.count += 1;
        if record.count == 1 {
            record.first_failure = Some(now);
        }
        Ok(())
    }

    async fn zero_count(&self, pair_key: &str) -> Result<(), StoreError> {
        self.escalations
            .insert(pair_key.to_string(), EscalationRecord::default());
        Ok(())
    }

    async fn get_count(
        &self,
        pair_key: &str,
    ) -> Result<(i32, Option<DateTime<Utc>>), StoreError> {
        Ok(self
            .escalations
            .get(pair_key)
            .map(|r| (r.count, r.first_failure))
            .unwrap_or((0, None)))
    }

    async fn is_message_sent(&self, pair_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .escalations
            .get(pair_key)
            .map(|r| r.message_sent)
            .unwrap_or(false))
    }

    async fn set_message_sent(&self, pair_key: &str) -> Result<(), StoreError> {
        self.escalations
            .entry(pair_key.to_string())
            .or_default()
            .message_sent = true;
        Ok(())
    }

    async fn is_callout_invoked(&self, pair_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .escalations
            .get(pair_key)
            .map(|r| r.callout_invoked)
            .unwrap_or(false))
    }

    async fn set_callout_invoked(&self, pair_key: &str) -> Result<(), StoreError> {
        self.escalations
            .entry(pair_key.to_string())
            .or_default()
            .callout_invoked = true;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn save_rate_data(&self, data: RateData, at: DateTime<Utc>) -> Result<(), StoreError> {
        push_bounded(
            &mut *self.rate_history.lock().map_err(Self::lock_error)?,
            (at, data),
        );
        Ok(())
    }

    async fn save_response_code_data(
        &self,
        codes: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        push_bounded(
            &mut *self.response_code_history.lock().map_err(Self::lock_error)?,
            (at, codes.to_vec()),
        );
        Ok(())
    }
}

#[async_trait]
impl SourceSinkStore for MemoryStore {
    async fn set_node_hours(&self, hours: NodeHours) -> Result<(), StoreError> {
        self.node_hours.insert(hours.node_name.clone(), hours);
        Ok(())
    }

    async fn node_hours(&self) -> Result<Vec<NodeHours>, StoreError> {
        let mut hours: Vec<NodeHours> = self.node_hours.iter().map(|e| e.value().clone()).collect();
        hours.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        Ok(hours)
    }

    async fn set_node_max(&self, max: NodeMax) -> Result<(), StoreError> {
        self.node_max.insert(max.node_name.clone(), max);
        Ok(())
    }

    async fn node_max(&self) -> Result<Vec<NodeMax>, StoreError> {
        let mut max: Vec<NodeMax> = self.node_max.iter().map(|e| e.value().clone()).collect();
        max.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        Ok(max)
    }

    async fn save_connection_count(
        &self,
        node_name: &str,
        connections: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut samples = self.connection_samples.entry(node_name.to_string()).or_default();
        samples.push_back((at, connections));
        let cutoff = at - Duration::days(SAMPLE_RETENTION_DAYS);
        samples.retain(|(sampled_at, _)| *sampled_at >= cutoff);
        Ok(())
    }

    async fn average_connection_count(
        &self,
        node_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let Some(samples) = self.connection_samples.get(node_name) else {
            return Ok(None);
        };
        let same_hour: Vec<i64> = samples
            .iter()
            .filter(|(sampled_at, _)| sampled_at.hour() == at.hour())
            .map(|(_, count)| *count)
            .collect();
        if same_hour.is_empty() {
            return Ok(None);
        }
        Ok(Some(same_hour.iter().sum::<i64>() as f64 / same_hour.len() as f64))
    }
}

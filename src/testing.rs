//! In-memory fakes of the collaborator traits, shared by the unit tests.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::anomaly::{AnomalyDetector, AnomalyError, AnomalyVerdict};
use crate::config::MonitorConfig;
use crate::metrics_sink::{LinePoint, MetricsSink, SinkError};
use crate::notifications::{AlertChannel, CalloutChannel, NotificationError};

pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        config_url: "http://config.local/monitors".to_string(),
        prognosis_username: "bot".to_string(),
        prognosis_password: "secret".to_string(),
        hal_endpoint: None,
        telegram_bot_token: None,
        error_group: 99,
        detector_endpoint: None,
        anomaly_threshold: 3.0,
        average_threshold: 5.0,
        metrics_sink_url: None,
        metrics_sink_user: None,
        metrics_sink_password: None,
        database_url: None,
        http_listen: "127.0.0.1:0".to_string(),
        log_dir: "logs".to_string(),
        poll_interval_seconds: 10,
        login_backoff_seconds: 0,
        fetch_attempts: 3,
        fetch_retry_delay_ms: 1,
        request_timeout_seconds: 5,
        technical_error_threshold: 10,
        accept_invalid_certs: true,
        warn_after_seconds: 30,
        callout_after_seconds: 180,
        failure_rate_threshold_percent: 20.0,
        watched_response_codes: vec!["91".to_string(), "68".to_string()],
        response_code_threshold: 6,
        sink_bin_workers: 3,
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    texts: Mutex<Vec<(i64, String)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    pub fn texts(&self) -> Vec<(i64, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlerts {
    async fn send_text(&self, group: i64, message: &str) -> Result<(), NotificationError> {
        self.texts.lock().unwrap().push((group, message.to_string()));
        Ok(())
    }

    async fn send_error(&self, message: &str) -> Result<(), NotificationError> {
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCallouts {
    calls: Mutex<Vec<(i64, String, String)>>,
}

impl RecordingCallouts {
    pub fn calls(&self) -> Vec<(i64, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalloutChannel for RecordingCallouts {
    async fn invoke_callout(
        &self,
        group: i64,
        title: &str,
        message: &str,
    ) -> Result<(), NotificationError> {
        self.calls
            .lock()
            .unwrap()
            .push((group, title.to_string(), message.to_string()));
        Ok(())
    }
}

/// Flags the series listed in `anomalous`, fails the ones in `failing`.
#[derive(Default)]
pub struct ScriptedDetector {
    pub anomalous: Vec<String>,
    pub failing: Vec<String>,
    pub seen: Mutex<HashMap<String, f64>>,
}

impl ScriptedDetector {
    pub fn seen(&self) -> HashMap<String, f64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnomalyDetector for ScriptedDetector {
    async fn analyse(&self, series_key: &str, value: f64) -> Result<AnomalyVerdict, AnomalyError> {
        self.seen.lock().unwrap().insert(series_key.to_string(), value);
        if self.failing.iter().any(|k| k == series_key) {
            return Err(AnomalyError::Rejected {
                series: series_key.to_string(),
                status: 503,
            });
        }
        let is_anomaly = self.anomalous.iter().any(|k| k == series_key);
        Ok(AnomalyVerdict {
            is_anomaly,
            explanation: if is_anomaly {
                format!("{series_key} is unusual")
            } else {
                String::new()
            },
            score: if is_anomaly { 5.0 } else { 0.5 },
            average: value,
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write(&self, points: &[LinePoint]) -> Result<(), SinkError> {
        self.lines
            .lock()
            .unwrap()
            .extend(points.iter().map(LinePoint::to_line));
        Ok(())
    }
}

//! Client for the remote anomaly-detection service.
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("Anomaly service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Anomaly service answered {status} for series {series}")]
    Rejected { series: String, status: u16 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    pub explanation: String,
    pub score: f64,
    /// Long-run average reported by the service for this series.
    pub average: f64,
}

#[async_trait]
pub trait AnomalyDetector: Send + Sync {
    /// Adds `value` to the series and reports whether it is anomalous.
    async fn analyse(&self, series_key: &str, value: f64) -> Result<AnomalyVerdict, AnomalyError>;
}

#[derive(Deserialize, Debug, Default)]
struct AnomalyAddDataResponse {
    #[serde(rename = "AnomalyScore", default)]
    anomaly_score: f64,
    #[serde(rename = "Average", default)]
    average: f64,
    #[serde(rename = "Hour", default)]
    hour: f64,
    #[serde(rename = "Day", default)]
    day: f64,
    #[serde(rename = "Month", default)]
    month: f64,
}

pub struct HttpAnomalyDetector {
    client: Client,
    endpoint: String,
    anomaly_threshold: f64,
    average_threshold: f64,
}

impl HttpAnomalyDetector {
    pub fn new(client: Client, endpoint: &str, anomaly_threshold: f64, average_threshold: f64) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            anomaly_threshold,
            average_threshold,
        }
    }

    fn judge(&self, value: f64, response: &AnomalyAddDataResponse) -> AnomalyVerdict {
        let mut verdict = AnomalyVerdict {
            score: response.anomaly_score,
            average: response.average,
            ..Default::default()
        };
        // Low-volume series are too noisy to judge.
        if response.average < self.average_threshold {
            return verdict;
        }
        if response.anomaly_score > self.anomaly_threshold {
            verdict.is_anomaly = true;
            verdict.explanation = format!(
                "Current Value: {value}. Average value {}. Expected values for time of day: {}, day of week: {}, day of month: {}",
                response.average.round(),
                response.hour.round(),
                response.day.round(),
                response.month.round()
            );
        }
        verdict
    }
}

#[async_trait]
impl AnomalyDetector for HttpAnomalyDetector {
    async fn analyse(&self, series_key: &str, value: f64) -> Result<AnomalyVerdict, AnomalyError> {
        let url = format!("{}/api/anomaly/{series_key}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/text")
            .body(value.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AnomalyError::Rejected {
                series: series_key.to_string(),
                status: response.status().as_u16(),
            });
        }
        let response: AnomalyAddDataResponse = response.json().await?;
        debug!(series = %series_key, value = value, score = response.anomaly_score, "Anomaly score received.");
        Ok(self.judge(value, &response))
    }
}

/// Used when no detector endpoint is configured. Never flags anything.
pub struct DisabledAnomalyDetector;

#[async_trait]
impl AnomalyDetector for DisabledAnomalyDetector {
    async fn analyse(&self, _series_key: &str, _value: f64) -> Result<AnomalyVerdict, AnomalyError> {
        Ok(AnomalyVerdict::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn high_score_above_average_threshold_is_anomalous() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/anomaly/4000-volume").body("120");
                then.status(200).json_body(serde_json::json!({
                    "AnomalyScore": 4.2, "Average": 40.4, "Hour": 38.0, "Day": 41.0, "Month": 39.0
                }));
            })
            .await;

        let detector = HttpAnomalyDetector::new(Client::new(), &server.base_url(), 3.0, 5.0);
        let verdict = detector.analyse("4000-volume", 120.0).await.unwrap();
        assert!(verdict.is_anomaly);
        assert_eq!(verdict.score, 4.2);
        assert!(verdict.explanation.contains("Current Value: 120"));
        assert!(verdict.explanation.contains("Average value 40"));
    }

    #[tokio::test]
    async fn low_average_series_is_never_anomalous() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/anomaly/quiet");
                then.status(200)
                    .json_body(serde_json::json!({"AnomalyScore": 9.0, "Average": 1.0}));
            })
            .await;

        let detector = HttpAnomalyDetector::new(Client::new(), &server.base_url(), 3.0, 5.0);
        let verdict = detector.analyse("quiet", 50.0).await.unwrap();
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.score, 9.0);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/anomaly/x");
                then.status(500);
            })
            .await;

        let detector = HttpAnomalyDetector::new(Client::new(), &server.base_url(), 3.0, 5.0);
        let err = detector.analyse("x", 1.0).await.unwrap_err();
        assert!(matches!(err, AnomalyError::Rejected { status: 500, .. }));
    }
}

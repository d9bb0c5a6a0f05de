//! Time-series sink speaking the line protocol.
use async_trait::async_trait;
use reqwest::Client;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Metrics sink request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Metrics sink rejected the batch with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One `measurement,tag=value field=value` line.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePoint {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, f64)>,
}

impl LinePoint {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.push((key.to_string(), value));
        self
    }

    /// The protocol has no representation for NaN or infinities, and a line
    /// needs at least one field.
    pub fn is_writable(&self) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|(_, value)| value.is_finite())
    }

    pub fn to_line(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        let _ = write!(line, " {}", fields.join(","));
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, points: &[LinePoint]) -> Result<(), SinkError>;
}

pub struct HttpLineSink {
    client: Client,
    url: String,
    credentials: Option<(String, String)>,
}

impl HttpLineSink {
    pub fn new(client: Client, url: &str, user: Option<&str>, password: Option<&str>) -> Self {
        let credentials = user.map(|u| (u.to_string(), password.unwrap_or_default().to_string()));
        Self {
            client,
            url: url.to_string(),
            credentials,
        }
    }
}

#[async_trait]
impl MetricsSink for HttpLineSink {
    async fn write(&self, points: &[LinePoint]) -> Result<(), SinkError> {
        let body: String = points
            .iter()
            .filter(|p| {
                let writable = p.is_writable();
                if !writable {
                    warn!(point = ?p, "Dropping point without finite fields.");
                }
                writable
            })
            .map(|p| p.to_line() + "\n")
            .collect();
        if body.is_empty() {
            return Ok(());
        }
        let mut request = self.client.post(&self.url).body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        debug!(points = points.len(), "Metrics written.");
        Ok(())
    }
}

/// Used when no sink URL is configured.
pub struct DisabledMetricsSink;

#[async_trait]
impl MetricsSink for DisabledMetricsSink {
    async fn write(&self, _points: &[LinePoint]) -> Result<(), SinkError> {
        Ok(())
    }
}

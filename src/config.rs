use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    ParseFile {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Environment(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Failed to fetch remote widget configuration: {0}")]
    RemoteFetch(#[from] reqwest::Error),
    #[error("Remote widget configuration is not valid JSON: {0}")]
    RemoteDecode(#[from] serde_json::Error),
    #[error("Remote widget configuration lists no environments")]
    NoEnvironments,
    #[error("Widget '{widget_id}' uses unknown check type '{check_type}'")]
    UnknownCheck {
        widget_id: String,
        check_type: String,
    },
}

/// Process configuration. File values are overridden by environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub config_url: String,
    pub prognosis_username: String,
    pub prognosis_password: String,

    pub hal_endpoint: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub error_group: i64,

    pub detector_endpoint: Option<String>,
    pub anomaly_threshold: f64,
    pub average_threshold: f64,

    pub metrics_sink_url: Option<String>,
    pub metrics_sink_user: Option<String>,
    pub metrics_sink_password: Option<String>,

    pub database_url: Option<String>,
    pub http_listen: String,
    pub log_dir: String,

    pub poll_interval_seconds: u64,
    pub login_backoff_seconds: u64,
    pub fetch_attempts: u32,
    pub fetch_retry_delay_ms: u64,
    pub request_timeout_seconds: u64,
    pub technical_error_threshold: u32,
    pub accept_invalid_certs: bool,

    pub warn_after_seconds: i64,
    pub callout_after_seconds: i64,

    pub failure_rate_threshold_percent: f64,
    pub watched_response_codes: Vec<String>,
    pub response_code_threshold: u64,
    pub sink_bin_workers: usize,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialMonitorConfig {
    config_url: Option<String>,
    prognosis_username: Option<String>,
    prognosis_password: Option<String>,
    hal_endpoint: Option<String>,
    telegram_bot_token: Option<String>,
    error_group: Option<i64>,
    detector_endpoint: Option<String>,
    anomaly_threshold: Option<f64>,
    average_threshold: Option<f64>,
    metrics_sink_url: Option<String>,
    metrics_sink_user: Option<String>,
    metrics_sink_password: Option<String>,
    database_url: Option<String>,
    http_listen: Option<String>,
    log_dir: Option<String>,
    poll_interval_seconds: Option<u64>,
    login_backoff_seconds: Option<u64>,
    fetch_attempts: Option<u32>,
    fetch_retry_delay_ms: Option<u64>,
    request_timeout_seconds: Option<u64>,
    technical_error_threshold: Option<u32>,
    accept_invalid_certs: Option<bool>,
    warn_after_seconds: Option<i64>,
    callout_after_seconds: Option<i64>,
    failure_rate_threshold_percent: Option<f64>,
    /// Comma separated in the environment, an array in TOML.
    watched_response_codes: Option<CodeList>,
    response_code_threshold: Option<u64>,
    sink_bin_workers: Option<usize>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CodeList {
    List(Vec<String>),
    Joined(String),
}

impl CodeList {
    fn into_codes(self) -> Vec<String> {
        match self {
            CodeList::List(codes) => codes,
            CodeList::Joined(joined) => joined
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

fn default_watched_codes() -> Vec<String> {
    vec!["91".to_string(), "68".to_string()]
}

impl MonitorConfig {
    /// Loads `.env`, then the optional TOML file, then the environment on top.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let env_config: PartialMonitorConfig = envy::from_env::<PartialMonitorConfig>()?;
        Self::layer(config_path, env_config)
    }

    fn layer(
        config_path: Option<&str>,
        env_config: PartialMonitorConfig,
    ) -> Result<Self, ConfigError> {
        let file_config = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let contents = fs::read_to_string(path_str).map_err(|source| ConfigError::ReadFile {
                    path: path_str.to_string(),
                    source,
                })?;
                toml::from_str::<PartialMonitorConfig>(&contents).map_err(|source| {
                    ConfigError::ParseFile {
                        path: path_str.to_string(),
                        source,
                    }
                })?
            }
            Some(path_str) => {
                warn!(path = %path_str, "Config file not found, using environment only.");
                PartialMonitorConfig::default()
            }
            None => PartialMonitorConfig::default(),
        };

        let e = env_config;
        let f = file_config;
        Ok(MonitorConfig {
            config_url: e.config_url.or(f.config_url).ok_or(ConfigError::Missing("CONFIG_URL"))?,
            prognosis_username: e
                .prognosis_username
                .or(f.prognosis_username)
                .ok_or(ConfigError::Missing("PROGNOSIS_USERNAME"))?,
            prognosis_password: e
                .prognosis_password
                .or(f.prognosis_password)
                .ok_or(ConfigError::Missing("PROGNOSIS_PASSWORD"))?,
            hal_endpoint: e.hal_endpoint.or(f.hal_endpoint),
            telegram_bot_token: e.telegram_bot_token.or(f.telegram_bot_token),
            error_group: e.error_group.or(f.error_group).unwrap_or(0),
            detector_endpoint: e.detector_endpoint.or(f.detector_endpoint),
            anomaly_threshold: e.anomaly_threshold.or(f.anomaly_threshold).unwrap_or(3.0),
            average_threshold: e.average_threshold.or(f.average_threshold).unwrap_or(5.0),
            metrics_sink_url: e.metrics_sink_url.or(f.metrics_sink_url),
            metrics_sink_user: e.metrics_sink_user.or(f.metrics_sink_user),
            metrics_sink_password: e.metrics_sink_password.or(f.metrics_sink_password),
            database_url: e.database_url.or(f.database_url),
            http_listen: e
                .http_listen
                .or(f.http_listen)
                .unwrap_or_else(|| "0.0.0.0:8001".to_string()),
            log_dir: e.log_dir.or(f.log_dir).unwrap_or_else(|| "logs".to_string()),
            poll_interval_seconds: e.poll_interval_seconds.or(f.poll_interval_seconds).unwrap_or(10),
            login_backoff_seconds: e.login_backoff_seconds.or(f.login_backoff_seconds).unwrap_or(60),
            fetch_attempts: e.fetch_attempts.or(f.fetch_attempts).unwrap_or(10).max(1),
            fetch_retry_delay_ms: e.fetch_retry_delay_ms.or(f.fetch_retry_delay_ms).unwrap_or(1000),
            request_timeout_seconds: e
                .request_timeout_seconds
                .or(f.request_timeout_seconds)
                .unwrap_or(30),
            technical_error_threshold: e
                .technical_error_threshold
                .or(f.technical_error_threshold)
                .unwrap_or(10)
                .max(1),
            accept_invalid_certs: e.accept_invalid_certs.or(f.accept_invalid_certs).unwrap_or(true),
            warn_after_seconds: e.warn_after_seconds.or(f.warn_after_seconds).unwrap_or(30),
            callout_after_seconds: e.callout_after_seconds.or(f.callout_after_seconds).unwrap_or(180),
            failure_rate_threshold_percent: e
                .failure_rate_threshold_percent
                .or(f.failure_rate_threshold_percent)
                .unwrap_or(20.0),
            watched_response_codes: e
                .watched_response_codes
                .or(f.watched_response_codes)
                .map(CodeList::into_codes)
                .unwrap_or_else(default_watched_codes),
            response_code_threshold: e
                .response_code_threshold
                .or(f.response_code_threshold)
                .unwrap_or(6),
            sink_bin_workers: e.sink_bin_workers.or(f.sink_bin_workers).unwrap_or(10).max(1),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn login_backoff(&self) -> Duration {
        Duration::from_secs(self.login_backoff_seconds)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// One configured widget on a dashboard page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(rename = "Type")]
    pub check_type: String,
    #[serde(rename = "DashboardPage", alias = "Dashboard")]
    pub dashboard_page: String,
    #[serde(rename = "WidgetID", alias = "Id")]
    pub widget_id: String,
    #[serde(rename = "DisplayName", alias = "Name", default)]
    pub display_name: String,
    #[serde(rename = "ObjectTypeFilter", alias = "ObjectType", default)]
    pub object_type_filter: String,
    #[serde(rename = "Group", default)]
    pub group: Option<i64>,
}

impl WidgetConfig {
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.widget_id
        } else {
            &self.display_name
        }
    }
}

/// A dashboard replica and the widgets polled while it is active.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub address: String,
    pub widgets: Vec<WidgetConfig>,
}

#[derive(Deserialize)]
struct EnvironmentEntry {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Widgets", alias = "Monitors", default)]
    widgets: Vec<WidgetConfig>,
}

#[derive(Deserialize)]
struct LegacyConfig {
    #[serde(rename = "Address")]
    addresses: Vec<String>,
    #[serde(rename = "Monitors", alias = "Widgets", default)]
    widgets: Vec<WidgetConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteConfig {
    PerEnvironment(Vec<EnvironmentEntry>),
    Legacy(LegacyConfig),
}

/// Parses the remote configuration document into the ordered failover list.
pub fn parse_environments(body: &str) -> Result<Vec<Environment>, ConfigError> {
    let remote: RemoteConfig = serde_json::from_str(body)?;
    let mut environments: Vec<Environment> = match remote {
        RemoteConfig::PerEnvironment(entries) => entries
            .into_iter()
            .map(|entry| Environment {
                address: entry.address,
                widgets: entry.widgets,
            })
            .collect(),
        RemoteConfig::Legacy(legacy) => legacy
            .addresses
            .into_iter()
            .map(|address| Environment {
                address,
                widgets: legacy.widgets.clone(),
            })
            .collect(),
    };

    if environments.is_empty() {
        return Err(ConfigError::NoEnvironments);
    }

    for env in &mut environments {
        env.address = env.address.trim_end_matches('/').to_string();
        for widget in &mut env.widgets {
            if widget.object_type_filter.is_empty() {
                widget.object_type_filter = "#".to_string();
            }
        }
    }
    Ok(environments)
}

/// Fetches the widget configuration once at startup.
pub async fn fetch_remote_config(
    client: &reqwest::Client,
    config_url: &str,
) -> Result<Vec<Environment>, ConfigError> {
    info!(url = %config_url, "Fetching widget configuration.");
    let body = client
        .get(config_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let environments = parse_environments(&body)?;
    info!(
        environments = environments.len(),
        widgets = environments.iter().map(|e| e.widgets.len()).sum::<usize>(),
        "Loaded widget configuration."
    );
    Ok(environments)
}

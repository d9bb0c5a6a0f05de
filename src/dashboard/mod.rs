//! Widget resolution and data retrieval against the active dashboard replica.
use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{MonitorConfig, WidgetConfig};
use crate::session::SessionContext;

pub mod payload;
pub mod resolver;

pub use payload::{parse_widget_payload, payload_key, Row};
pub use resolver::extract_guid;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Dashboard request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Dashboard answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("No guid found for widget {widget_id} on dashboard {page}")]
    Resolution { widget_id: String, page: String },
    #[error("Widget payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No root element {key} in widget payload")]
    MissingRoot { key: String },
    #[error("No Data array under {key} in widget payload")]
    MissingData { key: String },
    #[error("Malformed widget payload: {0}")]
    Malformed(String),
    #[error("No results for widget {widget_id}")]
    NoResults { widget_id: String },
}

impl DashboardError {
    /// The widget simply had no rows yet; not a technical failure.
    pub fn is_no_results(&self) -> bool {
        matches!(self, DashboardError::NoResults { .. })
    }
}

pub struct DashboardClient {
    client: Client,
    attempts: u32,
    retry_delay: Duration,
}

impl DashboardClient {
    pub fn new(client: Client, config: &MonitorConfig) -> Self {
        Self {
            client,
            attempts: config.fetch_attempts.max(1),
            retry_delay: config.fetch_retry_delay(),
        }
    }

    async fn get_text(&self, session: &SessionContext, url: &str) -> Result<String, DashboardError> {
        let response = self
            .client
            .get(url)
            .header(header::COOKIE, session.cookie_header())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DashboardError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Maps a widget's page id to the opaque id its data is served under.
    pub async fn resolve(
        &self,
        session: &SessionContext,
        dashboard_page: &str,
        widget_id: &str,
    ) -> Result<String, DashboardError> {
        let url = format!("{}/Prognosis/Dashboard/Content/{dashboard_page}", session.base_url);
        let markup = self.get_text(session, &url).await?;
        extract_guid(&markup, widget_id).ok_or_else(|| DashboardError::Resolution {
            widget_id: widget_id.to_string(),
            page: dashboard_page.to_string(),
        })
    }

    async fn fetch_once(
        &self,
        session: &SessionContext,
        widget: &WidgetConfig,
    ) -> Result<Vec<Row>, DashboardError> {
        let guid = self
            .resolve(session, &widget.dashboard_page, &widget.widget_id)
            .await?;
        let url = format!("{}/Prognosis/DashboardView/{guid}", session.base_url);
        let body = self.get_text(session, &url).await?;
        parse_widget_payload(&body, &widget.widget_id)
    }

    /// Fetches the widget's rows, retrying every kind of failure while the
    /// dashboard warms up. After the last attempt its error is returned as is,
    /// so an empty table on the final try surfaces as `NoResults`.
    pub async fn fetch(
        &self,
        session: &SessionContext,
        widget: &WidgetConfig,
    ) -> Result<Vec<Row>, DashboardError> {
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.fetch_once(session, widget).await {
                Ok(rows) => {
                    debug!(widget = %widget.widget_id, rows = rows.len(), attempt = attempt, "Widget data fetched.");
                    return Ok(rows);
                }
                Err(e) => {
                    debug!(widget = %widget.widget_id, attempt = attempt, error = %e, "Widget fetch attempt failed.");
                    last_error = Some(e);
                }
            }
        }
        let error = last_error.unwrap_or_else(|| DashboardError::NoResults {
            widget_id: widget.widget_id.clone(),
        });
        warn!(widget = %widget.widget_id, attempts = self.attempts, error = %error, "Giving up on widget for this pass.");
        Err(error)
    }
}

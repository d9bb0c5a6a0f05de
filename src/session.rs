//! Authenticated session against one of the configured dashboard replicas.
use reqwest::{redirect, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Environment, MonitorConfig};
use crate::notifications::{report_error, AlertChannel};
use crate::version;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Login request to {address} failed: {source}")]
    Request {
        address: String,
        source: reqwest::Error,
    },
    #[error("No session cookie on login response from {address}")]
    NoSessionCookie { address: String },
    #[error("All {attempted} environments rejected the login")]
    AllEnvironmentsRejected { attempted: usize },
}

/// Cookies and the replica they were issued by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub environment_index: usize,
    pub base_url: String,
    pub cookies: Vec<(String, String)>,
}

impl SessionContext {
    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Shared client for every outbound call. Redirects are not followed so the
/// login response's cookies stay visible.
pub fn build_http_client(config: &MonitorConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .timeout(config.request_timeout())
        .user_agent(version::user_agent())
        .build()
}

pub struct SessionManager {
    client: Client,
    environments: Arc<Vec<Environment>>,
    username: String,
    password: String,
    backoff: Duration,
    alerts: Arc<dyn AlertChannel>,
}

impl SessionManager {
    pub fn new(
        client: Client,
        environments: Arc<Vec<Environment>>,
        config: &MonitorConfig,
        alerts: Arc<dyn AlertChannel>,
    ) -> Self {
        Self {
            client,
            environments,
            username: config.prognosis_username.clone(),
            password: config.prognosis_password.clone(),
            backoff: config.login_backoff(),
            alerts,
        }
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    /// Logs in, walking the environments in order and backing off between
    /// full passes. Only returns once a replica has accepted the credentials.
    pub async fn login(&self) -> SessionContext {
        loop {
            match self.login_pass().await {
                Ok(session) => return session,
                Err(e) => {
                    warn!(error = %e, backoff_secs = self.backoff.as_secs(), "Login pass failed.");
                    report_error(
                        self.alerts.as_ref(),
                        &format!(
                            "Unable to successfully log into prognosis... will try again in {} seconds",
                            self.backoff.as_secs()
                        ),
                    )
                    .await;
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    /// One pass over every environment. The first replica to hand out a
    /// session cookie wins.
    pub async fn login_pass(&self) -> Result<SessionContext, SessionError> {
        for (index, environment) in self.environments.iter().enumerate() {
            match self.try_environment(&environment.address).await {
                Ok(cookies) => {
                    info!(
                        environment = index,
                        address = %environment.address,
                        "Logged into dashboard."
                    );
                    return Ok(SessionContext {
                        environment_index: index,
                        base_url: environment.address.clone(),
                        cookies,
                    });
                }
                Err(e) => {
                    warn!(environment = index, error = %e, "Login attempt rejected.");
                    report_error(self.alerts.as_ref(), &format!("prognosis error - {e}")).await;
                }
            }
        }
        Err(SessionError::AllEnvironmentsRejected {
            attempted: self.environments.len(),
        })
    }

    async fn try_environment(&self, address: &str) -> Result<Vec<(String, String)>, SessionError> {
        let url = format!("{address}/Prognosis/Login?returnUrl=/Prognosis/");
        let form = [
            ("UserName", self.username.as_str()),
            ("Password", self.password.as_str()),
            ("Destination", "View Systems"),
        ];
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| SessionError::Request {
                address: address.to_string(),
                source,
            })?;

        let cookies: Vec<(String, String)> = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        if cookies.is_empty() {
            return Err(SessionError::NoSessionCookie {
                address: address.to_string(),
            });
        }
        Ok(cookies)
    }
}

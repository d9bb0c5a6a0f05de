//! The polling loop: log in, walk the active environment's widgets, feed the
//! results through escalation, sleep, repeat.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{MonitorConfig, WidgetConfig};
use crate::dashboard::DashboardClient;
use crate::escalation::EscalationService;
use crate::monitors::CheckDispatcher;
use crate::notifications::{report_error, AlertChannel};
use crate::session::{SessionContext, SessionManager};

/// Escalation key of one result: the widget id, plus `:<key>` for checks that
/// report several sub-entities.
pub fn pair_key(widget_id: &str, result_key: &str) -> String {
    if result_key.is_empty() {
        widget_id.to_string()
    } else {
        format!("{widget_id}:{result_key}")
    }
}

/// State owned by the loop between passes.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub session: SessionContext,
    pub technical_errors: u32,
}

pub struct MonitorService {
    sessions: SessionManager,
    dashboard: DashboardClient,
    dispatcher: Arc<CheckDispatcher>,
    escalation: EscalationService,
    alerts: Arc<dyn AlertChannel>,
    poll_interval: Duration,
    technical_error_threshold: u32,
    default_group: i64,
    shutdown_rx: watch::Receiver<()>,
}

impl MonitorService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: SessionManager,
        dashboard: DashboardClient,
        dispatcher: Arc<CheckDispatcher>,
        escalation: EscalationService,
        alerts: Arc<dyn AlertChannel>,
        config: &MonitorConfig,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            sessions,
            dashboard,
            dispatcher,
            escalation,
            alerts,
            poll_interval: config.poll_interval(),
            technical_error_threshold: config.technical_error_threshold.max(1),
            default_group: config.error_group,
            shutdown_rx,
        }
    }

    fn shutdown_requested(&self) -> bool {
        // A dropped sender counts as a shutdown too.
        self.shutdown_rx.has_changed().unwrap_or(true)
    }

    /// Logs in, giving up only when shutdown is signalled.
    pub async fn login(&mut self) -> Option<SessionContext> {
        tokio::select! {
            session = self.sessions.login() => Some(session),
            _ = self.shutdown_rx.changed() => {
                info!("Shutdown requested during login.");
                None
            }
        }
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Monitor loop starting.");
        let Some(session) = self.login().await else {
            return;
        };
        let mut state = LoopState {
            session,
            technical_errors: 0,
        };

        loop {
            if !self.run_pass(&mut state).await {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = self.shutdown_rx.changed() => break,
            }
        }
        info!("Monitor loop stopped.");
    }

    /// One sweep over the active environment's widgets. Returns `false` when
    /// shutdown interrupted it.
    pub async fn run_pass(&mut self, state: &mut LoopState) -> bool {
        let widgets: Vec<WidgetConfig> = self
            .sessions
            .environments()
            .get(state.session.environment_index)
            .map(|env| env.widgets.clone())
            .unwrap_or_default();

        for widget in &widgets {
            if self.shutdown_requested() {
                return false;
            }
            let span = info_span!("widget", widget = %widget.widget_id, check = %widget.check_type);
            self.process_widget(state, widget).instrument(span).await;

            if state.technical_errors >= self.technical_error_threshold {
                let message = format!(
                    "{} failures detected. Attempting login to find a new host",
                    state.technical_errors
                );
                warn!(errors = state.technical_errors, "Technical error threshold reached, logging in again.");
                report_error(self.alerts.as_ref(), &message).await;
                match self.login().await {
                    Some(session) => state.session = session,
                    None => return false,
                }
                state.technical_errors = 0;
                // The new replica may carry a different widget list.
                return true;
            }
        }
        true
    }

    async fn process_widget(&self, state: &mut LoopState, widget: &WidgetConfig) {
        let rows = match self.dashboard.fetch(&state.session, widget).await {
            Ok(rows) => {
                state.technical_errors = 0;
                rows
            }
            Err(e) if e.is_no_results() => {
                info!(error = %e, "Widget has no results.");
                return;
            }
            Err(e) => {
                state.technical_errors += 1;
                warn!(error = %e, technical_errors = state.technical_errors, "Widget fetch failed.");
                report_error(
                    self.alerts.as_ref(),
                    &format!("Unable to read {} on dashboard {}: {e}", widget.label(), widget.dashboard_page),
                )
                .await;
                return;
            }
        };

        let results = match self.dispatcher.dispatch(&widget.check_type, &rows).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Check failed.");
                report_error(
                    self.alerts.as_ref(),
                    &format!("Check {} failed for {}: {e}", widget.check_type, widget.label()),
                )
                .await;
                return;
            }
        };

        let group = widget.group.unwrap_or(self.default_group);
        for result in &results {
            let pair_key = pair_key(&widget.widget_id, &result.key);
            info!(pair_key = %pair_key, failed = result.failed, message = %result.message, "Check result.");
            self.escalation.observe(&pair_key, group, result).await;
        }
    }
}

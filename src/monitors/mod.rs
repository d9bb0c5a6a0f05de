//! Health checks run over widget rows, and the registry that routes to them.
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::anomaly::AnomalyDetector;
use crate::config::{ConfigError, Environment, MonitorConfig};
use crate::metrics_sink::MetricsSink;
use crate::store::{StoreError, Stores};

pub mod failure_rate;
pub mod response_code;
pub mod sink_bin;
pub mod source_sink;

pub use crate::dashboard::Row;
pub use failure_rate::FailureRateCheck;
pub use response_code::ResponseCodeCheck;
pub use sink_bin::SinkBinCheck;
pub use source_sink::SourceSinkCheck;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("No check registered under '{0}'")]
    UnknownCheck(String),
    #[error("Check worker failed: {0}")]
    Worker(String),
}

/// Outcome for one sub-entity of a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub key: String,
    pub failed: bool,
    pub message: String,
}

impl CheckResult {
    pub fn pass(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            failed: false,
            message: String::new(),
        }
    }

    pub fn fail(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            failed: true,
            message: message.into(),
        }
    }
}

/// The closed set of check implementations.
pub enum Check {
    FailureRate(FailureRateCheck),
    ResponseCode(ResponseCodeCheck),
    SourceSink(SourceSinkCheck),
    SinkBin(SinkBinCheck),
}

impl Check {
    pub async fn run(&self, rows: &[Row]) -> Result<Vec<CheckResult>, CheckError> {
        match self {
            Check::FailureRate(check) => check.check(rows).await,
            Check::ResponseCode(check) => check.check(rows).await,
            Check::SourceSink(check) => check.check(rows).await,
            Check::SinkBin(check) => check.check(rows).await,
        }
    }
}

pub struct CheckDispatcher {
    checks: HashMap<String, Arc<Check>>,
}

impl CheckDispatcher {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, check: Arc<Check>) {
        self.checks.insert(name.to_string(), check);
    }

    /// Registers every built-in check under its configuration name.
    pub fn from_config(
        config: &MonitorConfig,
        stores: &Stores,
        anomaly: Arc<dyn AnomalyDetector>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(
            "FailureRate",
            Arc::new(Check::FailureRate(FailureRateCheck::new(
                stores.telemetry.clone(),
                config.failure_rate_threshold_percent,
            ))),
        );

        let codes = Arc::new(Check::ResponseCode(ResponseCodeCheck::new(
            stores.telemetry.clone(),
            config.watched_response_codes.clone(),
            config.response_code_threshold,
        )));
        dispatcher.register("Code91", codes.clone());
        dispatcher.register("ResponseCode", codes);

        dispatcher.register(
            "SourceSink",
            Arc::new(Check::SourceSink(SourceSinkCheck::new(
                stores.source_sink.clone(),
                anomaly.clone(),
                sink.clone(),
            ))),
        );
        dispatcher.register(
            "SinkBin",
            Arc::new(Check::SinkBin(SinkBinCheck::new(
                anomaly,
                sink,
                config.sink_bin_workers,
            ))),
        );
        info!(checks = dispatcher.checks.len(), "Check registry ready.");
        dispatcher
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Rejects configurations naming a check that does not exist.
    pub fn validate(&self, environments: &[Environment]) -> Result<(), ConfigError> {
        for widget in environments.iter().flat_map(|e| e.widgets.iter()) {
            if !self.is_registered(&widget.check_type) {
                return Err(ConfigError::UnknownCheck {
                    widget_id: widget.widget_id.clone(),
                    check_type: widget.check_type.clone(),
                });
            }
        }
        Ok(())
    }

    pub async fn dispatch(
        &self,
        check_name: &str,
        rows: &[Row],
    ) -> Result<Vec<CheckResult>, CheckError> {
        let check = self
            .checks
            .get(check_name)
            .ok_or_else(|| CheckError::UnknownCheck(check_name.to_string()))?;
        check.run(rows).await
    }
}

impl Default for CheckDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WidgetConfig;
    use crate::metrics_sink::DisabledMetricsSink;
    use crate::anomaly::DisabledAnomalyDetector;
    use crate::store::MemoryStore;
    use crate::testing::test_config;

    fn dispatcher() -> CheckDispatcher {
        CheckDispatcher::from_config(
            &test_config(),
            &Stores::from_shared(Arc::new(MemoryStore::new())),
            Arc::new(DisabledAnomalyDetector),
            Arc::new(DisabledMetricsSink),
        )
    }

    fn environment_with(check_type: &str) -> Environment {
        Environment {
            address: "http://prog".to_string(),
            widgets: vec![WidgetConfig {
                check_type: check_type.to_string(),
                dashboard_page: "Page".to_string(),
                widget_id: "id_w".to_string(),
                display_name: String::new(),
                object_type_filter: "#".to_string(),
                group: None,
            }],
        }
    }

    #[test]
    fn all_built_in_names_are_registered() {
        let dispatcher = dispatcher();
        for name in ["FailureRate", "Code91", "ResponseCode", "SourceSink", "SinkBin"] {
            assert!(dispatcher.is_registered(name), "{name} missing");
        }
    }

    #[test]
    fn validation_rejects_unknown_check_types() {
        let dispatcher = dispatcher();
        assert!(dispatcher.validate(&[environment_with("Code91")]).is_ok());
        let err = dispatcher
            .validate(&[environment_with("Latency")])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownCheck { ref check_type, .. } if check_type == "Latency"
        ));
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let dispatcher = dispatcher();
        let rows = vec![vec![
            "10:00".to_string(),
            "x".to_string(),
            "0".to_string(),
            "Failed".to_string(),
        ]];
        let results = dispatcher.dispatch("FailureRate", &rows).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].failed);

        let err = dispatcher.dispatch("Nope", &rows).await.unwrap_err();
        assert!(matches!(err, CheckError::UnknownCheck(_)));
    }
}

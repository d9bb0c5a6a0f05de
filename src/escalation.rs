//! Per pair key failure tracking: when to warn, when to page, when to
//! declare recovery.
//!
//! States: healthy → failing (unwarned) → warned → paged → healthy. The
//! record is zeroed on recovery, never removed.
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::monitors::CheckResult;
use crate::notifications::{notify, report_error, AlertChannel, CalloutChannel, NotificationError};
use crate::store::{EscalationStore, StoreError};

/// What one observation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub count: i32,
    pub warned: bool,
    pub called_out: bool,
    pub recovered: bool,
}

pub struct EscalationService {
    store: Arc<dyn EscalationStore>,
    alerts: Arc<dyn AlertChannel>,
    callouts: Arc<dyn CalloutChannel>,
    warn_after: Duration,
    callout_after: Duration,
}

/// `3m12s` style rendering of an elapsed duration.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}

impl EscalationService {
    pub fn new(
        store: Arc<dyn EscalationStore>,
        alerts: Arc<dyn AlertChannel>,
        callouts: Arc<dyn CalloutChannel>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            store,
            alerts,
            callouts,
            warn_after: Duration::seconds(config.warn_after_seconds),
            callout_after: Duration::seconds(config.callout_after_seconds),
        }
    }

    pub async fn observe(&self, pair_key: &str, group: i64, result: &CheckResult) -> Observation {
        self.observe_at(pair_key, group, result, Utc::now()).await
    }

    pub async fn observe_at(
        &self,
        pair_key: &str,
        group: i64,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> Observation {
        if result.failed {
            self.on_failure(pair_key, group, &result.message, now).await
        } else {
            self.on_success(pair_key, group, now).await
        }
    }

    async fn store_failed(&self, pair_key: &str, e: StoreError) {
        error!(pair_key = %pair_key, error = %e, "Escalation store operation failed.");
        report_error(self.alerts.as_ref(), &format!("Escalation store error for {pair_key}: {e}")).await;
    }

    async fn on_success(&self, pair_key: &str, group: i64, now: DateTime<Utc>) -> Observation {
        let (count, first_failure) = match self.store.get_count(pair_key).await {
            Ok(state) => state,
            Err(e) => {
                self.store_failed(pair_key, e).await;
                return Observation::default();
            }
        };
        let message_sent = match self.store.is_message_sent(pair_key).await {
            Ok(sent) => sent,
            Err(e) => {
                self.store_failed(pair_key, e).await;
                false
            }
        };
        if count == 0 && !message_sent {
            return Observation::default();
        }

        if message_sent {
            let elapsed = first_failure.map(|t| now - t).unwrap_or_else(Duration::zero);
            info!(pair_key = %pair_key, elapsed = %format_duration(elapsed), "Recovered.");
            notify(
                self.alerts.as_ref(),
                group,
                &format!(
                    "✅ No issues detected. Errors occurred for {}",
                    format_duration(elapsed)
                ),
            )
            .await;
        }
        if let Err(e) = self.store.zero_count(pair_key).await {
            self.store_failed(pair_key, e).await;
        }
        Observation {
            recovered: message_sent,
            ..Default::default()
        }
    }

    async fn on_failure(
        &self,
        pair_key: &str,
        group: i64,
        message: &str,
        now: DateTime<Utc>,
    ) -> Observation {
        if let Err(e) = self.store.increase_count(pair_key, now).await {
            self.store_failed(pair_key, e).await;
        }
        let (count, first_failure) = match self.store.get_count(pair_key).await {
            Ok(state) => state,
            Err(e) => {
                self.store_failed(pair_key, e).await;
                return Observation::default();
            }
        };
        let elapsed = first_failure.map(|t| now - t).unwrap_or_else(Duration::zero);
        info!(pair_key = %pair_key, count = count, elapsed = %format_duration(elapsed), "Failure observed.");
        let mut observation = Observation {
            count,
            ..Default::default()
        };

        let mut message_sent = match self.store.is_message_sent(pair_key).await {
            Ok(sent) => sent,
            Err(e) => {
                self.store_failed(pair_key, e).await;
                return observation;
            }
        };

        if elapsed > self.warn_after && !message_sent {
            warn!(pair_key = %pair_key, "Sending warning.");
            notify(
                self.alerts.as_ref(),
                group,
                &format!(
                    "❌ {message}. Error has been occurring for {}.",
                    format_duration(elapsed)
                ),
            )
            .await;
            if let Err(e) = self.store.set_message_sent(pair_key).await {
                self.store_failed(pair_key, e).await;
            }
            message_sent = true;
            observation.warned = true;
        }

        if elapsed > self.callout_after && message_sent {
            let invoked = match self.store.is_callout_invoked(pair_key).await {
                Ok(invoked) => invoked,
                Err(e) => {
                    self.store_failed(pair_key, e).await;
                    return observation;
                }
            };
            if !invoked {
                observation.called_out = self.invoke_callout(pair_key, group, message).await;
            }
        }
        observation
    }

    async fn invoke_callout(&self, pair_key: &str, group: i64, message: &str) -> bool {
        warn!(pair_key = %pair_key, group = group, "Invoking callout.");
        match self
            .callouts
            .invoke_callout(group, message, &format!("Prognosis Issue Detected. {message}"))
            .await
        {
            Ok(()) => {}
            // Nothing to page through; mark it so the episode does not retry every pass.
            Err(NotificationError::CalloutUnavailable) => {
                warn!(pair_key = %pair_key, "No callout channel configured.");
            }
            Err(e) => {
                error!(pair_key = %pair_key, error = %e, "Callout failed, will retry next pass.");
                report_error(self.alerts.as_ref(), &format!("Callout for {pair_key} failed: {e}")).await;
                return false;
            }
        }
        if let Err(e) = self.store.set_callout_invoked(pair_key).await {
            self.store_failed(pair_key, e).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{test_config, RecordingAlerts, RecordingCallouts};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct Harness {
        store: Arc<MemoryStore>,
        alerts: Arc<RecordingAlerts>,
        callouts: Arc<RecordingCallouts>,
        service: EscalationService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let callouts = Arc::new(RecordingCallouts::default());
        let service = EscalationService::new(store.clone(), alerts.clone(), callouts.clone(), &test_config());
        Harness {
            store,
            alerts,
            callouts,
            service,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap()
    }

    fn failing() -> CheckResult {
        CheckResult::fail("", "Rate too high")
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::seconds(45)), "45s");
        assert_eq!(format_duration(Duration::seconds(192)), "3m12s");
        assert_eq!(format_duration(Duration::seconds(3723)), "1h2m3s");
    }

    #[tokio::test]
    async fn count_grows_by_one_and_first_failure_is_stamped_once() {
        let h = harness();
        for i in 0..4 {
            let obs = h
                .service
                .observe_at("w", 1, &failing(), t0() + Duration::seconds(10 * i))
                .await;
            assert_eq!(obs.count, i as i32 + 1);
        }
        assert_eq!(h.store.get_count("w").await.unwrap(), (4, Some(t0())));
    }

    #[tokio::test]
    async fn warning_fires_once_after_the_debounce() {
        let h = harness();
        let first = h.service.observe_at("w", 7, &failing(), t0()).await;
        assert!(!first.warned);
        let at_threshold = h.service.observe_at("w", 7, &failing(), t0() + Duration::seconds(30)).await;
        assert!(!at_threshold.warned);
        let after = h.service.observe_at("w", 7, &failing(), t0() + Duration::seconds(31)).await;
        assert!(after.warned);
        let later = h.service.observe_at("w", 7, &failing(), t0() + Duration::seconds(60)).await;
        assert!(!later.warned);

        let texts = h.alerts.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0], (7, "❌ Rate too high. Error has been occurring for 31s.".to_string()));
        assert!(h.callouts.calls().is_empty());
    }

    #[tokio::test]
    async fn callout_fires_once_after_three_minutes_and_after_the_warning() {
        let h = harness();
        h.service.observe_at("w", 7, &failing(), t0()).await;
        let late = h.service.observe_at("w", 7, &failing(), t0() + Duration::seconds(200)).await;
        assert!(late.warned && late.called_out);
        let again = h.service.observe_at("w", 7, &failing(), t0() + Duration::seconds(400)).await;
        assert!(!again.called_out);

        let calls = h.callouts.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (7, "Rate too high".to_string(), "Prognosis Issue Detected. Rate too high".to_string())
        );
        // The warning went out before the callout.
        assert_eq!(h.alerts.texts().len(), 1);
    }

    #[tokio::test]
    async fn recovery_messages_only_warned_episodes_and_resets() {
        let h = harness();
        h.service.observe_at("quiet", 1, &failing(), t0()).await;
        let quiet = h.service.observe_at("quiet", 1, &CheckResult::pass(""), t0() + Duration::seconds(10)).await;
        assert!(!quiet.recovered);
        assert!(h.alerts.texts().is_empty());
        assert_eq!(h.store.get_count("quiet").await.unwrap(), (0, None));

        h.service.observe_at("loud", 2, &failing(), t0()).await;
        h.service.observe_at("loud", 2, &failing(), t0() + Duration::seconds(200)).await;
        let recovered = h.service.observe_at("loud", 2, &CheckResult::pass(""), t0() + Duration::seconds(250)).await;
        assert!(recovered.recovered);
        let healthy = h.service.observe_at("loud", 2, &CheckResult::pass(""), t0() + Duration::seconds(260)).await;
        assert!(!healthy.recovered);

        let texts = h.alerts.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1], (2, "✅ No issues detected. Errors occurred for 4m10s".to_string()));
        assert_eq!(h.store.record("loud"), Some(Default::default()));

        // A new episode warns again.
        h.service.observe_at("loud", 2, &failing(), t0() + Duration::seconds(300)).await;
        let rewarn = h.service.observe_at("loud", 2, &failing(), t0() + Duration::seconds(340)).await;
        assert!(rewarn.warned);
    }

    struct BrokenStore;

    #[async_trait]
    impl EscalationStore for BrokenStore {
        async fn increase_count(&self, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn zero_count(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn get_count(&self, _: &str) -> Result<(i32, Option<DateTime<Utc>>), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn is_message_sent(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_message_sent(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn is_callout_invoked(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_callout_invoked(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_errors_are_reported_not_raised() {
        let alerts = Arc::new(RecordingAlerts::default());
        let service = EscalationService::new(
            Arc::new(BrokenStore),
            alerts.clone(),
            Arc::new(RecordingCallouts::default()),
            &test_config(),
        );
        let obs = service.observe_at("w", 1, &failing(), t0()).await;
        assert_eq!(obs, Observation::default());
        service.observe_at("w", 1, &CheckResult::pass(""), t0()).await;
        assert!(!alerts.errors().is_empty());
        assert!(alerts.errors()[0].contains("down"));
    }
}

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{CheckError, CheckResult, Row};
use crate::store::{RateData, TelemetryStore};

#[derive(Default)]
struct PeriodTally {
    data: RateData,
    failed_rows: usize,
}

/// Compares failed to approved transactions for the most recent period.
pub struct FailureRateCheck {
    store: Arc<dyn TelemetryStore>,
    threshold_percent: f64,
}

impl FailureRateCheck {
    pub fn new(store: Arc<dyn TelemetryStore>, threshold_percent: f64) -> Self {
        Self {
            store,
            threshold_percent,
        }
    }

    /// Rows are `[period, _, count, label]`.
    pub async fn check(&self, rows: &[Row]) -> Result<Vec<CheckResult>, CheckError> {
        let mut periods: BTreeMap<&str, PeriodTally> = BTreeMap::new();
        for row in rows {
            if row.len() < 4 {
                warn!(row = ?row, "Skipping short failure rate row.");
                continue;
            }
            let count: i64 = row[2].trim().parse().unwrap_or(0);
            let tally = periods.entry(row[0].as_str()).or_default();
            match row[3].as_str() {
                "Approved" => tally.data.approved += count,
                "Declined" => tally.data.declined += count,
                "Failed" => {
                    tally.data.failed += count;
                    tally.failed_rows += 1;
                }
                _ => {}
            }
        }

        let Some((period, tally)) = periods.into_iter().next_back() else {
            return Ok(vec![CheckResult::pass("")]);
        };
        let data = tally.data;
        info!(
            period = %period,
            approved = data.approved,
            declined = data.declined,
            failed = data.failed,
            "Evaluated failure rate."
        );
        self.store.save_rate_data(data, Utc::now()).await?;

        if data.approved == 0 {
            // A reported Failed line with nothing approved is an outage even at zero.
            if data.failed > 0 || tally.failed_rows > 0 {
                return Ok(vec![CheckResult::fail(
                    "",
                    format!(
                        "No successful transactions found, only failed transactions ({})",
                        data.failed
                    ),
                )]);
            }
            return Ok(vec![CheckResult::pass("")]);
        }

        let percent = data.failed as f64 / data.approved as f64 * 100.0;
        if percent > self.threshold_percent {
            return Ok(vec![CheckResult::fail(
                "",
                format!(
                    "There is a high number of failed transactions ({}) when compared to successful transactions ({})",
                    data.failed, data.approved
                ),
            )]);
        }
        Ok(vec![CheckResult::pass("")])
    }
}

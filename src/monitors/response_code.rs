use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::{CheckError, CheckResult, Row};
use crate::store::TelemetryStore;

const CODE_COLUMN: usize = 4;

/// Counts the rows carrying each watched response code.
pub struct ResponseCodeCheck {
    store: Arc<dyn TelemetryStore>,
    watched: Vec<String>,
    threshold: u64,
}

impl ResponseCodeCheck {
    pub fn new(store: Arc<dyn TelemetryStore>, watched: Vec<String>, threshold: u64) -> Self {
        Self {
            store,
            watched,
            threshold,
        }
    }

    pub async fn check(&self, rows: &[Row]) -> Result<Vec<CheckResult>, CheckError> {
        let mut codes = Vec::with_capacity(rows.len());
        let mut totals = vec![0u64; self.watched.len()];
        for row in rows {
            let Some(code) = row.get(CODE_COLUMN) else {
                warn!(row = ?row, "Skipping response code row without a code column.");
                continue;
            };
            codes.push(code.clone());
            if let Some(slot) = self.watched.iter().position(|w| w == code) {
                totals[slot] += 1;
            }
        }
        self.store.save_response_code_data(&codes, Utc::now()).await?;

        Ok(self
            .watched
            .iter()
            .zip(totals)
            .map(|(code, total)| {
                if total >= self.threshold {
                    info!(code = %code, total = total, "Watched response code over threshold.");
                    CheckResult::fail(code.as_str(), format!("{total} instances of Code {code} found"))
                } else {
                    CheckResult::pass(code.as_str())
                }
            })
            .collect())
    }
}

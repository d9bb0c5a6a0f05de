use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CheckError, CheckResult, Row};
use crate::anomaly::AnomalyDetector;
use crate::metrics_sink::{LinePoint, MetricsSink};
use crate::store::{NodeHours, NodeMax, SourceSinkStore};

const CONNECTED: &str = "Connected";
const ALWAYS: &str = "24 X 7";
const CRITICAL: &str = "Critical";

/// Node connectivity against business hours, and connection capacity.
pub struct SourceSinkCheck {
    store: Arc<dyn SourceSinkStore>,
    anomaly: Arc<dyn AnomalyDetector>,
    sink: Arc<dyn MetricsSink>,
}

/// Upper-cased with digits removed, so `node01a` and `NODEA` compare equal.
pub fn normalize_node_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .trim()
        .to_uppercase()
}

/// Parses `HHhMM-HHhMM`.
fn parse_window(window: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = window.trim().split_once('-')?;
    let parse = |t: &str| NaiveTime::parse_from_str(&t.trim().to_lowercase(), "%Hh%M").ok();
    Some((parse(start)?, parse(end)?))
}

fn in_window(window: &str, at: NaiveTime) -> bool {
    match parse_window(window) {
        Some((start, end)) if start <= end => start <= at && at < end,
        // Wraps past midnight.
        Some((start, end)) => at >= start || at < end,
        None => false,
    }
}

fn is_critical_impact(impact: &str) -> bool {
    impact.trim().eq_ignore_ascii_case(CRITICAL)
}

/// Whether a node outage matters at `now` (local time).
pub fn is_critical_now(hours: &NodeHours, now: NaiveDateTime) -> bool {
    let business = hours.business_hours.trim().to_uppercase();
    if business == ALWAYS {
        return is_critical_impact(&hours.business_hours_impact);
    }
    let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    if weekday && in_window(&business, now.time()) && is_critical_impact(&hours.business_hours_impact)
    {
        return true;
    }
    in_window(&hours.after_hours, now.time()) && is_critical_impact(&hours.after_hours_impact)
}

fn find_hours<'a>(hours: &'a [NodeHours], node: &str) -> Option<&'a NodeHours> {
    let wanted = normalize_node_name(node);
    if wanted.is_empty() {
        return None;
    }
    hours.iter().find(|h| {
        let known = normalize_node_name(&h.node_name);
        !known.is_empty() && (wanted.contains(&known) || known.contains(&wanted))
    })
}

impl SourceSinkCheck {
    pub fn new(
        store: Arc<dyn SourceSinkStore>,
        anomaly: Arc<dyn AnomalyDetector>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            anomaly,
            sink,
        }
    }

    /// Rows are `[node, status, connections, ...]`.
    pub async fn check(&self, rows: &[Row]) -> Result<Vec<CheckResult>, CheckError> {
        self.check_at(rows, Utc::now(), Local::now().naive_local()).await
    }

    pub async fn check_at(
        &self,
        rows: &[Row],
        now: DateTime<Utc>,
        local: NaiveDateTime,
    ) -> Result<Vec<CheckResult>, CheckError> {
        let hours = self.store.node_hours().await?;
        let ceilings = self.store.node_max().await?;
        let mut results = Vec::new();

        for row in rows {
            let (Some(node), Some(status)) = (row.first(), row.get(1)) else {
                warn!(row = ?row, "Skipping source/sink row without node and status.");
                continue;
            };
            results.push(self.connectivity(node, status, &hours, local));

            let ceiling = ceilings
                .iter()
                .find(|m| m.node_name.eq_ignore_ascii_case(node));
            if let Some(ceiling) = ceiling {
                match row.get(2).and_then(|c| c.trim().parse::<i64>().ok()) {
                    Some(connections) => {
                        results.push(self.capacity(node, connections, ceiling, now).await?)
                    }
                    None => warn!(node = %node, row = ?row, "Unparseable connection count."),
                }
            }
        }
        Ok(results)
    }

    fn connectivity(
        &self,
        node: &str,
        status: &str,
        hours: &[NodeHours],
        local: NaiveDateTime,
    ) -> CheckResult {
        let key = format!("{node}:connectivity");
        if status == CONNECTED {
            return CheckResult::pass(key);
        }
        match find_hours(hours, node) {
            None => CheckResult::fail(
                key,
                format!("Node {node} is {status} and has no business hours record, treating it as critical"),
            ),
            Some(h) if is_critical_now(h, local) => CheckResult::fail(
                key,
                format!("Node {node} is {status} during its critical hours"),
            ),
            Some(_) => {
                info!(node = %node, status = %status, "Node down outside its critical hours.");
                CheckResult::pass(key)
            }
        }
    }

    async fn capacity(
        &self,
        node: &str,
        connections: i64,
        ceiling: &NodeMax,
        now: DateTime<Utc>,
    ) -> Result<CheckResult, CheckError> {
        let key = format!("{node}:capacity");
        let average = self.store.average_connection_count(node, now).await?;
        self.store.save_connection_count(node, connections, now).await?;

        let point = LinePoint::new("source_sink_connections")
            .tag("node", node)
            .field("connections", connections as f64);
        if let Err(e) = self.sink.write(&[point]).await {
            warn!(node = %node, error = %e, "Failed to write connection count.");
        }

        let verdict = match self
            .anomaly
            .analyse(&format!("connections-{node}"), connections as f64)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(node = %node, error = %e, "Connection anomaly analysis failed.");
                Default::default()
            }
        };

        let baseline = average.filter(|avg| *avg > 0.0 && connections as f64 / *avg > 2.0);
        debug!(node = %node, connections = connections, average = ?average, anomaly = verdict.is_anomaly, "Capacity evaluated.");

        let mut problems = Vec::new();
        if let Some(avg) = baseline {
            problems.push(format!(
                "Normally at this time I expect node {node} to have {avg:.1} connections. Currently there are {connections} connections."
            ));
        }
        if connections > ceiling.max_connections {
            problems.push(format!(
                "Node {node} has {connections} connections, above its maximum of {}.",
                ceiling.max_connections
            ));
        }
        if verdict.is_anomaly {
            problems.push(format!(
                "Unusual connection count on node {node}. {}",
                verdict.explanation
            ));
        }
        if !problems.is_empty() {
            info!(node = %node, connections = connections, "Connection count out of bounds.");
            return Ok(CheckResult::fail(key, problems.join(" ")));
        }
        Ok(CheckResult::pass(key))
    }
}

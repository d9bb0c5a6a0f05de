use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{CheckError, CheckResult, Row};
use crate::anomaly::AnomalyDetector;
use crate::metrics_sink::{LinePoint, MetricsSink};

/// Per-entity anomaly analysis of volume and failures, spread over a
/// bounded pool of workers.
pub struct SinkBinCheck {
    anomaly: Arc<dyn AnomalyDetector>,
    sink: Arc<dyn MetricsSink>,
    workers: usize,
}

#[derive(Debug)]
struct BinJob {
    entity: String,
    volume: String,
    failures: String,
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

async fn evaluate(anomaly: &dyn AnomalyDetector, sink: &dyn MetricsSink, job: BinJob) -> CheckResult {
    let entity = job.entity;
    let (Some(volume), Some(failures)) = (parse_finite(&job.volume), parse_finite(&job.failures)) else {
        warn!(bin = %entity, volume = %job.volume, failures = %job.failures, "Unparseable sink bin values.");
        return CheckResult::pass(entity);
    };

    let point = LinePoint::new("sink_bin")
        .tag("bin", &entity)
        .field("volume", volume)
        .field("failures", failures);
    if let Err(e) = sink.write(&[point]).await {
        warn!(bin = %entity, error = %e, "Failed to write sink bin metrics.");
    }

    let volume_verdict = anomaly.analyse(&format!("{entity}-volume"), volume).await;
    let failures_verdict = anomaly.analyse(&format!("{entity}-failures"), failures).await;
    match (volume_verdict, failures_verdict) {
        (Ok(volume_verdict), Ok(failures_verdict)) => {
            let mut problems = Vec::new();
            if volume_verdict.is_anomaly {
                problems.push(format!("Volume anomaly for bin {entity}. {}", volume_verdict.explanation));
            }
            if failures_verdict.is_anomaly {
                problems.push(format!("Failure anomaly for bin {entity}. {}", failures_verdict.explanation));
            }
            if problems.is_empty() {
                CheckResult::pass(entity)
            } else {
                CheckResult::fail(entity, problems.join(" "))
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(bin = %entity, error = %e, "Sink bin analysis failed.");
            CheckResult::pass(entity)
        }
    }
}

impl SinkBinCheck {
    pub fn new(anomaly: Arc<dyn AnomalyDetector>, sink: Arc<dyn MetricsSink>, workers: usize) -> Self {
        Self {
            anomaly,
            sink,
            workers: workers.max(1),
        }
    }

    /// Rows are `[entity, volume, failures]`. Every job yields exactly one result.
    pub async fn check(&self, rows: &[Row]) -> Result<Vec<CheckResult>, CheckError> {
        let jobs: Vec<BinJob> = rows
            .iter()
            .filter_map(|row| match row.as_slice() {
                [entity, volume, failures, ..] => Some(BinJob {
                    entity: entity.clone(),
                    volume: volume.clone(),
                    failures: failures.clone(),
                }),
                _ => {
                    warn!(row = ?row, "Skipping short sink bin row.");
                    None
                }
            })
            .collect();
        let expected = jobs.len();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = mpsc::channel::<BinJob>(expected);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<CheckResult>(expected);

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers.min(expected) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let anomaly = self.anomaly.clone();
            let sink = self.sink.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let result = evaluate(anomaly.as_ref(), sink.as_ref(), job).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
                debug!(worker = worker, "Sink bin worker finished.");
            }));
        }
        drop(result_tx);

        for job in jobs {
            job_tx
                .send(job)
                .await
                .map_err(|_| CheckError::Worker("sink bin job queue closed".to_string()))?;
        }
        drop(job_tx);

        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            match result_rx.recv().await {
                Some(result) => results.push(result),
                None => break,
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sink bin worker panicked.");
            }
        }
        if results.len() != expected {
            return Err(CheckError::Worker(format!(
                "expected {expected} sink bin results, got {}",
                results.len()
            )));
        }
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedDetector};
    use std::collections::BTreeSet;

    fn rows(entities: &[&str]) -> Vec<Row> {
        entities
            .iter()
            .map(|e| vec![e.to_string(), "100".to_string(), "2".to_string()])
            .collect()
    }

    #[tokio::test]
    async fn every_job_yields_exactly_one_result() {
        let entities = ["4000", "4111", "5200", "5500", "6011", "3700", "3528"];
        let sink = Arc::new(RecordingSink::default());
        let check = SinkBinCheck::new(Arc::new(ScriptedDetector::default()), sink.clone(), 3);

        let results = check.check(&rows(&entities)).await.unwrap();

        assert_eq!(results.len(), entities.len());
        let keys: BTreeSet<&str> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, entities.iter().copied().collect());
        assert!(results.iter().all(|r| !r.failed));
        assert_eq!(sink.lines().len(), entities.len());
        assert!(sink.lines().contains(&"sink_bin,bin=4000 volume=100,failures=2".to_string()));
    }

    #[tokio::test]
    async fn anomalies_fail_and_analysis_errors_do_not() {
        let detector = Arc::new(ScriptedDetector {
            anomalous: vec!["4000-failures".to_string()],
            failing: vec!["5200-volume".to_string()],
            ..Default::default()
        });
        let check = SinkBinCheck::new(detector.clone(), Arc::new(RecordingSink::default()), 10);

        let results = check.check(&rows(&["4000", "5200", "6011"])).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].failed);
        assert!(results[0].message.starts_with("Failure anomaly for bin 4000"));
        assert_eq!(results[1], CheckResult::pass("5200"));
        assert_eq!(results[2], CheckResult::pass("6011"));
        assert_eq!(detector.seen().get("6011-volume"), Some(&100.0));
    }

    #[tokio::test]
    async fn empty_batch_has_no_results() {
        let check = SinkBinCheck::new(
            Arc::new(ScriptedDetector::default()),
            Arc::new(RecordingSink::default()),
            4,
        );
        assert!(check.check(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_finite_values_pass_without_analysis_or_metrics() {
        let detector = Arc::new(ScriptedDetector::default());
        let sink = Arc::new(RecordingSink::default());
        let check = SinkBinCheck::new(detector.clone(), sink.clone(), 2);
        let rows = vec![
            vec!["4000".to_string(), "NaN".to_string(), "1".to_string()],
            vec!["5200".to_string(), "10".to_string(), "inf".to_string()],
        ];

        let results = check.check(&rows).await.unwrap();

        assert_eq!(results, vec![CheckResult::pass("4000"), CheckResult::pass("5200")]);
        assert!(sink.lines().is_empty());
        assert!(detector.seen().is_empty());
    }
}

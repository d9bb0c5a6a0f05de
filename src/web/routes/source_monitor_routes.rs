use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{NodeHours, NodeMax};
use crate::web::{AppError, AppState};

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    pub stored: usize,
    pub skipped: usize,
}

pub fn create_source_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/times", post(set_node_hours_handler))
        .route("/max", post(set_node_max_handler))
}

/// Parses one `node;businessHours;businessImpact;afterHours;afterImpact` line.
/// Lines without business hours carry nothing to store.
fn parse_hours_line(line: &str) -> Option<NodeHours> {
    let tokens: Vec<&str> = line.split(';').map(str::trim).collect();
    let [node, business, business_impact, after, after_impact, ..] = tokens.as_slice() else {
        return None;
    };
    if node.is_empty() || business.is_empty() {
        return None;
    }
    Some(NodeHours {
        node_name: node.to_uppercase(),
        business_hours: business.to_uppercase(),
        business_hours_impact: business_impact.to_string(),
        after_hours: after.to_uppercase(),
        after_hours_impact: after_impact.to_string(),
    })
}

async fn set_node_hours_handler(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<ImportSummary>, AppError> {
    let mut summary = ImportSummary { stored: 0, skipped: 0 };
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        match parse_hours_line(line) {
            Some(hours) => {
                app_state.source_sink_store.set_node_hours(hours).await?;
                summary.stored += 1;
            }
            None => {
                warn!(line = %line, "Skipping node hours line.");
                summary.skipped += 1;
            }
        }
    }
    info!(stored = summary.stored, skipped = summary.skipped, "Node hours imported.");
    Ok(Json(summary))
}

async fn set_node_max_handler(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<ImportSummary>, AppError> {
    let entries: Vec<NodeMax> = serde_json::from_str(&body)?;
    let mut summary = ImportSummary { stored: 0, skipped: 0 };
    for entry in entries {
        if entry.node_name.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }
        app_state.source_sink_store.set_node_max(entry).await?;
        summary.stored += 1;
    }
    info!(stored = summary.stored, "Node connection ceilings imported.");
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SourceSinkStore};
    use crate::web::create_axum_router;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn hours_lines_are_upper_cased_and_need_business_hours() {
        let parsed = parse_hours_line("atm01; 08h00-17h00 ;Critical;17h00-08h00;Low").unwrap();
        assert_eq!(parsed.node_name, "ATM01");
        assert_eq!(parsed.business_hours, "08H00-17H00");
        assert_eq!(parsed.after_hours_impact, "Low");
        assert!(parse_hours_line("atm02;;Critical;;Low").is_none());
        assert!(parse_hours_line("atm03;24 x 7").is_none());
    }

    #[tokio::test]
    async fn times_endpoint_stores_valid_lines() {
        let store = Arc::new(MemoryStore::new());
        let app = create_axum_router(store.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sourceMonitor/times")
                    .body(Body::from("pos1;24 x 7;Critical;;\natm;;Low;;\n\nswitch;08h00-17h00;Low;17h00-08h00;Critical\n"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let summary: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary, serde_json::json!({"stored": 2, "skipped": 1}));

        let hours = store.node_hours().await.unwrap();
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].node_name, "POS1");
        assert_eq!(hours[0].business_hours, "24 X 7");
    }

    #[tokio::test]
    async fn max_endpoint_accepts_json_and_rejects_garbage() {
        let store = Arc::new(MemoryStore::new());
        let app = create_axum_router(store.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sourceMonitor/max")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"[{"Nodename": "NODEA", "Maxval": 50}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.node_max().await.unwrap()[0].max_connections, 50);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sourceMonitor/max")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = create_axum_router(Arc::new(MemoryStore::new()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

use crate::aggregator::Aggregator;
use crate::metrics::Metrics;
use crate::state::{timestamp_now, HealthSnapshot};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderMap, HeaderValue, StatusCode,
};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct HttpAppState {
    pub aggregator: Arc<Aggregator>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeQuery {
    #[serde(default)]
    pub fresh: bool,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessBody {
    pub ready: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessBody {
    pub alive: bool,
    pub timestamp: String,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricsFormat {
    Text,
    Json,
}

pub fn build_router(aggregator: Arc<Aggregator>, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/ready", get(ready_handler))
        .route("/health/live", get(live_handler))
        .route("/health/deep-system", get(deep_system_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HttpAppState {
            aggregator,
            metrics,
        })
}

async fn snapshot_for(state: &HttpAppState, query: &ProbeQuery) -> Arc<HealthSnapshot> {
    if query.fresh {
        state.aggregator.force_check().await
    } else {
        state.aggregator.store().current()
    }
}

async fn health_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ProbeQuery>,
) -> impl IntoResponse {
    state.metrics.inc_request("health");
    let snapshot = snapshot_for(&state, &query).await;
    (StatusCode::OK, Json(HealthSnapshot::clone(&snapshot)))
}

async fn ready_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ProbeQuery>,
) -> impl IntoResponse {
    state.metrics.inc_request("ready");
    let snapshot = snapshot_for(&state, &query).await;
    let status = if snapshot.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadinessBody {
        ready: snapshot.ready,
        timestamp: timestamp_now(),
    };
    (status, Json(body))
}

async fn live_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ProbeQuery>,
) -> impl IntoResponse {
    state.metrics.inc_request("live");
    let snapshot = snapshot_for(&state, &query).await;
    let status = if snapshot.live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = LivenessBody {
        alive: snapshot.live,
        timestamp: timestamp_now(),
        uptime_ms: state.aggregator.uptime_ms(),
    };
    (status, Json(body))
}

async fn deep_system_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ProbeQuery>,
) -> impl IntoResponse {
    state.metrics.inc_request("deep-system");
    let snapshot = snapshot_for(&state, &query).await;
    Json(snapshot.deep_system.clone())
}

async fn metrics_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<ProbeQuery>,
    headers: HeaderMap,
) -> Response {
    state.metrics.inc_request("metrics");
    let snapshot = snapshot_for(&state, &query).await;
    state.metrics.update_from_snapshot(&snapshot);
    state.metrics.set_uptime_ms(state.aggregator.uptime_ms());

    let format = match query.format.as_deref() {
        Some("text") => MetricsFormat::Text,
        Some("json") => MetricsFormat::Json,
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("unknown metrics format: {other}"),
            )
                .into_response()
        }
        None => negotiate(headers.get(ACCEPT).and_then(|v| v.to_str().ok())),
    };

    match format {
        MetricsFormat::Text => match state.metrics.encode_metrics() {
            Ok(encoded) => {
                let mut response = Response::new(Body::from(encoded));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
                response
            }
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {err}"),
            )
                .into_response(),
        },
        MetricsFormat::Json => {
            let mut map = state.metrics.flat_map();
            map.insert(
                "overall_status".to_string(),
                Value::from(snapshot.overall_status.as_str()),
            );
            map.insert(
                "version".to_string(),
                Value::from(snapshot.version.clone()),
            );
            map.insert(
                "environment".to_string(),
                Value::from(snapshot.environment.clone()),
            );
            Json(Value::Object(map)).into_response()
        }
    }
}

/// Text wins only when `text/plain` carries a strictly higher q-value than JSON.
fn negotiate(accept: Option<&str>) -> MetricsFormat {
    let Some(accept) = accept else {
        return MetricsFormat::Json;
    };
    let mut text_q = 0.0_f32;
    let mut json_q = 0.0_f32;
    for part in accept.split(',') {
        let mut params = part.split(';');
        let media = params.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = params
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|v| v.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        match media.as_str() {
            "text/plain" | "text/*" => text_q = text_q.max(q),
            "application/json" | "application/*" => json_q = json_q.max(q),
            "*/*" => json_q = json_q.max(q),
            _ => {}
        }
    }
    if text_q > json_q {
        MetricsFormat::Text
    } else {
        MetricsFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregatorSettings, ProbeTarget};
    use crate::classify::Thresholds;
    use crate::collectors::testing::{nominal_reading, FixedCollector};
    use crate::collectors::{Collected, GuardedCollector, ServiceProbe};
    use crate::state::{HealthStatus, ServiceCheckResult};
    use crate::store::SnapshotStore;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticProbe(HealthStatus);

    #[async_trait]
    impl ServiceProbe for StaticProbe {
        async fn probe(&self, name: &str, _timeout: Duration) -> ServiceCheckResult {
            match self.0 {
                HealthStatus::Unhealthy => {
                    ServiceCheckResult::failed(name, self.0, 5_000, "timeout")
                }
                status => ServiceCheckResult::new(name, status, 3),
            }
        }
    }

    fn app_with(middleware: HealthStatus) -> (Router, Arc<Aggregator>, Arc<Metrics>) {
        app_with_reading(middleware, nominal_reading())
    }

    fn app_with_reading(
        middleware: HealthStatus,
        reading: Collected,
    ) -> (Router, Arc<Aggregator>, Arc<Metrics>) {
        let metrics = Metrics::new().expect("metrics");
        let aggregator = Aggregator::new(
            vec![ProbeTarget {
                name: "middleware".to_string(),
                probe: Arc::new(StaticProbe(middleware)),
                timeout: Duration::from_millis(200),
            }],
            GuardedCollector::new(
                Arc::new(FixedCollector::new(reading)),
                Duration::from_millis(200),
            ),
            Duration::from_millis(200),
            SnapshotStore::new(HealthSnapshot::initial("2.0.0", "staging")),
            metrics.clone(),
            AggregatorSettings {
                version: "2.0.0".to_string(),
                environment: "staging".to_string(),
                critical_services: vec!["middleware".to_string()],
                thresholds: Thresholds::default(),
                interval: Duration::from_secs(30),
            },
        );
        let app = build_router(aggregator.clone(), metrics.clone());
        (app, aggregator, metrics)
    }

    async fn get(app: Router, uri: &str, accept: Option<&str>) -> (StatusCode, Response) {
        let mut request = Request::builder().uri(uri);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn initial_snapshot_is_not_ready_but_alive() {
        let (app, _, _) = app_with(HealthStatus::Healthy);

        let (status, response) = get(app.clone(), "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["ready"], false);

        let (status, response) = get(app, "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["alive"], true);
        assert!(body["uptimeMs"].is_u64());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn health_reports_snapshot_with_camel_case_fields() {
        let (app, aggregator, _) = app_with(HealthStatus::Healthy);
        aggregator.force_check().await;

        let (status, response) = get(app, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["overallStatus"], "healthy");
        assert_eq!(body["version"], "2.0.0");
        assert_eq!(body["environment"], "staging");
        assert_eq!(body["services"][0]["name"], "middleware");
        assert_eq!(body["metrics"]["memoryUsagePercent"], 40.0);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn unhealthy_middleware_fails_readiness_but_health_stays_200() {
        let (app, _, _) = app_with(HealthStatus::Unhealthy);

        let (status, response) = get(app.clone(), "/health?fresh=true", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["overallStatus"], "unhealthy");
        assert_eq!(body["services"][0]["error"], "timeout");

        let (status, _) = get(app.clone(), "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(app, "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn fresh_query_forces_a_cycle() {
        let (app, _, _) = app_with(HealthStatus::Healthy);
        let (status, response) = get(app, "/health/ready?fresh=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["ready"], true);
    }

    #[tokio::test]
    async fn deep_system_returns_sub_records() {
        let (app, aggregator, _) = app_with(HealthStatus::Healthy);
        aggregator.force_check().await;

        let (status, response) = get(app, "/health/deep-system", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["kernel"]["status"], "healthy");
        assert_eq!(body["payload"]["status"], "healthy");
        assert_eq!(body["hardware"]["status"], "healthy");
    }

    #[tokio::test]
    async fn metrics_negotiates_text_and_json() {
        let (app, aggregator, _) = app_with(HealthStatus::Healthy);
        aggregator.force_check().await;

        let (status, response) = get(app.clone(), "/metrics", Some("text/plain")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_CONTENT_TYPE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("# TYPE health_memory_usage_percent gauge"));
        assert!(text.contains("health_memory_usage_percent 40"));

        let (status, response) = get(app.clone(), "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["health_memory_usage_percent"], 40.0);
        assert_eq!(body["overall_status"], "healthy");
        assert_eq!(body["version"], "2.0.0");
        assert_eq!(body["health_http_requests_total{endpoint=\"metrics\"}"], 2.0);

        let (_, response) = get(app, "/metrics?format=text", Some("application/json")).await;
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn fresh_metrics_render_the_snapshot_they_report() {
        let (app, _, _) = app_with(HealthStatus::Healthy);

        let (status, response) = get(app, "/metrics?fresh=true", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["overall_status"], "healthy");
        assert_eq!(body["health_ready"], 1.0);
        assert_eq!(body["health_memory_usage_percent"], 40.0);
        assert_eq!(body["health_service_up{service=\"middleware\"}"], 1.0);
    }

    #[tokio::test]
    async fn exhausted_disk_fails_liveness_and_readiness() {
        let mut reading = nominal_reading();
        reading.metrics.disk_usage_percent = 99.0;
        let (app, aggregator, _) = app_with_reading(HealthStatus::Healthy, reading);
        aggregator.force_check().await;

        let (status, response) = get(app.clone(), "/health/live", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["alive"], false);
        assert!(body["uptimeMs"].is_u64());

        let (status, response) = get(app.clone(), "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["ready"], false);

        let (status, response) = get(app, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["overallStatus"], "unhealthy");
    }

    #[tokio::test]
    async fn unknown_metrics_format_is_rejected() {
        let (app, _, _) = app_with(HealthStatus::Healthy);
        let (status, _) = get(app, "/metrics?format=xml", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn accept_negotiation_respects_q_values() {
        assert_eq!(negotiate(None), MetricsFormat::Json);
        assert_eq!(negotiate(Some("*/*")), MetricsFormat::Json);
        assert_eq!(negotiate(Some("text/plain")), MetricsFormat::Text);
        assert_eq!(
            negotiate(Some("application/json;q=0.5, text/plain;q=0.9")),
            MetricsFormat::Text
        );
        assert_eq!(
            negotiate(Some("text/plain;q=0.2, application/json")),
            MetricsFormat::Json
        );
        assert_eq!(
            negotiate(Some("text/plain; version=0.0.4, */*;q=0.1")),
            MetricsFormat::Text
        );
    }
}

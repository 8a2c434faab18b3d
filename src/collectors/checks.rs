use crate::collectors::ServiceProbe;
use crate::config::{EndpointConfig, ServiceConfig};
use crate::state::{HealthStatus, ServiceCheckResult};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tracing::warn;

pub const TIMEOUT_ERROR: &str = "timeout";

pub struct HttpProbe {
    client: Client,
    url: String,
    slow_after: Duration,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>, slow_after: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            slow_after,
        }
    }
}

#[async_trait]
impl ServiceProbe for HttpProbe {
    async fn probe(&self, name: &str, timeout: Duration) -> ServiceCheckResult {
        if timeout.is_zero() {
            return ServiceCheckResult::failed(
                name,
                HealthStatus::Unhealthy,
                0,
                "invalid probe timeout",
            );
        }

        let start = Instant::now();
        let req = self.client.get(&self.url).timeout(timeout).send();

        let outcome = time::timeout(timeout, req).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(resp)) => {
                let code = resp.status().as_u16();
                let (status, error) = grade_response(code, start.elapsed(), self.slow_after);
                if let Some(error) = &error {
                    warn!(service = %name, status_code = code, "http probe returned error status");
                    return ServiceCheckResult::failed(name, status, latency_ms, error.clone());
                }
                ServiceCheckResult::new(name, status, latency_ms)
            }
            Ok(Err(err)) if err.is_timeout() => {
                warn!(service = %name, url = %self.url, "http probe timeout");
                ServiceCheckResult::failed(
                    name,
                    HealthStatus::Unhealthy,
                    latency_ms,
                    TIMEOUT_ERROR,
                )
            }
            Ok(Err(err)) => {
                warn!(service = %name, url = %self.url, error = %err, "http probe failed");
                ServiceCheckResult::failed(
                    name,
                    HealthStatus::Unhealthy,
                    latency_ms,
                    err.to_string(),
                )
            }
            Err(_elapsed) => {
                warn!(service = %name, url = %self.url, "http probe timeout");
                ServiceCheckResult::failed(
                    name,
                    HealthStatus::Unhealthy,
                    latency_ms,
                    TIMEOUT_ERROR,
                )
            }
        }
    }
}

pub struct TcpProbe {
    address: String,
    slow_after: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, port: u16, slow_after: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            slow_after,
        }
    }
}

#[async_trait]
impl ServiceProbe for TcpProbe {
    async fn probe(&self, name: &str, timeout: Duration) -> ServiceCheckResult {
        if timeout.is_zero() {
            return ServiceCheckResult::failed(
                name,
                HealthStatus::Unhealthy,
                0,
                "invalid probe timeout",
            );
        }

        let start = Instant::now();
        let outcome = time::timeout(timeout, TcpStream::connect(&self.address)).await;
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(Ok(_stream)) => ServiceCheckResult::new(
                name,
                slow_or_healthy(elapsed, self.slow_after),
                latency_ms,
            ),
            Ok(Err(err)) => {
                warn!(service = %name, address = %self.address, error = %err, "tcp probe failed");
                ServiceCheckResult::failed(
                    name,
                    HealthStatus::Unhealthy,
                    latency_ms,
                    err.to_string(),
                )
            }
            Err(_elapsed) => {
                warn!(service = %name, address = %self.address, "tcp probe timeout");
                ServiceCheckResult::failed(
                    name,
                    HealthStatus::Unhealthy,
                    latency_ms,
                    TIMEOUT_ERROR,
                )
            }
        }
    }
}

/// Maps an HTTP status code and elapsed time onto a service status.
pub fn grade_response(
    code: u16,
    elapsed: Duration,
    slow_after: Duration,
) -> (HealthStatus, Option<String>) {
    match code {
        500..=599 => (HealthStatus::Unhealthy, Some(format!("HTTP {code}"))),
        400..=499 => (HealthStatus::Degraded, Some(format!("HTTP {code}"))),
        _ => (slow_or_healthy(elapsed, slow_after), None),
    }
}

fn slow_or_healthy(elapsed: Duration, slow_after: Duration) -> HealthStatus {
    if elapsed > slow_after {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Builds the probe for one configured dependency.
pub fn probe_for(
    service: &ServiceConfig,
    client: &Client,
    slow_after: Duration,
) -> Arc<dyn ServiceProbe> {
    match &service.endpoint {
        EndpointConfig::Http { url } => {
            Arc::new(HttpProbe::new(client.clone(), url.clone(), slow_after))
        }
        EndpointConfig::Tcp { host, port } => Arc::new(TcpProbe::new(host, *port, slow_after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    const SLOW: Duration = Duration::from_secs(5);

    async fn spawn_http() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route(
                "/hang",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn response_grading() {
        let fast = Duration::from_millis(20);
        assert_eq!(
            grade_response(200, fast, SLOW),
            (HealthStatus::Healthy, None)
        );
        assert_eq!(
            grade_response(204, Duration::from_secs(6), SLOW).0,
            HealthStatus::Degraded
        );
        assert_eq!(grade_response(404, fast, SLOW).0, HealthStatus::Degraded);
        assert_eq!(grade_response(503, fast, SLOW).0, HealthStatus::Unhealthy);
        assert_eq!(
            grade_response(500, fast, SLOW).1.as_deref(),
            Some("HTTP 500")
        );
    }

    #[tokio::test]
    async fn http_probe_statuses() {
        let base = spawn_http().await;
        let client = Client::new();
        let timeout = Duration::from_secs(2);

        let ok = HttpProbe::new(client.clone(), format!("{base}/ok"), SLOW)
            .probe("middleware", timeout)
            .await;
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(ok.name, "middleware");
        assert!(ok.error.is_none());

        let missing = HttpProbe::new(client.clone(), format!("{base}/missing"), SLOW)
            .probe("backend", timeout)
            .await;
        assert_eq!(missing.status, HealthStatus::Degraded);
        assert!(missing.error.is_some());

        let broken = HttpProbe::new(client, format!("{base}/broken"), SLOW)
            .probe("backend", timeout)
            .await;
        assert_eq!(broken.status, HealthStatus::Unhealthy);
        assert_eq!(broken.error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn http_probe_timeout() {
        let base = spawn_http().await;
        let result = HttpProbe::new(Client::new(), format!("{base}/hang"), SLOW)
            .probe("middleware", Duration::from_millis(100))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));
    }

    #[tokio::test]
    async fn tcp_probe_reachable_and_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let up = TcpProbe::new("127.0.0.1", port, SLOW)
            .probe("db", Duration::from_secs(1))
            .await;
        assert_eq!(up.status, HealthStatus::Healthy);

        drop(listener);
        let down = TcpProbe::new("127.0.0.1", port, SLOW)
            .probe("db", Duration::from_secs(1))
            .await;
        assert_eq!(down.status, HealthStatus::Unhealthy);
        assert!(down.error.is_some());
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected_in_result() {
        let result = TcpProbe::new("127.0.0.1", 1, SLOW)
            .probe("db", Duration::ZERO)
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error.is_some());
    }
}

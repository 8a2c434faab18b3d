pub mod checks;
pub mod simulated;
pub mod system;

use crate::state::{DeepSystemStatus, ResourceMetrics, ServiceCheckResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// One reachability check against one named dependency.
///
/// Implementations never fail: every outcome, including timeouts, is encoded
/// in the returned [`ServiceCheckResult`].
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn probe(&self, name: &str, timeout: Duration) -> ServiceCheckResult;
}

#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn collect(&self) -> Result<Collected, CollectError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub metrics: ResourceMetrics,
    pub deep: DeepSystemStatus,
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
    #[error("collector task panicked")]
    Panicked,
    #[error("collector state lock poisoned")]
    Poisoned,
}

/// Wraps a collector with the collection timeout and the last-known fallback.
pub struct GuardedCollector {
    inner: Arc<dyn MetricsCollector>,
    timeout: Duration,
    last: Mutex<Option<Collected>>,
}

impl GuardedCollector {
    pub fn new(inner: Arc<dyn MetricsCollector>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            last: Mutex::new(None),
        }
    }

    /// Returns a fresh reading, or the previous one forced to degraded.
    ///
    /// The boolean is `true` when the fallback was used.
    pub async fn collect(&self) -> (Collected, bool) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.collect().await });
        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(collected))) => Ok(collected),
            Ok(Ok(Err(err))) => Err(err.to_string()),
            Ok(Err(_join)) => Err(CollectError::Panicked.to_string()),
            Err(_elapsed) => Err("collection timeout".to_string()),
        };

        let mut last = self.last.lock().await;
        match outcome {
            Ok(collected) => {
                *last = Some(collected.clone());
                (collected, false)
            }
            Err(reason) => {
                warn!(error = %reason, "metrics collection failed, reusing last reading");
                (degraded_fallback(last.as_ref(), &reason), true)
            }
        }
    }
}

fn degraded_fallback(previous: Option<&Collected>, reason: &str) -> Collected {
    let mut collected = previous.cloned().unwrap_or_else(|| Collected {
        metrics: ResourceMetrics::default(),
        deep: DeepSystemStatus::unknown(),
    });
    collected.deep.force_degraded();
    if !collected.metrics.unavailable.iter().any(|s| s == reason) {
        collected.metrics.unavailable.push(reason.to_string());
    }
    collected
}

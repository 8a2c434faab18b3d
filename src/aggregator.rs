use crate::classify::{classify, Thresholds};
use crate::collectors::checks::TIMEOUT_ERROR;
use crate::collectors::{Collected, GuardedCollector, ServiceProbe};
use crate::metrics::Metrics;
use crate::state::{timestamp_now, CyclePhase, HealthSnapshot, HealthStatus, ServiceCheckResult};
use crate::store::SnapshotStore;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const PROBE_PANIC_ERROR: &str = "unexpected probe failure";
pub const DEADLINE_ERROR: &str = "cycle deadline exceeded";
const COLLECT_DEADLINE_REASON: &str = "collection deadline exceeded";

/// One dependency probed every cycle.
pub struct ProbeTarget {
    pub name: String,
    pub probe: Arc<dyn ServiceProbe>,
    pub timeout: Duration,
}

pub struct AggregatorSettings {
    pub version: String,
    pub environment: String,
    pub critical_services: Vec<String>,
    pub thresholds: Thresholds,
    pub interval: Duration,
}

type InFlight = watch::Receiver<Option<Arc<HealthSnapshot>>>;

/// Runs probe/collector fan-out cycles and commits their snapshots to the store.
pub struct Aggregator {
    targets: Vec<ProbeTarget>,
    collector: GuardedCollector,
    store: SnapshotStore,
    metrics: Arc<Metrics>,
    settings: AggregatorSettings,
    ceiling: Duration,
    started: Instant,
    phase: AtomicU8,
    in_flight: Mutex<Option<InFlight>>,
}

impl Aggregator {
    pub fn new(
        targets: Vec<ProbeTarget>,
        collector: GuardedCollector,
        collect_timeout: Duration,
        store: SnapshotStore,
        metrics: Arc<Metrics>,
        settings: AggregatorSettings,
    ) -> Arc<Self> {
        let longest = targets
            .iter()
            .map(|t| t.timeout)
            .chain(std::iter::once(collect_timeout))
            .max()
            .unwrap_or(collect_timeout);
        Arc::new(Self {
            targets,
            collector,
            store,
            metrics,
            settings,
            ceiling: longest * 2,
            started: Instant::now(),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            in_flight: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Hard bound on one cycle: twice the longest probe or collection timeout.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Runs a cycle now, or joins the one already in flight.
    ///
    /// Every caller that overlaps a running cycle receives that cycle's snapshot.
    pub async fn force_check(self: &Arc<Self>) -> Arc<HealthSnapshot> {
        self.coalesced(|this| this.assemble()).await
    }

    async fn coalesced<F, Fut>(self: &Arc<Self>, cycle: F) -> Arc<HealthSnapshot>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = HealthSnapshot> + Send + 'static,
    {
        self.metrics.inc_forced_check();
        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(rx) if rx.borrow().is_none() => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *in_flight = Some(rx.clone());
                    let this = self.clone();
                    let cycle = cycle(self.clone());
                    tokio::spawn(async move {
                        let snapshot = this.clone().commit(cycle).await;
                        let mut in_flight = this.in_flight.lock().await;
                        in_flight.take();
                        let _ = tx.send(Some(snapshot));
                    });
                    rx
                }
            }
        };

        loop {
            let published = rx.borrow_and_update().clone();
            if let Some(snapshot) = published {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return self.store.current();
            }
        }
    }

    /// Periodic driver; returns once `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping health checks");
                    break;
                }
                _ = ticker.tick() => {
                    if self.phase() != CyclePhase::Idle {
                        debug!("previous cycle still running, joining it");
                    }
                    self.force_check().await;
                }
            }
        }
    }

    /// Runs one cycle to completion and publishes its snapshot, even if it panics.
    async fn commit<Fut>(self: Arc<Self>, cycle: Fut) -> Arc<HealthSnapshot>
    where
        Fut: Future<Output = HealthSnapshot> + Send + 'static,
    {
        let cycle_start = Instant::now();
        let snapshot = match tokio::spawn(cycle).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "health aggregation failed");
                self.metrics.inc_aggregation_failure();
                self.failure_snapshot()
            }
        };

        let snapshot = Arc::new(snapshot);
        self.store.publish(snapshot.clone());
        self.set_phase(CyclePhase::Idle);
        self.metrics.inc_cycle();
        debug!(
            overall = %snapshot.overall_status,
            ready = snapshot.ready,
            live = snapshot.live,
            elapsed_ms = cycle_start.elapsed().as_millis() as u64,
            "health snapshot published"
        );
        snapshot
    }

    async fn assemble(self: Arc<Self>) -> HealthSnapshot {
        self.set_phase(CyclePhase::Checking);
        let deadline = tokio::time::Instant::now() + self.ceiling;

        let probes: Vec<(String, JoinHandle<ServiceCheckResult>)> = self
            .targets
            .iter()
            .map(|target| {
                let probe = target.probe.clone();
                let name = target.name.clone();
                let timeout = target.timeout;
                let handle = tokio::spawn(async move {
                    let outcome = tokio::time::timeout(timeout, probe.probe(&name, timeout)).await;
                    match outcome {
                        Ok(result) => result,
                        Err(_elapsed) => ServiceCheckResult::failed(
                            name,
                            HealthStatus::Unhealthy,
                            timeout.as_millis() as u64,
                            TIMEOUT_ERROR,
                        ),
                    }
                });
                (target.name.clone(), handle)
            })
            .collect();

        let this = self.clone();
        let collection = tokio::spawn(async move { this.collector.collect().await });

        let mut services = Vec::with_capacity(probes.len());
        for (name, handle) in probes {
            let result = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(service = %name, error = %err, "probe task failed");
                    ServiceCheckResult::failed(
                        name,
                        HealthStatus::Unhealthy,
                        0,
                        PROBE_PANIC_ERROR,
                    )
                }
                Err(_elapsed) => {
                    warn!(service = %name, "probe still running at cycle deadline");
                    ServiceCheckResult::failed(
                        name,
                        HealthStatus::Unhealthy,
                        self.ceiling.as_millis() as u64,
                        DEADLINE_ERROR,
                    )
                }
            };
            if result.status != HealthStatus::Healthy {
                self.metrics.inc_probe_failure(&result.name);
            }
            services.push(result);
        }

        let collected = match tokio::time::timeout_at(deadline, collection).await {
            Ok(Ok((collected, fallback))) => {
                if fallback {
                    self.metrics.inc_collect_fallback();
                }
                collected
            }
            Ok(Err(err)) => {
                warn!(error = %err, "collector task failed");
                self.metrics.inc_collect_fallback();
                self.degraded_previous_reading()
            }
            Err(_elapsed) => {
                warn!("collector still running at cycle deadline");
                self.metrics.inc_collect_fallback();
                self.degraded_previous_reading()
            }
        };

        self.set_phase(CyclePhase::Publishing);
        let c = classify(
            &services,
            &collected.metrics,
            &collected.deep,
            &self.settings.critical_services,
            &self.settings.thresholds,
        );

        HealthSnapshot {
            overall_status: c.overall,
            timestamp: timestamp_now(),
            uptime_ms: self.uptime_ms(),
            version: self.settings.version.clone(),
            environment: self.settings.environment.clone(),
            services,
            metrics: collected.metrics,
            deep_system: collected.deep,
            ready: c.ready,
            live: c.live,
        }
    }

    fn degraded_previous_reading(&self) -> Collected {
        let previous = self.store.current();
        let mut collected = Collected {
            metrics: previous.metrics.clone(),
            deep: previous.deep_system.clone(),
        };
        collected.deep.force_degraded();
        let unavailable = &mut collected.metrics.unavailable;
        if !unavailable.iter().any(|s| s == COLLECT_DEADLINE_REASON) {
            unavailable.push(COLLECT_DEADLINE_REASON.to_string());
        }
        collected
    }

    /// Snapshot committed when a cycle dies outright: not ready, still alive.
    fn failure_snapshot(&self) -> HealthSnapshot {
        let previous = self.store.current();
        HealthSnapshot {
            overall_status: HealthStatus::Unhealthy,
            timestamp: timestamp_now(),
            uptime_ms: self.uptime_ms(),
            version: self.settings.version.clone(),
            environment: self.settings.environment.clone(),
            services: Vec::new(),
            metrics: previous.metrics.clone(),
            deep_system: previous.deep_system.clone(),
            ready: false,
            live: true,
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

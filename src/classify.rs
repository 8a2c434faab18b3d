use crate::config::ThresholdsConfig;
use crate::state::{DeepSystemStatus, HealthStatus, ResourceMetrics, ServiceCheckResult};

/// Cutoffs used by [`classify`]. Every comparison is `value >= cutoff`.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub memory_degraded: f64,
    pub memory_unhealthy: f64,
    pub cpu_degraded: f64,
    pub cpu_unhealthy: f64,
    pub disk_degraded: f64,
    pub disk_unhealthy: f64,
    pub network_latency_unhealthy_ms: f64,
    pub ready_memory: f64,
    pub ready_disk: f64,
    pub live_memory: f64,
    pub live_disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ThresholdsConfig::default())
    }
}

impl From<&ThresholdsConfig> for Thresholds {
    fn from(cfg: &ThresholdsConfig) -> Self {
        Self {
            memory_degraded: cfg.memory_degraded_percent,
            memory_unhealthy: cfg.memory_unhealthy_percent,
            cpu_degraded: cfg.cpu_degraded_percent,
            cpu_unhealthy: cfg.cpu_unhealthy_percent,
            disk_degraded: cfg.disk_degraded_percent,
            disk_unhealthy: cfg.disk_unhealthy_percent,
            network_latency_unhealthy_ms: cfg.network_latency_unhealthy_ms,
            ready_memory: cfg.ready_memory_percent,
            ready_disk: cfg.ready_disk_percent,
            live_memory: cfg.live_memory_percent,
            live_disk: cfg.live_disk_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub overall: HealthStatus,
    pub ready: bool,
    pub live: bool,
}

/// Grades a reading against a degraded/unhealthy pair.
pub fn grade(value: f64, degraded: f64, unhealthy: f64) -> HealthStatus {
    if value >= unhealthy {
        HealthStatus::Unhealthy
    } else if value >= degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub fn metrics_status(metrics: &ResourceMetrics, t: &Thresholds) -> HealthStatus {
    let mut status = grade(metrics.memory_usage_percent, t.memory_degraded, t.memory_unhealthy)
        .worst(grade(metrics.cpu_usage_percent, t.cpu_degraded, t.cpu_unhealthy))
        .worst(grade(metrics.disk_usage_percent, t.disk_degraded, t.disk_unhealthy));
    if metrics.network_latency_ms >= t.network_latency_unhealthy_ms {
        status = HealthStatus::Unhealthy;
    }
    if !metrics.unavailable.is_empty() {
        status = status.worst(HealthStatus::Degraded);
    }
    status
}

/// Reduces one cycle's readings to the overall status and the two probe flags.
///
/// A critical service missing from `services` is treated as unhealthy for readiness.
pub fn classify(
    services: &[ServiceCheckResult],
    metrics: &ResourceMetrics,
    deep: &DeepSystemStatus,
    critical: &[String],
    t: &Thresholds,
) -> Classification {
    let services_status = services
        .iter()
        .map(|s| s.status)
        .fold(HealthStatus::Healthy, HealthStatus::worst);
    let deep_status = deep
        .statuses()
        .into_iter()
        .fold(HealthStatus::Healthy, HealthStatus::worst);
    let overall = services_status
        .worst(deep_status)
        .worst(metrics_status(metrics, t));

    let critical_ok = critical.iter().all(|name| {
        services
            .iter()
            .find(|s| &s.name == name)
            .is_some_and(|s| s.status != HealthStatus::Unhealthy)
    });
    let resources_ok = metrics.memory_usage_percent < t.ready_memory
        && metrics.disk_usage_percent < t.ready_disk;
    let ready = critical_ok && resources_ok;

    let live = metrics.memory_usage_percent < t.live_memory
        && metrics.disk_usage_percent < t.live_disk;

    Classification {
        overall,
        ready,
        live,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HardwareStatus, KernelStatus, PayloadStatus};

    fn svc(name: &str, status: HealthStatus) -> ServiceCheckResult {
        ServiceCheckResult::new(name, status, 10)
    }

    fn nominal() -> ResourceMetrics {
        ResourceMetrics {
            memory_usage_percent: 40.0,
            cpu_usage_percent: 30.0,
            disk_usage_percent: 50.0,
            network_latency_ms: 10.0,
            active_connections: 5,
            unavailable: Vec::new(),
        }
    }

    fn deep_all(status: HealthStatus) -> DeepSystemStatus {
        DeepSystemStatus {
            kernel: KernelStatus {
                status,
                context_switches: 1_000,
                interrupts: 500,
                process_count: 120,
                load_average: 0.4,
            },
            payload: PayloadStatus {
                status,
                packets_processed: 10_000,
                packets_dropped: 0,
                drop_rate_percent: 0.0,
            },
            hardware: HardwareStatus {
                status,
                cpu_temperature_celsius: Some(45.0),
                cpu_core_count: 8,
                sensor_count: 4,
            },
        }
    }

    fn critical() -> Vec<String> {
        vec!["middleware".to_string(), "backend".to_string()]
    }

    const STATUSES: [HealthStatus; 3] = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
    ];

    #[test]
    fn nominal_cycle_is_healthy_ready_and_live() {
        let services = vec![
            svc("middleware", HealthStatus::Healthy),
            svc("backend", HealthStatus::Healthy),
        ];
        let c = classify(
            &services,
            &nominal(),
            &deep_all(HealthStatus::Healthy),
            &critical(),
            &Thresholds::default(),
        );
        assert_eq!(c.overall, HealthStatus::Healthy);
        assert!(c.ready);
        assert!(c.live);
    }

    #[test]
    fn any_unhealthy_service_makes_overall_unhealthy() {
        for other in STATUSES {
            for position in 0..3 {
                let mut services = vec![
                    svc("a", other),
                    svc("b", HealthStatus::Healthy),
                    svc("c", HealthStatus::Degraded),
                ];
                services.insert(position, svc("bad", HealthStatus::Unhealthy));
                let c = classify(
                    &services,
                    &nominal(),
                    &deep_all(HealthStatus::Healthy),
                    &[],
                    &Thresholds::default(),
                );
                assert_eq!(c.overall, HealthStatus::Unhealthy);
            }
        }
    }

    #[test]
    fn unhealthy_critical_service_is_not_ready() {
        let services = vec![ServiceCheckResult::failed(
            "middleware",
            HealthStatus::Unhealthy,
            5_000,
            "timeout",
        )];
        let c = classify(
            &services,
            &nominal(),
            &deep_all(HealthStatus::Healthy),
            &["middleware".to_string()],
            &Thresholds::default(),
        );
        assert_eq!(c.overall, HealthStatus::Unhealthy);
        assert!(!c.ready);
        assert!(c.live);
    }

    #[test]
    fn degraded_critical_service_still_ready() {
        let services = vec![
            svc("middleware", HealthStatus::Degraded),
            svc("backend", HealthStatus::Healthy),
        ];
        let c = classify(
            &services,
            &nominal(),
            &deep_all(HealthStatus::Healthy),
            &critical(),
            &Thresholds::default(),
        );
        assert_eq!(c.overall, HealthStatus::Degraded);
        assert!(c.ready);
    }

    #[test]
    fn missing_critical_service_is_not_ready() {
        let services = vec![svc("middleware", HealthStatus::Healthy)];
        let c = classify(
            &services,
            &nominal(),
            &deep_all(HealthStatus::Healthy),
            &critical(),
            &Thresholds::default(),
        );
        assert!(!c.ready);
    }

    #[test]
    fn high_memory_never_ready() {
        let services = vec![
            svc("middleware", HealthStatus::Healthy),
            svc("backend", HealthStatus::Healthy),
        ];
        for memory in [95.0, 95.5, 97.0, 99.0, 100.0] {
            for status in STATUSES {
                let metrics = ResourceMetrics {
                    memory_usage_percent: memory,
                    ..nominal()
                };
                let c = classify(
                    &services,
                    &metrics,
                    &deep_all(status),
                    &critical(),
                    &Thresholds::default(),
                );
                assert!(!c.ready, "memory {memory} must not be ready");
            }
        }
    }

    #[test]
    fn liveness_ignores_service_health() {
        for memory in [0.0, 50.0, 90.0, 97.9] {
            for disk in [0.0, 60.0, 96.0, 98.9] {
                for status in STATUSES {
                    let services = vec![svc("middleware", status), svc("backend", status)];
                    let metrics = ResourceMetrics {
                        memory_usage_percent: memory,
                        disk_usage_percent: disk,
                        ..nominal()
                    };
                    let c = classify(
                        &services,
                        &metrics,
                        &deep_all(status),
                        &critical(),
                        &Thresholds::default(),
                    );
                    assert!(c.live, "memory {memory} disk {disk} must stay live");
                }
            }
        }
    }

    #[test]
    fn disk_exhaustion_kills_readiness_and_liveness() {
        let services = vec![
            svc("middleware", HealthStatus::Healthy),
            svc("backend", HealthStatus::Healthy),
        ];
        let metrics = ResourceMetrics {
            disk_usage_percent: 99.0,
            ..nominal()
        };
        let c = classify(
            &services,
            &metrics,
            &deep_all(HealthStatus::Healthy),
            &critical(),
            &Thresholds::default(),
        );
        assert_eq!(c.overall, HealthStatus::Unhealthy);
        assert!(!c.ready);
        assert!(!c.live);
    }

    #[test]
    fn metric_thresholds_follow_table() {
        let t = Thresholds::default();
        let cases = [
            (ResourceMetrics { memory_usage_percent: 79.9, ..nominal() }, HealthStatus::Healthy),
            (ResourceMetrics { memory_usage_percent: 80.0, ..nominal() }, HealthStatus::Degraded),
            (ResourceMetrics { memory_usage_percent: 90.0, ..nominal() }, HealthStatus::Unhealthy),
            (ResourceMetrics { cpu_usage_percent: 85.0, ..nominal() }, HealthStatus::Degraded),
            (ResourceMetrics { cpu_usage_percent: 90.0, ..nominal() }, HealthStatus::Unhealthy),
            (ResourceMetrics { disk_usage_percent: 84.9, ..nominal() }, HealthStatus::Healthy),
            (ResourceMetrics { disk_usage_percent: 85.0, ..nominal() }, HealthStatus::Degraded),
            (ResourceMetrics { disk_usage_percent: 95.0, ..nominal() }, HealthStatus::Unhealthy),
            (ResourceMetrics { network_latency_ms: 999.0, ..nominal() }, HealthStatus::Healthy),
            (ResourceMetrics { network_latency_ms: 1000.0, ..nominal() }, HealthStatus::Unhealthy),
        ];
        for (metrics, expected) in cases {
            assert_eq!(metrics_status(&metrics, &t), expected, "{metrics:?}");
        }
    }

    #[test]
    fn unavailable_sources_degrade() {
        let metrics = ResourceMetrics {
            unavailable: vec!["active_connections".to_string()],
            ..nominal()
        };
        let c = classify(
            &[],
            &metrics,
            &deep_all(HealthStatus::Healthy),
            &[],
            &Thresholds::default(),
        );
        assert_eq!(c.overall, HealthStatus::Degraded);
    }

    #[test]
    fn deep_system_domains_feed_overall() {
        let mut deep = deep_all(HealthStatus::Healthy);
        deep.payload.status = HealthStatus::Unhealthy;
        let c = classify(&[], &nominal(), &deep, &[], &Thresholds::default());
        assert_eq!(c.overall, HealthStatus::Unhealthy);
        assert!(c.ready);

        deep.payload.status = HealthStatus::Degraded;
        let c = classify(&[], &nominal(), &deep, &[], &Thresholds::default());
        assert_eq!(c.overall, HealthStatus::Degraded);
    }

    #[test]
    fn classify_is_deterministic() {
        let services = vec![
            svc("middleware", HealthStatus::Degraded),
            svc("backend", HealthStatus::Unhealthy),
        ];
        let metrics = ResourceMetrics {
            memory_usage_percent: 82.0,
            ..nominal()
        };
        let deep = deep_all(HealthStatus::Degraded);
        let t = Thresholds::default();
        let first = classify(&services, &metrics, &deep, &critical(), &t);
        let second = classify(&services, &metrics, &deep, &critical(), &t);
        assert_eq!(first, second);
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let t = Thresholds {
            ready_memory: 50.0,
            ..Thresholds::default()
        };
        let c = classify(&[], &nominal(), &deep_all(HealthStatus::Healthy), &[], &t);
        assert!(c.ready);
        let metrics = ResourceMetrics {
            memory_usage_percent: 55.0,
            ..nominal()
        };
        let c = classify(&[], &metrics, &deep_all(HealthStatus::Healthy), &[], &t);
        assert!(!c.ready);
    }
}

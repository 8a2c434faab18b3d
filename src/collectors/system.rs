use crate::classify::grade;
use crate::collectors::{CollectError, Collected, MetricsCollector};
use crate::config::ThresholdsConfig;
use crate::state::{
    DeepSystemStatus, HardwareStatus, HealthStatus, KernelStatus, PayloadStatus, ResourceMetrics,
};
use async_trait::async_trait;
#[cfg(target_os = "linux")]
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DeepThresholds {
    pub load_per_core: (f64, f64),
    pub packet_drop_percent: (f64, f64),
    pub cpu_temp_celsius: (f64, f64),
}

impl From<&ThresholdsConfig> for DeepThresholds {
    fn from(cfg: &ThresholdsConfig) -> Self {
        Self {
            load_per_core: (cfg.load_per_core_degraded, cfg.load_per_core_unhealthy),
            packet_drop_percent: (
                cfg.packet_drop_degraded_percent,
                cfg.packet_drop_unhealthy_percent,
            ),
            cpu_temp_celsius: (cfg.cpu_temp_degraded_celsius, cfg.cpu_temp_unhealthy_celsius),
        }
    }
}

/// Host telemetry backed by sysinfo and procfs.
pub struct SystemCollector {
    inner: Arc<Mutex<Sampler>>,
    last_latency_ms: Mutex<f64>,
    thresholds: DeepThresholds,
    latency_target: Option<String>,
    latency_timeout: Duration,
}

struct Sampler {
    system: System,
    last: ResourceMetrics,
    last_kernel: (u64, u64),
    prev_packets: Option<PacketTotals>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct PacketTotals {
    processed: u64,
    dropped: u64,
}

impl SystemCollector {
    pub fn new(
        thresholds: DeepThresholds,
        latency_target: Option<String>,
        latency_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Sampler {
                system: System::new_all(),
                last: ResourceMetrics::default(),
                last_kernel: (0, 0),
                prev_packets: None,
            })),
            last_latency_ms: Mutex::new(0.0),
            thresholds,
            latency_target,
            latency_timeout,
        }
    }

    async fn measure_latency(&self) -> Option<Result<f64, String>> {
        let target = self.latency_target.as_ref()?;
        let start = Instant::now();
        let outcome = time::timeout(self.latency_timeout, TcpStream::connect(target)).await;
        Some(match outcome {
            Ok(Ok(_stream)) => Ok(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_elapsed) => Err("timeout".to_string()),
        })
    }

    /// Falls back to the last latency when the target is unreachable.
    fn apply_latency(&self, metrics: &mut ResourceMetrics, latency: Option<Result<f64, String>>) {
        let Ok(mut last) = self.last_latency_ms.lock() else {
            metrics.unavailable.push("network_latency".to_string());
            return;
        };
        metrics.network_latency_ms = match latency {
            None => 0.0,
            Some(Ok(ms)) => {
                *last = ms;
                ms
            }
            Some(Err(err)) => {
                debug!(error = %err, "latency target unreachable");
                metrics.unavailable.push("network_latency".to_string());
                *last
            }
        };
    }
}

#[async_trait]
impl MetricsCollector for SystemCollector {
    async fn collect(&self) -> Result<Collected, CollectError> {
        let inner = self.inner.clone();
        let thresholds = self.thresholds.clone();
        let sampling = tokio::task::spawn_blocking(move || {
            let mut sampler = inner.lock().map_err(|_| CollectError::Poisoned)?;
            Ok::<_, CollectError>(sampler.sample(&thresholds))
        });
        let (latency, sampled) = tokio::join!(self.measure_latency(), sampling);
        let mut collected = sampled.map_err(|_| CollectError::Panicked)??;

        if core_sources_down(&collected.metrics.unavailable) {
            return Err(CollectError::Unavailable(
                collected.metrics.unavailable.join(", "),
            ));
        }
        self.apply_latency(&mut collected.metrics, latency);
        Ok(collected)
    }
}

impl Sampler {
    fn sample(&mut self, thresholds: &DeepThresholds) -> Collected {
        let system = &mut self.system;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks_list();
        system.refresh_networks();
        system.refresh_components_list();
        system.refresh_components();

        let mut unavailable = Vec::new();
        let last = &self.last;

        let memory_usage_percent = match percent(system.used_memory(), system.total_memory()) {
            Some(pct) => pct,
            None => {
                unavailable.push("memory".to_string());
                last.memory_usage_percent
            }
        };

        let cpu_usage_percent = if system.cpus().is_empty() {
            unavailable.push("cpu".to_string());
            last.cpu_usage_percent
        } else {
            let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
            (sum / system.cpus().len() as f32) as f64
        };

        let (disk_used, disk_total) = system.disks().iter().fold((0_u64, 0_u64), |acc, d| {
            let total = d.total_space();
            let used = total.saturating_sub(d.available_space());
            (acc.0.saturating_add(used), acc.1.saturating_add(total))
        });
        let disk_usage_percent = match percent(disk_used, disk_total) {
            Some(pct) => pct,
            None => {
                unavailable.push("disk".to_string());
                last.disk_usage_percent
            }
        };

        let active_connections = match read_established_connections() {
            Some(count) => count,
            None => {
                unavailable.push("active_connections".to_string());
                last.active_connections
            }
        };

        let metrics = ResourceMetrics {
            memory_usage_percent,
            cpu_usage_percent,
            disk_usage_percent,
            network_latency_ms: 0.0,
            active_connections,
            unavailable,
        };

        let cores = system.cpus().len() as u32;
        let kernel = self.kernel_status(thresholds, cores);
        let payload = self.payload_status(thresholds);
        let hardware = hardware_status(&self.system, thresholds, cores);

        self.last = metrics.clone();
        Collected {
            metrics,
            deep: DeepSystemStatus {
                kernel,
                payload,
                hardware,
            },
        }
    }

    fn kernel_status(&mut self, thresholds: &DeepThresholds, cores: u32) -> KernelStatus {
        let load_average = self.system.load_average().one;
        let load_per_core = load_average / f64::from(cores.max(1));
        let (degraded, unhealthy) = thresholds.load_per_core;
        let mut status = grade(load_per_core, degraded, unhealthy);

        let (context_switches, interrupts) = match read_kernel_counters() {
            Some(counters) => {
                self.last_kernel = counters;
                counters
            }
            None => {
                status = status.worst(HealthStatus::Degraded);
                self.last_kernel
            }
        };

        KernelStatus {
            status,
            context_switches,
            interrupts,
            process_count: self.system.processes().len() as u64,
            load_average,
        }
    }

    fn payload_status(&mut self, thresholds: &DeepThresholds) -> PayloadStatus {
        let networks = self.system.networks();
        let totals = networks
            .iter()
            .fold(PacketTotals::default(), |acc, (_iface, data)| PacketTotals {
                processed: acc
                    .processed
                    .saturating_add(data.total_packets_received())
                    .saturating_add(data.total_packets_transmitted()),
                dropped: acc
                    .dropped
                    .saturating_add(data.total_errors_on_received())
                    .saturating_add(data.total_errors_on_transmitted()),
            });
        let interfaces = networks.iter().count();

        let drop_rate_percent = drop_rate(self.prev_packets, totals);
        self.prev_packets = Some(totals);

        let (degraded, unhealthy) = thresholds.packet_drop_percent;
        let mut status = grade(drop_rate_percent, degraded, unhealthy);
        if interfaces == 0 {
            status = status.worst(HealthStatus::Degraded);
        }

        PayloadStatus {
            status,
            packets_processed: totals.processed,
            packets_dropped: totals.dropped,
            drop_rate_percent,
        }
    }
}

fn hardware_status(system: &System, thresholds: &DeepThresholds, cores: u32) -> HardwareStatus {
    let readings: Vec<(String, f64)> = system
        .components()
        .iter()
        .map(|c| (c.label().to_string(), c.temperature() as f64))
        .filter(|(_, temp)| (0.0..=130.0).contains(temp) && *temp > 0.0)
        .collect();
    let cpu_temperature_celsius = cpu_temperature(&readings);

    let (degraded, unhealthy) = thresholds.cpu_temp_celsius;
    // Hosts without thermal sensors report no temperature rather than a failure.
    let status = match cpu_temperature_celsius {
        Some(temp) => grade(temp, degraded, unhealthy),
        None => HealthStatus::Healthy,
    };

    HardwareStatus {
        status,
        cpu_temperature_celsius,
        cpu_core_count: cores,
        sensor_count: readings.len() as u32,
    }
}

const CORE_SOURCES: [&str; 3] = ["memory", "cpu", "disk"];

/// True when none of memory, CPU or disk could be read this round.
fn core_sources_down(unavailable: &[String]) -> bool {
    CORE_SOURCES
        .iter()
        .all(|source| unavailable.iter().any(|u| u == source))
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0))
}

/// Drop rate over the interval since the previous sample, or over the lifetime on the first one.
fn drop_rate(prev: Option<PacketTotals>, now: PacketTotals) -> f64 {
    let (processed, dropped) = match prev {
        Some(prev) if now.processed >= prev.processed && now.dropped >= prev.dropped => (
            now.processed - prev.processed,
            now.dropped - prev.dropped,
        ),
        _ => (now.processed, now.dropped),
    };
    if processed == 0 {
        return 0.0;
    }
    ((dropped as f64 / processed as f64) * 100.0).min(100.0)
}

const CPU_MARKERS: [&str; 6] = ["cpu", "package", "tctl", "tdie", "coretemp", "k10temp"];
const GPU_MARKERS: [&str; 4] = ["gpu", "nvidia", "amdgpu", "radeon"];

/// Picks the hottest CPU package sensor, falling back to any non-GPU sensor.
fn cpu_temperature(readings: &[(String, f64)]) -> Option<f64> {
    hottest_matching(readings, |label| CPU_MARKERS.iter().any(|m| label.contains(m)))
        .or_else(|| hottest_matching(readings, |_| true))
}

fn hottest_matching(readings: &[(String, f64)], pick: impl Fn(&str) -> bool) -> Option<f64> {
    readings
        .iter()
        .filter(|(label, _)| {
            let label = label.to_lowercase();
            !GPU_MARKERS.iter().any(|m| label.contains(m)) && pick(&label)
        })
        .map(|(_, temp)| *temp)
        .max_by(|a, b| a.total_cmp(b))
}

fn parse_kernel_counters(text: &str) -> Option<(u64, u64)> {
    let mut ctxt = None;
    let mut intr = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("ctxt") => ctxt = parts.next().and_then(|v| v.parse().ok()),
            Some("intr") => intr = parts.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    Some((ctxt?, intr?))
}

/// Counts ESTABLISHED sockets in a `/proc/net/tcp`-formatted table.
fn count_established(text: &str) -> u64 {
    text.lines()
        .skip(1)
        .filter(|line| line.split_whitespace().nth(3) == Some("01"))
        .count() as u64
}

#[cfg(target_os = "linux")]
fn read_kernel_counters() -> Option<(u64, u64)> {
    let text = fs::read_to_string("/proc/stat").ok()?;
    parse_kernel_counters(&text)
}

#[cfg(not(target_os = "linux"))]
fn read_kernel_counters() -> Option<(u64, u64)> {
    None
}

#[cfg(target_os = "linux")]
fn read_established_connections() -> Option<u64> {
    let v4 = fs::read_to_string("/proc/net/tcp").ok();
    let v6 = fs::read_to_string("/proc/net/tcp6").ok();
    if v4.is_none() && v6.is_none() {
        return None;
    }
    Some(
        v4.as_deref().map(count_established).unwrap_or(0)
            + v6.as_deref().map(count_established).unwrap_or(0),
    )
}

#[cfg(not(target_os = "linux"))]
fn read_established_connections() -> Option<u64> {
    None
}

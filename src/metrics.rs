use crate::state::HealthSnapshot;
use prometheus::core::Collector;
use prometheus::proto::MetricType;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub health_overall_status: Gauge,
    pub health_ready: Gauge,
    pub health_live: Gauge,
    pub health_uptime_ms: Gauge,
    pub health_memory_usage_percent: Gauge,
    pub health_cpu_usage_percent: Gauge,
    pub health_disk_usage_percent: Gauge,
    pub health_network_latency_ms: Gauge,
    pub health_active_connections: Gauge,
    pub health_metric_sources_unavailable: Gauge,
    pub health_kernel_status: Gauge,
    pub health_kernel_context_switches: Gauge,
    pub health_kernel_interrupts: Gauge,
    pub health_kernel_process_count: Gauge,
    pub health_kernel_load_average: Gauge,
    pub health_payload_status: Gauge,
    pub health_payload_packets_processed: Gauge,
    pub health_payload_packets_dropped: Gauge,
    pub health_payload_drop_rate_percent: Gauge,
    pub health_hardware_status: Gauge,
    pub health_hardware_cpu_temperature_celsius: GaugeVec,
    pub health_hardware_cpu_core_count: Gauge,
    pub health_hardware_sensor_count: Gauge,
    pub health_service_status: GaugeVec,
    pub health_service_up: GaugeVec,
    pub health_service_latency_ms: GaugeVec,
    pub health_services_total: Gauge,
    pub health_services_unhealthy: Gauge,
    pub health_http_requests_total: CounterVec,
    pub health_cycles_total: Counter,
    pub health_forced_checks_total: Counter,
    pub health_aggregation_failures_total: Counter,
    pub health_probe_failures_total: CounterVec,
    pub health_collect_fallbacks_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let health_overall_status = Gauge::with_opts(opts!(
            "health_overall_status",
            "Overall status: 0 healthy, 1 degraded, 2 unhealthy"
        ))?;
        let health_ready = Gauge::with_opts(opts!("health_ready", "Readiness flag 0/1"))?;
        let health_live = Gauge::with_opts(opts!("health_live", "Liveness flag 0/1"))?;
        let health_uptime_ms =
            Gauge::with_opts(opts!("health_uptime_ms", "Process uptime in milliseconds"))?;
        let health_memory_usage_percent = Gauge::with_opts(opts!(
            "health_memory_usage_percent",
            "Memory usage in percent (0..100)"
        ))?;
        let health_cpu_usage_percent = Gauge::with_opts(opts!(
            "health_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let health_disk_usage_percent = Gauge::with_opts(opts!(
            "health_disk_usage_percent",
            "Disk usage across mounted disks in percent (0..100)"
        ))?;
        let health_network_latency_ms = Gauge::with_opts(opts!(
            "health_network_latency_ms",
            "Connect latency to the latency target in ms"
        ))?;
        let health_active_connections = Gauge::with_opts(opts!(
            "health_active_connections",
            "Established TCP connections"
        ))?;
        let health_metric_sources_unavailable = Gauge::with_opts(opts!(
            "health_metric_sources_unavailable",
            "Resource sources that fell back to their last known value"
        ))?;
        let health_kernel_status = Gauge::with_opts(opts!(
            "health_kernel_status",
            "Kernel status: 0 healthy, 1 degraded, 2 unhealthy"
        ))?;
        let health_kernel_context_switches = Gauge::with_opts(opts!(
            "health_kernel_context_switches",
            "Context switches since boot"
        ))?;
        let health_kernel_interrupts =
            Gauge::with_opts(opts!("health_kernel_interrupts", "Interrupts since boot"))?;
        let health_kernel_process_count = Gauge::with_opts(opts!(
            "health_kernel_process_count",
            "Number of running processes"
        ))?;
        let health_kernel_load_average = Gauge::with_opts(opts!(
            "health_kernel_load_average",
            "One-minute load average"
        ))?;
        let health_payload_status = Gauge::with_opts(opts!(
            "health_payload_status",
            "Packet pipeline status: 0 healthy, 1 degraded, 2 unhealthy"
        ))?;
        let health_payload_packets_processed = Gauge::with_opts(opts!(
            "health_payload_packets_processed",
            "Packets received and transmitted across interfaces"
        ))?;
        let health_payload_packets_dropped = Gauge::with_opts(opts!(
            "health_payload_packets_dropped",
            "Packets lost to receive/transmit errors across interfaces"
        ))?;
        let health_payload_drop_rate_percent = Gauge::with_opts(opts!(
            "health_payload_drop_rate_percent",
            "Packet drop rate over the last cycle in percent"
        ))?;
        let health_hardware_status = Gauge::with_opts(opts!(
            "health_hardware_status",
            "Hardware status: 0 healthy, 1 degraded, 2 unhealthy"
        ))?;
        let health_hardware_cpu_temperature_celsius = GaugeVec::new(
            opts!(
                "health_hardware_cpu_temperature_celsius",
                "CPU temperature in Celsius; absent without a sensor"
            ),
            &["sensor"],
        )?;
        let health_hardware_cpu_core_count = Gauge::with_opts(opts!(
            "health_hardware_cpu_core_count",
            "Number of CPU cores"
        ))?;
        let health_hardware_sensor_count = Gauge::with_opts(opts!(
            "health_hardware_sensor_count",
            "Number of temperature sensors read"
        ))?;

        let health_service_status = GaugeVec::new(
            opts!(
                "health_service_status",
                "Service status: 0 healthy, 1 degraded, 2 unhealthy"
            ),
            &["service"],
        )?;
        let health_service_up = GaugeVec::new(
            opts!("health_service_up", "Service reachable (not unhealthy) 0/1"),
            &["service"],
        )?;
        let health_service_latency_ms = GaugeVec::new(
            opts!("health_service_latency_ms", "Service probe latency in ms"),
            &["service"],
        )?;
        let health_services_total =
            Gauge::with_opts(opts!("health_services_total", "Probed services"))?;
        let health_services_unhealthy = Gauge::with_opts(opts!(
            "health_services_unhealthy",
            "Probed services in unhealthy state"
        ))?;

        let health_http_requests_total = CounterVec::new(
            opts!(
                "health_http_requests_total",
                "Health endpoint requests by endpoint"
            ),
            &["endpoint"],
        )?;
        let health_cycles_total = Counter::with_opts(opts!(
            "health_cycles_total",
            "Completed aggregation cycles"
        ))?;
        let health_forced_checks_total = Counter::with_opts(opts!(
            "health_forced_checks_total",
            "Check requests, including coalesced ones"
        ))?;
        let health_aggregation_failures_total = Counter::with_opts(opts!(
            "health_aggregation_failures_total",
            "Cycles that failed outright"
        ))?;
        let health_probe_failures_total = CounterVec::new(
            opts!(
                "health_probe_failures_total",
                "Probe results other than healthy by service"
            ),
            &["service"],
        )?;
        let health_collect_fallbacks_total = Counter::with_opts(opts!(
            "health_collect_fallbacks_total",
            "Cycles that reused the previous resource reading"
        ))?;

        register(&registry, &health_overall_status)?;
        register(&registry, &health_ready)?;
        register(&registry, &health_live)?;
        register(&registry, &health_uptime_ms)?;
        register(&registry, &health_memory_usage_percent)?;
        register(&registry, &health_cpu_usage_percent)?;
        register(&registry, &health_disk_usage_percent)?;
        register(&registry, &health_network_latency_ms)?;
        register(&registry, &health_active_connections)?;
        register(&registry, &health_metric_sources_unavailable)?;
        register(&registry, &health_kernel_status)?;
        register(&registry, &health_kernel_context_switches)?;
        register(&registry, &health_kernel_interrupts)?;
        register(&registry, &health_kernel_process_count)?;
        register(&registry, &health_kernel_load_average)?;
        register(&registry, &health_payload_status)?;
        register(&registry, &health_payload_packets_processed)?;
        register(&registry, &health_payload_packets_dropped)?;
        register(&registry, &health_payload_drop_rate_percent)?;
        register(&registry, &health_hardware_status)?;
        register(&registry, &health_hardware_cpu_temperature_celsius)?;
        register(&registry, &health_hardware_cpu_core_count)?;
        register(&registry, &health_hardware_sensor_count)?;
        register(&registry, &health_service_status)?;
        register(&registry, &health_service_up)?;
        register(&registry, &health_service_latency_ms)?;
        register(&registry, &health_services_total)?;
        register(&registry, &health_services_unhealthy)?;
        register(&registry, &health_http_requests_total)?;
        register(&registry, &health_cycles_total)?;
        register(&registry, &health_forced_checks_total)?;
        register(&registry, &health_aggregation_failures_total)?;
        register(&registry, &health_probe_failures_total)?;
        register(&registry, &health_collect_fallbacks_total)?;

        Ok(Arc::new(Self {
            registry,
            health_overall_status,
            health_ready,
            health_live,
            health_uptime_ms,
            health_memory_usage_percent,
            health_cpu_usage_percent,
            health_disk_usage_percent,
            health_network_latency_ms,
            health_active_connections,
            health_metric_sources_unavailable,
            health_kernel_status,
            health_kernel_context_switches,
            health_kernel_interrupts,
            health_kernel_process_count,
            health_kernel_load_average,
            health_payload_status,
            health_payload_packets_processed,
            health_payload_packets_dropped,
            health_payload_drop_rate_percent,
            health_hardware_status,
            health_hardware_cpu_temperature_celsius,
            health_hardware_cpu_core_count,
            health_hardware_sensor_count,
            health_service_status,
            health_service_up,
            health_service_latency_ms,
            health_services_total,
            health_services_unhealthy,
            health_http_requests_total,
            health_cycles_total,
            health_forced_checks_total,
            health_aggregation_failures_total,
            health_probe_failures_total,
            health_collect_fallbacks_total,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &HealthSnapshot) {
        self.health_overall_status
            .set(f64::from(snapshot.overall_status.code()));
        self.health_ready.set(flag(snapshot.ready));
        self.health_live.set(flag(snapshot.live));
        self.health_uptime_ms.set(snapshot.uptime_ms as f64);

        let m = &snapshot.metrics;
        self.health_memory_usage_percent.set(m.memory_usage_percent);
        self.health_cpu_usage_percent.set(m.cpu_usage_percent);
        self.health_disk_usage_percent.set(m.disk_usage_percent);
        self.health_network_latency_ms.set(m.network_latency_ms);
        self.health_active_connections
            .set(m.active_connections as f64);
        self.health_metric_sources_unavailable
            .set(m.unavailable.len() as f64);

        let kernel = &snapshot.deep_system.kernel;
        self.health_kernel_status.set(f64::from(kernel.status.code()));
        self.health_kernel_context_switches
            .set(kernel.context_switches as f64);
        self.health_kernel_interrupts.set(kernel.interrupts as f64);
        self.health_kernel_process_count
            .set(kernel.process_count as f64);
        self.health_kernel_load_average.set(kernel.load_average);

        let payload = &snapshot.deep_system.payload;
        self.health_payload_status
            .set(f64::from(payload.status.code()));
        self.health_payload_packets_processed
            .set(payload.packets_processed as f64);
        self.health_payload_packets_dropped
            .set(payload.packets_dropped as f64);
        self.health_payload_drop_rate_percent
            .set(payload.drop_rate_percent);

        let hardware = &snapshot.deep_system.hardware;
        self.health_hardware_status
            .set(f64::from(hardware.status.code()));
        self.health_hardware_cpu_temperature_celsius.reset();
        if let Some(temp) = hardware.cpu_temperature_celsius {
            self.health_hardware_cpu_temperature_celsius
                .with_label_values(&["cpu"])
                .set(temp);
        }
        self.health_hardware_cpu_core_count
            .set(f64::from(hardware.cpu_core_count));
        self.health_hardware_sensor_count
            .set(f64::from(hardware.sensor_count));

        self.health_service_status.reset();
        self.health_service_up.reset();
        self.health_service_latency_ms.reset();
        let mut unhealthy = 0_u32;
        for s in &snapshot.services {
            let up = s.status != crate::state::HealthStatus::Unhealthy;
            if !up {
                unhealthy += 1;
            }
            self.health_service_status
                .with_label_values(&[&s.name])
                .set(f64::from(s.status.code()));
            self.health_service_up
                .with_label_values(&[&s.name])
                .set(flag(up));
            self.health_service_latency_ms
                .with_label_values(&[&s.name])
                .set(s.latency_ms as f64);
        }
        self.health_services_total
            .set(snapshot.services.len() as f64);
        self.health_services_unhealthy.set(f64::from(unhealthy));
    }

    pub fn set_uptime_ms(&self, uptime_ms: u64) {
        self.health_uptime_ms.set(uptime_ms as f64);
    }

    pub fn inc_request(&self, endpoint: &str) {
        self.health_http_requests_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn inc_cycle(&self) {
        self.health_cycles_total.inc();
    }

    pub fn inc_forced_check(&self) {
        self.health_forced_checks_total.inc();
    }

    pub fn inc_aggregation_failure(&self) {
        self.health_aggregation_failures_total.inc();
    }

    pub fn inc_probe_failure(&self, service: &str) {
        self.health_probe_failures_total
            .with_label_values(&[service])
            .inc();
    }

    pub fn inc_collect_fallback(&self) {
        self.health_collect_fallbacks_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Same series as [`Metrics::encode_metrics`], keyed `name{label="value"}`.
    pub fn flat_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for family in self.registry.gather() {
            let name = family.get_name();
            for metric in family.get_metric() {
                let labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}=\"{}\"", l.get_name(), l.get_value()))
                    .collect();
                let key = if labels.is_empty() {
                    name.to_string()
                } else {
                    format!("{name}{{{}}}", labels.join(","))
                };
                let value = match family.get_field_type() {
                    MetricType::COUNTER => metric.get_counter().get_value(),
                    MetricType::GAUGE => metric.get_gauge().get_value(),
                    _ => continue,
                };
                out.insert(key, Value::from(value));
            }
        }
        out
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

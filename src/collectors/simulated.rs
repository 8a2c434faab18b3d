use crate::collectors::{CollectError, Collected, MetricsCollector};
use crate::state::{
    DeepSystemStatus, HardwareStatus, HealthStatus, KernelStatus, PayloadStatus, ResourceMetrics,
};
use async_trait::async_trait;
use rand::Rng;

/// Random readings in nominal ranges, for dashboard demos and tests.
#[derive(Debug, Default)]
pub struct SimulatedCollector;

#[async_trait]
impl MetricsCollector for SimulatedCollector {
    async fn collect(&self) -> Result<Collected, CollectError> {
        Ok(simulate(&mut rand::thread_rng()))
    }
}

fn simulate(rng: &mut impl Rng) -> Collected {
    let packets_processed = rng.gen_range(100_000..1_000_000_u64);
    let packets_dropped = rng.gen_range(0..50_u64);
    Collected {
        metrics: ResourceMetrics {
            memory_usage_percent: rng.gen_range(20.0..70.0),
            cpu_usage_percent: rng.gen_range(5.0..60.0),
            disk_usage_percent: rng.gen_range(30.0..75.0),
            network_latency_ms: rng.gen_range(1.0..80.0),
            active_connections: rng.gen_range(1..200),
            unavailable: Vec::new(),
        },
        deep: DeepSystemStatus {
            kernel: KernelStatus {
                status: HealthStatus::Healthy,
                context_switches: rng.gen_range(10_000..5_000_000),
                interrupts: rng.gen_range(10_000..2_000_000),
                process_count: rng.gen_range(80..400),
                load_average: rng.gen_range(0.1..2.0),
            },
            payload: PayloadStatus {
                status: HealthStatus::Healthy,
                packets_processed,
                packets_dropped,
                drop_rate_percent: packets_dropped as f64 / packets_processed as f64 * 100.0,
            },
            hardware: HardwareStatus {
                status: HealthStatus::Healthy,
                cpu_temperature_celsius: Some(rng.gen_range(35.0..70.0)),
                cpu_core_count: 8,
                sensor_count: 6,
            },
        },
    }
}

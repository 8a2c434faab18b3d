use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the metrics exporter: 0 healthy, 1 degraded, 2 unhealthy.
    pub fn code(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Worst of two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub checked_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceCheckResult {
    pub fn new(name: impl Into<String>, status: HealthStatus, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            status,
            latency_ms,
            checked_at: timestamp_now(),
            error: None,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        status: HealthStatus,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(name, status, latency_ms)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub network_latency_ms: f64,
    pub active_connections: u64,
    /// Sources that could not be read this cycle; their fields carry the last known value.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelStatus {
    pub status: HealthStatus,
    pub context_switches: u64,
    pub interrupts: u64,
    pub process_count: u64,
    pub load_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
    pub status: HealthStatus,
    pub packets_processed: u64,
    pub packets_dropped: u64,
    pub drop_rate_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    pub status: HealthStatus,
    pub cpu_temperature_celsius: Option<f64>,
    pub cpu_core_count: u32,
    pub sensor_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSystemStatus {
    pub kernel: KernelStatus,
    pub payload: PayloadStatus,
    pub hardware: HardwareStatus,
}

impl DeepSystemStatus {
    /// Placeholder used before the first successful collection.
    pub fn unknown() -> Self {
        Self {
            kernel: KernelStatus {
                status: HealthStatus::Degraded,
                context_switches: 0,
                interrupts: 0,
                process_count: 0,
                load_average: 0.0,
            },
            payload: PayloadStatus {
                status: HealthStatus::Degraded,
                packets_processed: 0,
                packets_dropped: 0,
                drop_rate_percent: 0.0,
            },
            hardware: HardwareStatus {
                status: HealthStatus::Degraded,
                cpu_temperature_celsius: None,
                cpu_core_count: 0,
                sensor_count: 0,
            },
        }
    }

    pub fn statuses(&self) -> [HealthStatus; 3] {
        [self.kernel.status, self.payload.status, self.hardware.status]
    }

    pub fn force_degraded(&mut self) {
        self.kernel.status = self.kernel.status.worst(HealthStatus::Degraded);
        self.payload.status = self.payload.status.worst(HealthStatus::Degraded);
        self.hardware.status = self.hardware.status.worst(HealthStatus::Degraded);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub overall_status: HealthStatus,
    pub timestamp: String,
    pub uptime_ms: u64,
    pub version: String,
    pub environment: String,
    pub services: Vec<ServiceCheckResult>,
    pub metrics: ResourceMetrics,
    pub deep_system: DeepSystemStatus,
    pub ready: bool,
    pub live: bool,
}

impl HealthSnapshot {
    /// Snapshot served before the first cycle completes: alive, not ready.
    pub fn initial(version: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            overall_status: HealthStatus::Degraded,
            timestamp: timestamp_now(),
            uptime_ms: 0,
            version: version.into(),
            environment: environment.into(),
            services: Vec::new(),
            metrics: ResourceMetrics::default(),
            deep_system: DeepSystemStatus::unknown(),
            ready: false,
            live: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    Checking = 1,
    Publishing = 2,
}

impl CyclePhase {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CyclePhase::Checking,
            2 => CyclePhase::Publishing,
            _ => CyclePhase::Idle,
        }
    }
}

pub fn timestamp_now() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

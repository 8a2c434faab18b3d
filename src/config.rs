use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_deep_probe_timeout_ms")]
    pub deep_probe_timeout_ms: u64,
    #[serde(default = "default_collect_timeout_ms")]
    pub collect_timeout_ms: u64,
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_ms: u64,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Services gating readiness. `None` means every configured service.
    #[serde(default)]
    pub critical_services: Option<Vec<String>>,
    #[serde(default)]
    pub latency_target: Option<String>,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Deep checks get the longer deep-probe timeout by default.
    #[serde(default)]
    pub deep: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointConfig {
    Http { url: String },
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_memory_degraded_percent")]
    pub memory_degraded_percent: f64,
    #[serde(default = "default_memory_unhealthy_percent")]
    pub memory_unhealthy_percent: f64,
    #[serde(default = "default_cpu_degraded_percent")]
    pub cpu_degraded_percent: f64,
    #[serde(default = "default_cpu_unhealthy_percent")]
    pub cpu_unhealthy_percent: f64,
    #[serde(default = "default_disk_degraded_percent")]
    pub disk_degraded_percent: f64,
    #[serde(default = "default_disk_unhealthy_percent")]
    pub disk_unhealthy_percent: f64,
    #[serde(default = "default_network_latency_unhealthy_ms")]
    pub network_latency_unhealthy_ms: f64,
    #[serde(default = "default_ready_memory_percent")]
    pub ready_memory_percent: f64,
    #[serde(default = "default_ready_disk_percent")]
    pub ready_disk_percent: f64,
    #[serde(default = "default_live_memory_percent")]
    pub live_memory_percent: f64,
    #[serde(default = "default_live_disk_percent")]
    pub live_disk_percent: f64,
    #[serde(default = "default_load_per_core_degraded")]
    pub load_per_core_degraded: f64,
    #[serde(default = "default_load_per_core_unhealthy")]
    pub load_per_core_unhealthy: f64,
    #[serde(default = "default_packet_drop_degraded_percent")]
    pub packet_drop_degraded_percent: f64,
    #[serde(default = "default_packet_drop_unhealthy_percent")]
    pub packet_drop_unhealthy_percent: f64,
    #[serde(default = "default_cpu_temp_degraded_celsius")]
    pub cpu_temp_degraded_celsius: f64,
    #[serde(default = "default_cpu_temp_unhealthy_celsius")]
    pub cpu_temp_unhealthy_celsius: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            deep_probe_timeout_ms: default_deep_probe_timeout_ms(),
            collect_timeout_ms: default_collect_timeout_ms(),
            slow_response_ms: default_slow_response_ms(),
            version: default_version(),
            environment: default_environment(),
            services: Vec::new(),
            critical_services: None,
            latency_target: None,
            thresholds: ThresholdsConfig::default(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            memory_degraded_percent: default_memory_degraded_percent(),
            memory_unhealthy_percent: default_memory_unhealthy_percent(),
            cpu_degraded_percent: default_cpu_degraded_percent(),
            cpu_unhealthy_percent: default_cpu_unhealthy_percent(),
            disk_degraded_percent: default_disk_degraded_percent(),
            disk_unhealthy_percent: default_disk_unhealthy_percent(),
            network_latency_unhealthy_ms: default_network_latency_unhealthy_ms(),
            ready_memory_percent: default_ready_memory_percent(),
            ready_disk_percent: default_ready_disk_percent(),
            live_memory_percent: default_live_memory_percent(),
            live_disk_percent: default_live_disk_percent(),
            load_per_core_degraded: default_load_per_core_degraded(),
            load_per_core_unhealthy: default_load_per_core_unhealthy(),
            packet_drop_degraded_percent: default_packet_drop_degraded_percent(),
            packet_drop_unhealthy_percent: default_packet_drop_unhealthy_percent(),
            cpu_temp_degraded_celsius: default_cpu_temp_degraded_celsius(),
            cpu_temp_unhealthy_celsius: default_cpu_temp_unhealthy_celsius(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} in environment variable {name}")]
    Env { name: String, value: String },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    /// Loads the optional file, layers `HEALTH_*` variables on top and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("HEALTH_LISTEN") {
            self.listen = v.trim().to_string();
        }
        if let Some(v) = var("HEALTH_ENVIRONMENT") {
            self.environment = v.trim().to_string();
        }
        if let Some(v) = var("HEALTH_VERSION") {
            self.version = v.trim().to_string();
        }
        if let Some(v) = var("HEALTH_CRITICAL_SERVICES") {
            self.critical_services = Some(
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        let ms_vars: [(&str, &mut u64); 4] = [
            ("HEALTH_CHECK_INTERVAL_MS", &mut self.interval_ms),
            ("HEALTH_PROBE_TIMEOUT_MS", &mut self.probe_timeout_ms),
            ("HEALTH_DEEP_PROBE_TIMEOUT_MS", &mut self.deep_probe_timeout_ms),
            ("HEALTH_COLLECT_TIMEOUT_MS", &mut self.collect_timeout_ms),
        ];
        for (name, slot) in ms_vars {
            if let Some(v) = var(name) {
                *slot = parse_env(name, &v)?;
            }
        }

        let t = &mut self.thresholds;
        let threshold_vars: [(&str, &mut f64); 11] = [
            ("HEALTH_MEMORY_DEGRADED_PERCENT", &mut t.memory_degraded_percent),
            ("HEALTH_MEMORY_UNHEALTHY_PERCENT", &mut t.memory_unhealthy_percent),
            ("HEALTH_CPU_DEGRADED_PERCENT", &mut t.cpu_degraded_percent),
            ("HEALTH_CPU_UNHEALTHY_PERCENT", &mut t.cpu_unhealthy_percent),
            ("HEALTH_DISK_DEGRADED_PERCENT", &mut t.disk_degraded_percent),
            ("HEALTH_DISK_UNHEALTHY_PERCENT", &mut t.disk_unhealthy_percent),
            (
                "HEALTH_NETWORK_LATENCY_UNHEALTHY_MS",
                &mut t.network_latency_unhealthy_ms,
            ),
            ("HEALTH_READY_MEMORY_PERCENT", &mut t.ready_memory_percent),
            ("HEALTH_READY_DISK_PERCENT", &mut t.ready_disk_percent),
            ("HEALTH_LIVE_MEMORY_PERCENT", &mut t.live_memory_percent),
            ("HEALTH_LIVE_DISK_PERCENT", &mut t.live_disk_percent),
        ];
        for (name, slot) in threshold_vars {
            if let Some(v) = var(name) {
                *slot = parse_env(name, &v)?;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "interval_ms must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("deep_probe_timeout_ms", self.deep_probe_timeout_ms),
            ("collect_timeout_ms", self.collect_timeout_ms),
            ("slow_response_ms", self.slow_response_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }
        if self.collect_timeout_ms > self.interval_ms {
            return Err(ConfigError::Validation(
                "collect_timeout_ms must not exceed interval_ms".to_string(),
            ));
        }
        if let Some(target) = &self.latency_target {
            if target.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "latency_target must not be empty".to_string(),
                ));
            }
        }

        validate_services(&self.services, self.critical_services.as_deref())?;
        validate_thresholds(&self.thresholds)?;

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }

    /// Connect bound for `latency_target`: half the collection timeout.
    pub fn latency_timeout(&self) -> Duration {
        self.collect_timeout() / 2
    }

    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.slow_response_ms)
    }

    pub fn service_timeout(&self, service: &ServiceConfig) -> Duration {
        let fallback = if service.deep {
            self.deep_probe_timeout_ms
        } else {
            self.probe_timeout_ms
        };
        Duration::from_millis(service.timeout_ms.unwrap_or(fallback))
    }

    /// Names of services that gate readiness.
    pub fn critical_service_names(&self) -> Vec<String> {
        match &self.critical_services {
            Some(names) => names.clone(),
            None => self.services.iter().map(|s| s.name.clone()).collect(),
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn validate_services(
    services: &[ServiceConfig],
    critical: Option<&[String]>,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for service in services {
        if service.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(service.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "service name '{}' must be unique",
                service.name
            )));
        }
        if service.timeout_ms == Some(0) {
            return Err(ConfigError::Validation(format!(
                "service '{}' timeout_ms must be > 0",
                service.name
            )));
        }
        match &service.endpoint {
            EndpointConfig::Http { url } if url.trim().is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "service '{}' url must not be empty",
                    service.name
                )));
            }
            EndpointConfig::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "service '{}' host must not be empty",
                        service.name
                    )));
                }
                if *port == 0 {
                    return Err(ConfigError::Validation(format!(
                        "service '{}' port must be in 1..65535",
                        service.name
                    )));
                }
            }
            EndpointConfig::Http { .. } => {}
        }
    }

    for name in critical.unwrap_or_default() {
        if !names.contains(name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "critical service '{name}' is not a configured service"
            )));
        }
    }
    Ok(())
}

fn validate_thresholds(t: &ThresholdsConfig) -> Result<(), ConfigError> {
    let percents = [
        ("memory_degraded_percent", t.memory_degraded_percent),
        ("memory_unhealthy_percent", t.memory_unhealthy_percent),
        ("cpu_degraded_percent", t.cpu_degraded_percent),
        ("cpu_unhealthy_percent", t.cpu_unhealthy_percent),
        ("disk_degraded_percent", t.disk_degraded_percent),
        ("disk_unhealthy_percent", t.disk_unhealthy_percent),
        ("ready_memory_percent", t.ready_memory_percent),
        ("ready_disk_percent", t.ready_disk_percent),
        ("live_memory_percent", t.live_memory_percent),
        ("live_disk_percent", t.live_disk_percent),
        ("packet_drop_degraded_percent", t.packet_drop_degraded_percent),
        ("packet_drop_unhealthy_percent", t.packet_drop_unhealthy_percent),
    ];
    for (name, value) in percents {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name} must be in 0..100"
            )));
        }
    }
    if t.network_latency_unhealthy_ms <= 0.0 {
        return Err(ConfigError::Validation(
            "thresholds.network_latency_unhealthy_ms must be > 0".to_string(),
        ));
    }

    let pairs = [
        (
            "memory",
            t.memory_degraded_percent,
            t.memory_unhealthy_percent,
        ),
        ("cpu", t.cpu_degraded_percent, t.cpu_unhealthy_percent),
        ("disk", t.disk_degraded_percent, t.disk_unhealthy_percent),
        (
            "load_per_core",
            t.load_per_core_degraded,
            t.load_per_core_unhealthy,
        ),
        (
            "packet_drop",
            t.packet_drop_degraded_percent,
            t.packet_drop_unhealthy_percent,
        ),
        (
            "cpu_temp",
            t.cpu_temp_degraded_celsius,
            t.cpu_temp_unhealthy_celsius,
        ),
    ];
    for (name, degraded, unhealthy) in pairs {
        if degraded > unhealthy {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name}: degraded threshold must not exceed unhealthy threshold"
            )));
        }
    }

    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_interval_ms() -> u64 {
    30_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_deep_probe_timeout_ms() -> u64 {
    10_000
}

const fn default_collect_timeout_ms() -> u64 {
    5_000
}

const fn default_slow_response_ms() -> u64 {
    5_000
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

const fn default_memory_degraded_percent() -> f64 {
    80.0
}

const fn default_memory_unhealthy_percent() -> f64 {
    90.0
}

const fn default_cpu_degraded_percent() -> f64 {
    80.0
}

const fn default_cpu_unhealthy_percent() -> f64 {
    90.0
}

const fn default_disk_degraded_percent() -> f64 {
    85.0
}

const fn default_disk_unhealthy_percent() -> f64 {
    95.0
}

const fn default_network_latency_unhealthy_ms() -> f64 {
    1000.0
}

const fn default_ready_memory_percent() -> f64 {
    95.0
}

const fn default_ready_disk_percent() -> f64 {
    98.0
}

const fn default_live_memory_percent() -> f64 {
    98.0
}

const fn default_live_disk_percent() -> f64 {
    99.0
}

const fn default_load_per_core_degraded() -> f64 {
    1.5
}

const fn default_load_per_core_unhealthy() -> f64 {
    3.0
}

const fn default_packet_drop_degraded_percent() -> f64 {
    1.0
}

const fn default_packet_drop_unhealthy_percent() -> f64 {
    5.0
}

const fn default_cpu_temp_degraded_celsius() -> f64 {
    80.0
}

const fn default_cpu_temp_unhealthy_celsius() -> f64 {
    95.0
}

//! Configuration types for smart-conn.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cloudflare API client configuration.
    pub cloudflare: CloudflareConfig,

    /// Probe service configuration.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Failover service configuration.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Cloudflare API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    /// API token, or a Global API Key when paired with `email`.
    pub api_key: String,

    /// Account email; required only for Global API Key authentication.
    #[serde(default)]
    pub email: Option<String>,

    /// Cloudflare API base URL.
    #[serde(default = "default_cloudflare_base")]
    pub api_base: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Probe service (check-host style) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe service base URL.
    #[serde(default = "default_probe_base")]
    pub api_base: String,

    /// Delay between submitting a ping job and fetching its results, in seconds.
    #[serde(default = "default_fetch_delay")]
    pub fetch_delay_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Failover service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding the pool and monitor config documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of concurrent failover runs.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Warm-up delay before the first scheduled run of each timer, in seconds.
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_secs: u64,

    /// Addresses used to seed the reserve pool on first load.
    #[serde(default)]
    pub seed_reserve: Vec<String>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "smart_conn=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            api_base: default_probe_base(),
            fetch_delay_secs: default_fetch_delay(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_concurrent_runs: default_max_concurrent_runs(),
            warmup_delay_secs: default_warmup_delay(),
            seed_reserve: Vec::new(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_cloudflare_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_probe_base() -> String {
    "https://check-host.net".to_string()
}

fn default_fetch_delay() -> u64 {
    10
}

fn default_http_timeout() -> u64 {
    20
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_concurrent_runs() -> usize {
    5
}

fn default_warmup_delay() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "smart-conn".to_string()
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shadow forwarder.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the shadow forwarder.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShadowConfig {
    /// Packet capture settings (device, filter port).
    pub capture: CaptureConfig,

    /// Sampling policy applied to every extracted request.
    pub sampling: SamplingConfig,

    /// Host header -> destination base URL.
    pub routes: HashMap<String, String>,

    /// Flow reassembly limits and eviction timing.
    pub reassembly: ReassemblyConfig,

    /// Outbound dispatch settings.
    pub forward: ForwardConfig,

    /// Load balancer health-check listener.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Packet capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Network interface to capture on.
    pub interface: String,

    /// Replay a capture file instead of opening a live device.
    pub pcap_file: Option<String>,

    /// Snapshot length in bytes.
    pub snaplen: i32,

    /// Open the device in promiscuous mode.
    pub promiscuous: bool,

    /// Only TCP segments addressed to this port are captured.
    pub filter_port: i64,

    /// Capacity of the capture -> ingestion channel, in segments.
    pub channel_capacity: usize,

    /// Strip a VXLAN header when the mirror is captured on the underlay.
    pub decap_vxlan: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "vxlan0".to_string(),
            pcap_file: None,
            snaplen: 8951,
            promiscuous: true,
            filter_port: 80,
            channel_capacity: 65_536,
            decap_vxlan: true,
        }
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Percentage of requests (or keys) to forward, 0 to 100.
    pub percentage: f64,

    /// Sampling key selector: "" (random), "header" or "remoteaddr".
    pub by: String,

    /// Header to sample by when `by` is "header".
    pub header: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            percentage: 100.0,
            by: String::new(),
            header: String::new(),
        }
    }
}

/// Reassembly configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Flows without activity for this long are evicted.
    pub idle_timeout_secs: u64,

    /// How often the eviction sweep runs.
    pub flush_interval_secs: u64,

    /// Out-of-order bytes a single flow may hold before it is dropped.
    pub max_buffered_bytes_per_flow: usize,

    /// Undelivered bytes a flow's reader may lag behind before it is dropped.
    pub max_stream_backlog_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            flush_interval_secs: 60,
            max_buffered_bytes_per_flow: 4 * 1024 * 1024,
            max_stream_backlog_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Total time allowed for one shadow request, response drain included.
    pub timeout_secs: u64,

    /// Idle pooled connections are closed after this long.
    pub pool_idle_timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_idle_timeout_secs: 90,
        }
    }
}

/// Health-check listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the accept-and-close listener.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:4789").
    pub bind_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:4789".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period for in-flight forwards once capture has ended.
    pub drain_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_secs: 2 }
    }
}

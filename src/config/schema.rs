//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the image proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Outbound fetch settings.
    pub origin: OriginConfig,

    /// Compress-vs-bypass thresholds and transcoder options.
    pub compression: CompressionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// `user-agent` sent to every origin.
    pub user_agent: String,

    /// Redirect hops followed automatically before giving up.
    pub max_redirects: usize,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            user_agent: "Bandwidth-Hero Compressor".to_string(),
            max_redirects: 4,
        }
    }
}

/// Compression decision and transcoder settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Smallest origin body worth transcoding to WebP, in bytes.
    pub min_compress_length: u64,

    /// Smallest PNG/GIF body worth transcoding to JPEG, in bytes.
    /// JPEG loses transparency, so small transparent images are passed through.
    pub min_transparent_compress_length: u64,

    /// Largest origin body the proxy will buffer for transcoding.
    pub max_input_bytes: u64,

    /// Keep every frame of animated GIF/WebP inputs when producing WebP.
    pub animate: bool,

    /// Largest image width or height the transcoder will decode.
    pub max_dimension: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_compress_length: 1024,
            min_transparent_compress_length: 1024 * 100,
            max_input_bytes: 32 * 1024 * 1024,
            animate: true,
            max_dimension: 16383,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the origin to send response headers, in seconds.
    pub origin_response_secs: u64,

    /// Time allowed for the proxy to produce response headers, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            origin_response_secs: 20,
            request_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

// src/observability/mod.rs
//! Logging and metrics setup
//!
//! The library itself only emits through `tracing` and `metrics` macros; the
//! host process decides whether to install subscribers via these helpers.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{PolicyError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Metric names emitted by the policy layer
pub mod names {
    pub const DISPATCH_TOTAL: &str = "policy_dispatch_total";
    pub const HANDLER_FAULTS_TOTAL: &str = "policy_handler_faults_total";
    pub const AUDIT_ACCEPTED_TOTAL: &str = "audit_entries_accepted_total";
    pub const AUDIT_DROPPED_TOTAL: &str = "audit_entries_dropped_total";
    pub const GATE_CALLS_TOTAL: &str = "arbitration_gate_calls_total";
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| PolicyError::ConfigError(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| PolicyError::ConfigError(format!("Tracing already initialized: {}", e)))
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PolicyError::ConfigError(format!("Failed to install metrics recorder: {}", e)))
}

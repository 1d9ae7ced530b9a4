//! Prometheus metrics HTTP endpoint.
//!
//! Uses the built-in HTTP listener of `metrics-exporter-prometheus`.
//! Once installed, every `metrics::counter!()` / `gauge!()` / `histogram!()`
//! call in the distributor is exported on `http://{listen_addr}:{port}/metrics`.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use logrelay_core::config::MetricsConfig;
use logrelay_core::metrics as m;

/// Resolve the listen address from `[metrics]`.
///
/// # Errors
///
/// - `endpoint` is anything other than `/metrics` (the exporter serves one fixed path)
/// - `listen_addr:port` is not a valid socket address
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {e}"))
}

/// Install the global Prometheus recorder and start its HTTP listener.
///
/// Call at most once per process.
///
/// # Errors
///
/// - Invalid address or endpoint (see [`listen_addr`])
/// - Socket binding fails or a global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<SocketAddr> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::DISTRIBUTOR_DELIVERY_DURATION_SECONDS.to_owned()),
            &m::DELIVERY_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {e}"))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(addr)
}

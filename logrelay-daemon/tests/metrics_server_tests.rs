//! Integration tests for the metrics endpoint.
//!
//! The Prometheus recorder is process-global, so only one test installs it.

use logrelay_core::config::MetricsConfig;
use logrelay_daemon::metrics_server;
use serial_test::serial;

fn metrics_config(listen_addr: &str, port: u16, endpoint: &str) -> MetricsConfig {
    MetricsConfig {
        enabled: true,
        listen_addr: listen_addr.to_owned(),
        port,
        endpoint: endpoint.to_owned(),
    }
}

#[test]
#[serial]
fn install_succeeds_then_second_install_fails() {
    // Given: a valid configuration on a non-standard port
    let config = metrics_config("127.0.0.1", 19180, "/metrics");

    // When: installing twice
    let first = metrics_server::install_metrics_recorder(&config);
    let second = metrics_server::install_metrics_recorder(&metrics_config(
        "127.0.0.1",
        19181,
        "/metrics",
    ));

    // Then: only one global recorder may exist
    assert!(first.is_ok(), "first install failed: {:?}", first.err());
    assert_eq!(first.unwrap().port(), 19180);
    assert!(second.is_err(), "second install should fail");
}

#[test]
#[serial]
fn install_fails_with_invalid_address() {
    let config = metrics_config("999.999.999.999", 19182, "/metrics");

    let result = metrics_server::install_metrics_recorder(&config);

    assert!(result.is_err());
}

#[test]
#[serial]
fn install_rejects_unsupported_endpoint() {
    let config = metrics_config("127.0.0.1", 19183, "/custom");

    let err = metrics_server::install_metrics_recorder(&config)
        .unwrap_err()
        .to_string();

    assert!(err.contains("/custom"), "got: {err}");
}

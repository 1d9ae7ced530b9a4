//! logrelay.toml 통합 설정 테스트
//!
//! - logrelay.toml.example 파싱 테스트
//! - 파일 로딩 + 환경변수 우선순위 테스트
//! - 잘못된 analyzer 목록 에러 테스트

use std::io::Write;

use logrelay_core::config::LogRelayConfig;
use logrelay_core::error::{ConfigError, LogRelayError};
use serial_test::serial;

const EXAMPLE: &str = include_str!("../../../logrelay.toml.example");

// =============================================================================
// logrelay.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = LogRelayConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.general.pid_file, "/var/run/logrelay/logrelay.pid");
}

#[test]
fn example_config_passes_validation() {
    let config = LogRelayConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_lists_four_weighted_analyzers() {
    let config = LogRelayConfig::parse(EXAMPLE).expect("should parse");

    let ids: Vec<&str> = config.analyzers.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["A1", "A2", "A3", "A4"]);

    let total: f64 = config.analyzers.iter().map(|a| a.weight).sum();
    assert!((total - 1.0).abs() < 1e-9);

    assert_eq!(config.analyzers[3].max_failures, 5);
    assert_eq!(config.analyzers[3].health_check_timeout_ms, 2000);
    assert_eq!(config.analyzers[0].health_check_timeout_ms, 3000);
}

#[test]
fn example_config_matches_engine_defaults() {
    let config = LogRelayConfig::parse(EXAMPLE).expect("should parse");
    let defaults = LogRelayConfig::default();

    assert_eq!(config.distribution.batch_size, defaults.distribution.batch_size);
    assert_eq!(config.distribution.max_retries, defaults.distribution.max_retries);
    assert_eq!(
        config.distribution.retry_delay_ms,
        defaults.distribution.retry_delay_ms
    );
    assert_eq!(config.health_check.interval_ms, defaults.health_check.interval_ms);
}

// =============================================================================
// 파일 로딩
// =============================================================================

#[tokio::test]
#[serial]
async fn load_applies_env_overrides_over_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(EXAMPLE.as_bytes()).expect("write config");

    // SAFETY: serial_test로 환경변수 경합 방지
    unsafe {
        std::env::set_var("LOGRELAY_DISTRIBUTION_MAX_RETRIES", "5");
    }
    let result = LogRelayConfig::load(file.path()).await;
    unsafe {
        std::env::remove_var("LOGRELAY_DISTRIBUTION_MAX_RETRIES");
    }

    let config = result.expect("load should succeed");
    assert_eq!(config.distribution.max_retries, 5);
    assert_eq!(config.analyzers.len(), 4);
}

#[tokio::test]
#[serial]
async fn load_rejects_malformed_analyzer_list() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(
        br#"
[[analyzers]]
id = "A1"
endpoint = "ftp://localhost:3001"
weight = 1.0
"#,
    )
    .expect("write config");

    let err = LogRelayConfig::load(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        LogRelayError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn analyzer_without_weight_fails_to_parse() {
    let err = LogRelayConfig::parse(
        r#"
[[analyzers]]
id = "A1"
endpoint = "http://localhost:3001"
"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LogRelayError::Config(ConfigError::ParseFailed { .. })
    ));
}

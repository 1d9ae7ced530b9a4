//! 분배 엔진 설정
//!
//! [`EngineConfig`]는 core의 [`DistributionConfig`](logrelay_core::config::DistributionConfig)와
//! [`HealthCheckConfig`](logrelay_core::config::HealthCheckConfig)를 `Duration` 기반으로
//! 변환한 엔진 전용 설정입니다.
//!
//! # 사용 예시
//! ```ignore
//! use logrelay_core::config::LogRelayConfig;
//! use logrelay_distributor::config::EngineConfig;
//!
//! let core = LogRelayConfig::default();
//! let config = EngineConfig::from_core(&core.distribution, &core.health_check);
//! ```

use std::time::Duration;

use logrelay_core::config::{AnalyzerConfig, DistributionConfig, HealthCheckConfig};

use crate::error::DistributorError;

/// 분배 엔진 설정
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// 한 배치에서 동시에 전달할 최대 패킷 수
    pub batch_size: usize,
    /// 큐가 남아 있을 때 배치 사이 대기 시간
    pub processing_interval: Duration,
    /// 패킷당 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 기본 지연
    pub retry_delay: Duration,
    /// 단일 전달 타임아웃
    pub delivery_timeout: Duration,
    /// 헬스 체크 주기
    pub health_check_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_core(&DistributionConfig::default(), &HealthCheckConfig::default())
    }
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(distribution: &DistributionConfig, health: &HealthCheckConfig) -> Self {
        Self {
            batch_size: distribution.batch_size,
            processing_interval: Duration::from_millis(distribution.processing_interval_ms),
            max_retries: distribution.max_retries,
            retry_delay: Duration::from_millis(distribution.retry_delay_ms),
            delivery_timeout: Duration::from_millis(distribution.delivery_timeout_ms),
            health_check_interval: Duration::from_millis(health.interval_ms),
        }
    }

    /// `retry_count`번째 재시도 전 대기 시간 (`retry_delay * 2^retry_count`)
    ///
    /// 오버플로우 시 포화됩니다.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DistributorError> {
        if self.batch_size == 0 {
            return Err(config_error("batch_size", "must be greater than 0"));
        }
        if self.processing_interval.is_zero() {
            return Err(config_error("processing_interval", "must be greater than 0"));
        }
        if self.delivery_timeout.is_zero() {
            return Err(config_error("delivery_timeout", "must be greater than 0"));
        }
        if self.health_check_interval.is_zero() {
            return Err(config_error(
                "health_check_interval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// analyzer별 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOptions {
    /// 실패 임계치
    pub max_failures: u32,
    /// 헬스 프로브 타임아웃
    pub health_check_timeout: Duration,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            max_failures: 3,
            health_check_timeout: Duration::from_secs(3),
        }
    }
}

/// 레지스트리 등록 요청
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSpec {
    pub id: String,
    pub endpoint: String,
    pub weight: f64,
    pub options: AnalyzerOptions,
}

impl AnalyzerSpec {
    /// 기본 옵션으로 등록 요청을 생성합니다.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            weight,
            options: AnalyzerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.options = options;
        self
    }

    /// `[[analyzers]]` 설정 항목에서 변환합니다.
    pub fn from_core(core: &AnalyzerConfig) -> Self {
        Self {
            id: core.id.clone(),
            endpoint: core.endpoint.trim_end_matches('/').to_owned(),
            weight: core.weight,
            options: AnalyzerOptions {
                max_failures: core.max_failures,
                health_check_timeout: Duration::from_millis(core.health_check_timeout_ms),
            },
        }
    }
}

/// 엔진 설정 빌더
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn processing_interval(mut self, interval: Duration) -> Self {
        self.config.processing_interval = interval;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<EngineConfig, DistributorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn config_error(field: &str, reason: &str) -> DistributorError {
    DistributorError::Config {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

//! 설정 관리 -- logrelay.toml 파싱 및 런타임 설정
//!
//! [`LogRelayConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGRELAY_DISTRIBUTION_BATCH_SIZE=20` 형식)
//! 3. 설정 파일 (`logrelay.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logrelay_core::error::LogRelayError> {
//! use logrelay_core::config::LogRelayConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogRelayConfig::load("logrelay.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogRelayConfig::parse("[distribution]\nbatch_size = 20")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogRelayError};

/// LogRelay 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRelayConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 분배 엔진 설정
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// 헬스 체크 설정
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// 메트릭 엔드포인트 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// analyzer 목록
    #[serde(default)]
    pub analyzers: Vec<AnalyzerConfig>,
}

impl LogRelayConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogRelayError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogRelayError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogRelayError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogRelayError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogRelayError> {
        toml::from_str(toml_str).map_err(|e| {
            LogRelayError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGRELAY_{SECTION}_{FIELD}`
    /// analyzer 목록은 환경변수로 오버라이드하지 않습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGRELAY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGRELAY_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LOGRELAY_GENERAL_PID_FILE");

        // Distribution
        override_usize(
            &mut self.distribution.batch_size,
            "LOGRELAY_DISTRIBUTION_BATCH_SIZE",
        );
        override_u64(
            &mut self.distribution.processing_interval_ms,
            "LOGRELAY_DISTRIBUTION_PROCESSING_INTERVAL_MS",
        );
        override_u32(
            &mut self.distribution.max_retries,
            "LOGRELAY_DISTRIBUTION_MAX_RETRIES",
        );
        override_u64(
            &mut self.distribution.retry_delay_ms,
            "LOGRELAY_DISTRIBUTION_RETRY_DELAY_MS",
        );
        override_u64(
            &mut self.distribution.delivery_timeout_ms,
            "LOGRELAY_DISTRIBUTION_DELIVERY_TIMEOUT_MS",
        );

        // Health check
        override_u64(
            &mut self.health_check.interval_ms,
            "LOGRELAY_HEALTH_CHECK_INTERVAL_MS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGRELAY_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LOGRELAY_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LOGRELAY_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogRelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid_value(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid_value(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.distribution.validate()?;

        if self.health_check.interval_ms == 0 {
            return Err(invalid_value(
                "health_check.interval_ms",
                "must be greater than 0",
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid_value(
                "metrics.port",
                "must be non-zero when metrics are enabled",
            ));
        }

        let mut seen = HashSet::new();
        for (index, analyzer) in self.analyzers.iter().enumerate() {
            analyzer.validate(index)?;
            if !seen.insert(analyzer.id.as_str()) {
                return Err(invalid_value(
                    format!("analyzers[{index}].id"),
                    format!("duplicate analyzer id '{}'", analyzer.id),
                ));
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 분배 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// 한 배치에서 동시에 전달할 최대 패킷 수
    pub batch_size: usize,
    /// 큐가 남아 있을 때 배치 사이 대기 시간 (밀리초)
    pub processing_interval_ms: u64,
    /// 패킷당 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 기본 지연 (밀리초, 시도마다 2배)
    pub retry_delay_ms: u64,
    /// 단일 전달 타임아웃 (밀리초)
    pub delivery_timeout_ms: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            processing_interval_ms: 50,
            max_retries: 3,
            retry_delay_ms: 1000,
            delivery_timeout_ms: 5000,
        }
    }
}

impl DistributionConfig {
    fn validate(&self) -> Result<(), LogRelayError> {
        const MAX_BATCH_SIZE: usize = 10_000;

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(invalid_value(
                "distribution.batch_size",
                format!("must be 1-{MAX_BATCH_SIZE}"),
            ));
        }
        if self.processing_interval_ms == 0 {
            return Err(invalid_value(
                "distribution.processing_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(invalid_value(
                "distribution.retry_delay_ms",
                "must be greater than 0",
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(invalid_value(
                "distribution.delivery_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 헬스 체크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// 프로브 주기 (밀리초)
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 단일 analyzer 설정 (`[[analyzers]]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// 고유 식별자
    pub id: String,
    /// 기본 URL (예: `http://localhost:3001`)
    pub endpoint: String,
    /// 상대 가중치
    pub weight: f64,
    /// 실패 임계치
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// 헬스 프로브 타임아웃 (밀리초)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
}

fn default_max_failures() -> u32 {
    3
}

fn default_health_check_timeout_ms() -> u64 {
    3000
}

impl AnalyzerConfig {
    fn validate(&self, index: usize) -> Result<(), LogRelayError> {
        if self.id.trim().is_empty() {
            return Err(invalid_value(
                format!("analyzers[{index}].id"),
                "must not be empty",
            ));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(invalid_value(
                format!("analyzers[{index}].endpoint"),
                format!(
                    "endpoint '{}' must start with http:// or https://",
                    self.endpoint
                ),
            ));
        }
        if !self.weight.is_finite() {
            return Err(invalid_value(
                format!("analyzers[{index}].weight"),
                "must be a finite number",
            ));
        }
        if self.weight <= 0.0 {
            // 0 이하 가중치는 허용하되, 유일한 생존자가 아니면 선택되지 않음
            warn!(
                analyzer_id = self.id.as_str(),
                weight = self.weight,
                "analyzer weight is not positive"
            );
        }
        if self.health_check_timeout_ms == 0 {
            return Err(invalid_value(
                format!("analyzers[{index}].health_check_timeout_ms"),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> LogRelayError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

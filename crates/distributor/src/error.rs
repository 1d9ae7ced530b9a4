//! 분배 엔진 에러 타입
//!
//! [`DistributorError`]는 레지스트리, 헬스 모니터, 전달 경로에서 발생하는 에러를
//! 표현합니다. `From<DistributorError> for LogRelayError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use logrelay_core::error::{ConfigError, LogRelayError, ParseError, PipelineError};

/// 분배 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    /// 잘못된 패킷 (큐에 들어가지 않음)
    #[error("invalid packet: {reason}")]
    InvalidPacket {
        /// 거부 사유
        reason: String,
    },

    /// 선택 가능한 온라인 analyzer가 없음
    #[error("no available analyzer")]
    NoAvailableBackend,

    /// 전달 실패
    #[error("delivery to analyzer '{analyzer_id}' failed: {source}")]
    Delivery {
        /// 대상 analyzer
        analyzer_id: String,
        /// 전송 계층 원인
        source: TransportError,
    },

    /// 헬스 프로브 실패
    #[error("health probe for analyzer '{analyzer_id}' failed: {source}")]
    Probe {
        /// 대상 analyzer
        analyzer_id: String,
        /// 전송 계층 원인
        source: TransportError,
    },

    /// 재시도 소진으로 패킷 드롭
    #[error("packet {packet_id} dropped after {attempts} attempts")]
    RetriesExhausted {
        /// 패킷 ID
        packet_id: String,
        /// 총 시도 횟수
        attempts: u32,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 정지된 엔진에 대한 요청
    #[error("distribution engine has been stopped")]
    Stopped,

    /// 처리 루프를 띄울 tokio 런타임이 없음
    #[error("no tokio runtime available: build or start the engine inside a runtime first")]
    NoRuntime,

    /// HTTP 클라이언트 초기화 에러
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// 전송 계층 실패 원인
///
/// 타임아웃과 연결 거부는 [`TransportError::is_unreachable`]로 구분되어
/// 레지스트리에 즉시 오프라인 신호를 보냅니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// 2xx가 아닌 응답
    #[error("unexpected status {0}")]
    Status(u16),

    /// 타임아웃
    #[error("timed out")]
    Timeout,

    /// 연결 불가 (연결 거부 등)
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// 기타 요청 에러
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// 엔드포인트에 닿지 못한 실패인지 여부
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Unreachable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<ParseError> for DistributorError {
    fn from(err: ParseError) -> Self {
        DistributorError::InvalidPacket {
            reason: err.to_string(),
        }
    }
}

impl From<DistributorError> for LogRelayError {
    fn from(err: DistributorError) -> Self {
        match err {
            DistributorError::Config { field, reason } => {
                LogRelayError::Config(ConfigError::InvalidValue { field, reason })
            }
            DistributorError::InvalidPacket { reason } => {
                LogRelayError::Parse(ParseError::InvalidPacket { reason })
            }
            DistributorError::Stopped => LogRelayError::Pipeline(PipelineError::Stopped),
            other => LogRelayError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

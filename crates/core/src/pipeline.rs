//! 파이프라인 trait -- 컴포넌트 생명주기 정의
//!
//! 분배 엔진처럼 백그라운드 태스크를 소유하는 컴포넌트는 [`Pipeline`]을 구현하여
//! daemon에서 동일한 start/stop/health_check 흐름으로 관리됩니다.

use std::future::Future;

use serde::Serialize;

use crate::error::LogRelayError;

/// 컴포넌트 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 생명주기를 가진 컴포넌트
pub trait Pipeline: Send + Sync {
    /// 백그라운드 태스크를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), LogRelayError>> + Send;

    /// 백그라운드 태스크를 정지합니다. 진행 중인 작업은 버려질 수 있습니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), LogRelayError>> + Send;

    /// 현재 상태를 보고합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

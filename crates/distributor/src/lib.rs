#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`registry`]: analyzer 레지스트리, 가중치 랜덤 선택, 온라인/오프라인 전이
//! - [`health`]: 주기적 헬스 프로브 (analyzer별 동시 실행)
//! - [`queue`]: 재시도 레인이 앞서는 인메모리 분배 큐
//! - [`engine`]: 배치 처리 루프, 재시도/백오프 (Pipeline trait 구현)
//! - [`client`]: analyzer HTTP 클라이언트 추상화
//! - [`config`]: 엔진 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! DistributionHandle::enqueue -> DistributionQueue -> processing loop -> AnalyzerRegistry::select
//!                                      ^                     |                    ^
//!                                      |                 deliver (HTTP)           |
//!                                 backoff retry <---- failure           HealthMonitor probes
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod queue;
pub mod registry;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{
    DeliveryCounters, DistributionEngine, DistributionEngineBuilder, DistributionHandle,
    EngineStats, EnqueueAck, PacketStatus, QueueStatus,
};

// 설정
pub use config::{AnalyzerOptions, AnalyzerSpec, EngineConfig, EngineConfigBuilder};

// 에러
pub use error::{DistributorError, TransportError};

// 레지스트리
pub use registry::{AnalyzerEvent, AnalyzerRegistry, AnalyzerSnapshot, AnalyzerStats};

// 헬스 모니터
pub use health::{HealthMonitor, ProbeSummary};

// 클라이언트
pub use client::{AnalyzerClient, HttpAnalyzerClient};

// 큐
pub use queue::{DistributionQueue, QueueEntry};

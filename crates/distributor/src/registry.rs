//! Analyzer 레지스트리 -- 가중치 선택과 온라인/오프라인 상태 전이
//!
//! [`AnalyzerRegistry`]는 등록된 analyzer 목록과 analyzer별 분배 통계를 보관합니다.
//! 프로세스 전역 상태가 아니라 엔진 인스턴스가 소유하고 `Arc`로 공유하는 구조체이며,
//! 내부 변경은 `RwLock` 하나로 직렬화됩니다.
//!
//! # 상태 머신
//! ```text
//!            probe 실패 / 전달 타임아웃·연결 거부
//!   Online ───────────────────────────────────────▶ Offline
//!     ▲                                               │
//!     └──────────────── probe 성공 ───────────────────┘
//! ```
//! 전이는 엣지에서만 발생하며 [`AnalyzerEvent`]가 broadcast 채널로 발행됩니다.
//! 이미 오프라인인 analyzer에 `mark_offline`을 다시 호출하면 실패 카운터도
//! 증가하지 않는 no-op입니다.
//!
//! # 가중치 선택
//! 온라인 analyzer의 가중치 합 `total`에 대해 `[0, total)` 균등 난수를 뽑고,
//! 등록 순서대로 가중치를 누적하여 누적값이 난수 이상이 되는 첫 analyzer를
//! 반환합니다. 온라인 analyzer가 하나면 가중치와 무관하게 바로 반환합니다.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use logrelay_core::metrics as m;

use crate::config::{AnalyzerOptions, AnalyzerSpec};
use crate::error::DistributorError;

/// 상태 전이 이벤트 채널 용량
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// analyzer 온라인/오프라인 전이 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerEvent {
    /// Offline -> Online
    Online { id: String },
    /// Online -> Offline
    Offline {
        id: String,
        consecutive_failures: u32,
    },
}

/// analyzer별 누적 분배 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStats {
    /// 전달에 성공한 메시지 수
    pub total_messages: u64,
    /// 마지막 전달 성공 시각
    pub last_distribution: Option<DateTime<Utc>>,
}

/// 관측용 analyzer별 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerStats {
    pub weight: f64,
    pub is_online: bool,
    pub total_messages: u64,
    pub last_distribution: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// analyzer 상태 스냅샷 (복사본)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerSnapshot {
    pub id: String,
    pub endpoint: String,
    pub weight: f64,
    pub is_online: bool,
    pub consecutive_failures: u32,
    pub last_health_check: DateTime<Utc>,
    pub max_failures: u32,
    pub health_check_timeout_ms: u64,
    pub stats: DistributionStats,
}

/// 선택된 전달 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAnalyzer {
    pub id: String,
    pub endpoint: String,
}

/// 헬스 프로브 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub id: String,
    pub endpoint: String,
    pub timeout: Duration,
}

/// 레지스트리 내부 항목
#[derive(Debug)]
struct Analyzer {
    id: String,
    endpoint: String,
    weight: f64,
    options: AnalyzerOptions,
    is_online: bool,
    consecutive_failures: u32,
    last_health_check: DateTime<Utc>,
    stats: DistributionStats,
}

impl Analyzer {
    fn from_spec(spec: AnalyzerSpec) -> Self {
        Self {
            id: spec.id,
            endpoint: spec.endpoint,
            weight: spec.weight,
            options: spec.options,
            is_online: true,
            consecutive_failures: 0,
            last_health_check: Utc::now(),
            stats: DistributionStats::default(),
        }
    }

    fn selected(&self) -> SelectedAnalyzer {
        SelectedAnalyzer {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    fn snapshot(&self) -> AnalyzerSnapshot {
        AnalyzerSnapshot {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            weight: self.weight,
            is_online: self.is_online,
            consecutive_failures: self.consecutive_failures,
            last_health_check: self.last_health_check,
            max_failures: self.options.max_failures,
            health_check_timeout_ms: u64::try_from(self.options.health_check_timeout.as_millis())
                .unwrap_or(u64::MAX),
            stats: self.stats.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// 등록 순서를 유지하는 analyzer 목록
    analyzers: Vec<Analyzer>,
}

impl RegistryInner {
    fn find_mut(&mut self, id: &str) -> Option<&mut Analyzer> {
        self.analyzers.iter_mut().find(|a| a.id == id)
    }

    fn online_count(&self) -> usize {
        self.analyzers.iter().filter(|a| a.is_online).count()
    }
}

/// analyzer 레지스트리
pub struct AnalyzerRegistry {
    inner: RwLock<RegistryInner>,
    events: broadcast::Sender<AnalyzerEvent>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 상태 전이 이벤트를 구독합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyzerEvent> {
        self.events.subscribe()
    }

    /// analyzer를 등록합니다.
    ///
    /// 같은 id가 이미 있으면 기존 위치에서 설정을 교체하고 상태와 통계를
    /// 초기화합니다. 새 항목은 온라인, 실패 0회로 시작합니다.
    /// 기존 항목을 교체했으면 `true`를 반환합니다.
    pub fn register(&self, spec: AnalyzerSpec) -> bool {
        let id = spec.id.clone();
        let weight = spec.weight;
        let (replaced, total, online) = {
            let mut inner = self.write();
            let analyzer = Analyzer::from_spec(spec);
            let replaced = match inner.analyzers.iter().position(|a| a.id == analyzer.id) {
                Some(index) => {
                    inner.analyzers[index] = analyzer;
                    true
                }
                None => {
                    inner.analyzers.push(analyzer);
                    false
                }
            };
            (replaced, inner.analyzers.len(), inner.online_count())
        };

        record_registry_gauges(total, online);
        info!(
            analyzer_id = id.as_str(),
            weight = weight,
            replaced = replaced,
            "analyzer registered"
        );
        replaced
    }

    /// analyzer와 통계를 제거합니다. 존재했으면 `true`를 반환합니다.
    pub fn unregister(&self, id: &str) -> bool {
        let (removed, total, online) = {
            let mut inner = self.write();
            let before = inner.analyzers.len();
            inner.analyzers.retain(|a| a.id != id);
            (
                inner.analyzers.len() != before,
                inner.analyzers.len(),
                inner.online_count(),
            )
        };

        if removed {
            record_registry_gauges(total, online);
            info!(analyzer_id = id, "analyzer unregistered");
        }
        removed
    }

    /// 온라인 analyzer 중 하나를 가중치 랜덤으로 선택합니다.
    ///
    /// # Errors
    ///
    /// 온라인 analyzer가 없으면 `DistributorError::NoAvailableBackend`
    pub fn select_analyzer(&self) -> Result<SelectedAnalyzer, DistributorError> {
        self.select_analyzer_with(&mut rand::thread_rng())
    }

    /// 주어진 난수 생성기로 선택합니다 (시드 고정 테스트용).
    pub fn select_analyzer_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<SelectedAnalyzer, DistributorError> {
        let inner = self.read();
        let live: Vec<&Analyzer> = inner.analyzers.iter().filter(|a| a.is_online).collect();

        match live.as_slice() {
            [] => Err(DistributorError::NoAvailableBackend),
            [only] => Ok(only.selected()),
            [first, ..] => {
                let total_weight: f64 = live.iter().map(|a| a.weight).sum();
                let draw = rng.gen_range(0.0..1.0_f64) * total_weight;

                let mut cumulative = 0.0;
                for analyzer in &live {
                    cumulative += analyzer.weight;
                    if draw <= cumulative {
                        return Ok(analyzer.selected());
                    }
                }
                // 부동소수점 오차로 누적값이 draw에 못 미친 경우
                Ok(first.selected())
            }
        }
    }

    /// analyzer를 오프라인으로 표시합니다.
    ///
    /// Online -> Offline 엣지에서만 실패 카운터를 올리고 이벤트를 발행합니다.
    /// 전이가 일어났으면 `true`를 반환합니다.
    pub fn mark_offline(&self, id: &str) -> bool {
        let (event, online) = {
            let mut inner = self.write();
            let Some(analyzer) = inner.find_mut(id) else {
                return false;
            };
            if !analyzer.is_online {
                return false;
            }
            analyzer.is_online = false;
            analyzer.consecutive_failures = analyzer.consecutive_failures.saturating_add(1);
            let event = AnalyzerEvent::Offline {
                id: analyzer.id.clone(),
                consecutive_failures: analyzer.consecutive_failures,
            };
            (event, inner.online_count())
        };

        self.publish(event, online);
        true
    }

    /// analyzer를 온라인으로 표시합니다.
    ///
    /// Offline -> Online 엣지에서만 실패 카운터를 0으로 되돌리고 이벤트를 발행합니다.
    /// 전이가 일어났으면 `true`를 반환합니다.
    pub fn mark_online(&self, id: &str) -> bool {
        let (event, online) = {
            let mut inner = self.write();
            let Some(analyzer) = inner.find_mut(id) else {
                return false;
            };
            if analyzer.is_online {
                return false;
            }
            analyzer.is_online = true;
            analyzer.consecutive_failures = 0;
            analyzer.last_health_check = Utc::now();
            let event = AnalyzerEvent::Online {
                id: analyzer.id.clone(),
            };
            (event, inner.online_count())
        };

        self.publish(event, online);
        true
    }

    /// 성공한 헬스 프로브를 반영합니다.
    ///
    /// 마지막 체크 시각을 갱신하고, 오프라인이었다면 온라인으로 전이합니다.
    pub fn record_probe_success(&self, id: &str) -> bool {
        {
            let mut inner = self.write();
            match inner.find_mut(id) {
                Some(analyzer) => analyzer.last_health_check = Utc::now(),
                None => return false,
            }
        }
        self.mark_online(id)
    }

    /// 실패한 헬스 프로브를 반영합니다 (Online -> Offline).
    pub fn record_probe_failure(&self, id: &str) -> bool {
        self.mark_offline(id)
    }

    /// 전달 성공 통계를 누적합니다. 모르는 id는 무시합니다.
    pub fn record_delivery(&self, id: &str, message_count: usize) {
        let mut inner = self.write();
        match inner.find_mut(id) {
            Some(analyzer) => {
                let count = u64::try_from(message_count).unwrap_or(u64::MAX);
                analyzer.stats.total_messages = analyzer.stats.total_messages.saturating_add(count);
                analyzer.stats.last_distribution = Some(Utc::now());
            }
            None => debug!(analyzer_id = id, "delivery recorded for unknown analyzer"),
        }
    }

    /// analyzer별 분배 통계 (id 순)
    pub fn distribution_stats(&self) -> BTreeMap<String, AnalyzerStats> {
        self.read()
            .analyzers
            .iter()
            .map(|a| {
                (
                    a.id.clone(),
                    AnalyzerStats {
                        weight: a.weight,
                        is_online: a.is_online,
                        total_messages: a.stats.total_messages,
                        last_distribution: a.stats.last_distribution,
                        consecutive_failures: a.consecutive_failures,
                    },
                )
            })
            .collect()
    }

    /// 등록 순서대로 analyzer 스냅샷을 반환합니다.
    pub fn list_analyzers(&self) -> Vec<AnalyzerSnapshot> {
        self.read().analyzers.iter().map(Analyzer::snapshot).collect()
    }

    /// 단일 analyzer 스냅샷
    pub fn get(&self, id: &str) -> Option<AnalyzerSnapshot> {
        self.read()
            .analyzers
            .iter()
            .find(|a| a.id == id)
            .map(Analyzer::snapshot)
    }

    /// 헬스 프로브 대상 목록
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.read()
            .analyzers
            .iter()
            .map(|a| ProbeTarget {
                id: a.id.clone(),
                endpoint: a.endpoint.clone(),
                timeout: a.options.health_check_timeout,
            })
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.read().online_count()
    }

    pub fn len(&self) -> usize {
        self.read().analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().analyzers.is_empty()
    }

    fn publish(&self, event: AnalyzerEvent, online: usize) {
        let state = match event {
            AnalyzerEvent::Online { .. } => "online",
            AnalyzerEvent::Offline { .. } => "offline",
        };
        metrics::counter!(m::REGISTRY_TRANSITIONS_TOTAL, m::LABEL_STATE => state).increment(1);
        metrics::gauge!(m::REGISTRY_ANALYZERS_ONLINE).set(gauge_value(online));

        // 구독자가 없으면 send가 실패하지만 전이 자체는 유효함
        let _ = self.events.send(event);
    }
}

fn record_registry_gauges(total: usize, online: usize) {
    metrics::gauge!(m::REGISTRY_ANALYZERS_REGISTERED).set(gauge_value(total));
    metrics::gauge!(m::REGISTRY_ANALYZERS_ONLINE).set(gauge_value(online));
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn gauge_value(value: usize) -> f64 {
    value as f64
}

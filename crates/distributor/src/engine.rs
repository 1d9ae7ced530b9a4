//! 분배 엔진 -- 큐, 배치 처리 루프, 재시도/백오프
//!
//! [`DistributionEngine`]은 core의 [`Pipeline`](logrelay_core::pipeline::Pipeline) trait을
//! 구현하여 `logrelay-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//! 인그레스 쪽 호출자는 복제 가능한 [`DistributionHandle`]로 패킷을 넣습니다.
//!
//! # 처리 흐름
//! ```text
//! enqueue ─▶ DistributionQueue ─▶ processing loop (batch_size씩)
//!                 ▲                    │ JoinSet으로 동시 전달
//!                 │                    ▼
//!   push_retry ◀──┴── backoff 타이머 ◀── 실패 (retry_count < max_retries)
//!                                      │
//!                                      └─ 재시도 소진 ─▶ drop (로그 + 메트릭)
//! ```
//!
//! 처리 루프는 필요할 때만 스폰되며 큐가 비면 스스로 종료합니다.
//! 백오프 지연은 `retry_delay * 2^retry_count` 입니다.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use logrelay_core::error::{LogRelayError, PipelineError};
use logrelay_core::metrics as m;
use logrelay_core::pipeline::{HealthStatus, Pipeline};
use logrelay_core::types::LogPacket;

use crate::client::AnalyzerClient;
use crate::config::{AnalyzerSpec, EngineConfig};
use crate::error::{DistributorError, TransportError};
use crate::health::HealthMonitor;
use crate::queue::{DistributionQueue, QueueEntry};
use crate::registry::{AnalyzerEvent, AnalyzerRegistry, AnalyzerStats, gauge_value};

/// 엔진 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// 생성됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// enqueue 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketStatus {
    Queued,
}

/// enqueue 확인 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueAck {
    pub packet_id: String,
    pub message_count: usize,
    pub status: PacketStatus,
}

/// 큐 상태 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// 큐에 대기 중인 항목 수
    pub length: usize,
    /// 처리 루프 실행 여부
    pub is_processing: bool,
    /// 가장 오래된 대기 항목의 enqueue 시각
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    /// 백오프 타이머에서 대기 중인 재시도 수
    pub scheduled_retries: usize,
}

/// 누적 전달 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCounters {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub retried: u64,
    pub dropped: u64,
}

/// 엔진 통계 -- 큐 상태 + analyzer별 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub queue: QueueStatus,
    pub analyzers: BTreeMap<String, AnalyzerStats>,
    pub total_analyzers: usize,
    pub online_analyzers: usize,
    pub delivery: DeliveryCounters,
}

#[derive(Default)]
struct EngineCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl EngineCounters {
    fn snapshot(&self) -> DeliveryCounters {
        DeliveryCounters {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// 엔진, 핸들, 처리 루프, 재시도 타이머가 공유하는 상태
struct EngineShared<C: AnalyzerClient> {
    config: EngineConfig,
    registry: Arc<AnalyzerRegistry>,
    client: Arc<C>,
    monitor: HealthMonitor<C>,
    queue: Mutex<DistributionQueue>,
    processing: AtomicBool,
    scheduled_retries: AtomicUsize,
    shutdown: CancellationToken,
    counters: EngineCounters,
    /// 처리 루프와 재시도 타이머를 띄울 런타임 (빌드 또는 start 시점에 고정)
    runtime: OnceLock<Handle>,
}

impl<C: AnalyzerClient> EngineShared<C> {
    fn lock_queue(&self) -> MutexGuard<'_, DistributionQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 고정된 런타임 핸들. 아직 없으면 현재 런타임을 고정합니다.
    fn runtime(&self) -> Option<Handle> {
        if let Some(runtime) = self.runtime.get() {
            return Some(runtime.clone());
        }
        let current = Handle::try_current().ok()?;
        Some(self.runtime.get_or_init(|| current).clone())
    }

    fn enqueue(self: &Arc<Self>, packet: LogPacket) -> Result<EnqueueAck, DistributorError> {
        if self.shutdown.is_cancelled() {
            return Err(DistributorError::Stopped);
        }
        if packet.emitter_id().trim().is_empty() {
            return Err(DistributorError::InvalidPacket {
                reason: "emitterId is required".to_owned(),
            });
        }
        // 루프를 띄울 수 없으면 큐에 넣지 않음
        let runtime = self.runtime().ok_or(DistributorError::NoRuntime)?;

        let ack = EnqueueAck {
            packet_id: packet.id().to_owned(),
            message_count: packet.message_count(),
            status: PacketStatus::Queued,
        };

        let length = {
            let mut queue = self.lock_queue();
            queue.push_back(QueueEntry::new(packet));
            queue.len()
        };
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DISTRIBUTOR_PACKETS_ENQUEUED_TOTAL).increment(1);
        metrics::gauge!(m::DISTRIBUTOR_QUEUE_LENGTH).set(gauge_value(length));

        tracing::debug!(
            packet_id = ack.packet_id.as_str(),
            messages = ack.message_count,
            queue_length = length,
            "packet enqueued"
        );

        self.ensure_processing_on(&runtime);
        Ok(ack)
    }

    fn queue_status(&self) -> QueueStatus {
        let queue = self.lock_queue();
        QueueStatus {
            length: queue.len(),
            is_processing: self.processing.load(Ordering::Acquire),
            oldest_enqueued_at: queue.oldest_enqueued_at(),
            scheduled_retries: self.scheduled_retries.load(Ordering::Acquire),
        }
    }

    fn stats(&self) -> EngineStats {
        let analyzers = self.registry.distribution_stats();
        EngineStats {
            queue: self.queue_status(),
            total_analyzers: analyzers.len(),
            online_analyzers: analyzers.values().filter(|a| a.is_online).count(),
            analyzers,
            delivery: self.counters.snapshot(),
        }
    }

    /// 처리 루프가 돌고 있지 않으면 `runtime`에 스폰합니다.
    fn ensure_processing_on(self: &Arc<Self>, runtime: &Handle) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            runtime.spawn(Arc::clone(self).run_loop());
        }
    }

    async fn run_loop(self: Arc<Self>) {
        tracing::debug!("processing loop started");

        loop {
            if self.shutdown.is_cancelled() {
                self.processing.store(false, Ordering::Release);
                break;
            }

            let (batch, remaining) = {
                let mut queue = self.lock_queue();
                let batch = queue.drain_batch(self.config.batch_size);
                (batch, queue.len())
            };
            metrics::gauge!(m::DISTRIBUTOR_QUEUE_LENGTH).set(gauge_value(remaining));

            if batch.is_empty() {
                self.processing.store(false, Ordering::Release);
                // 플래그를 내린 직후 들어온 항목은 이 루프가 다시 맡음
                let requeued = !self.lock_queue().is_empty()
                    && self
                        .processing
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                if requeued {
                    continue;
                }
                break;
            }

            let mut in_flight = JoinSet::new();
            for entry in batch {
                in_flight.spawn(Arc::clone(&self).dispatch(entry));
            }
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "dispatch task failed");
                }
            }

            let has_more = !self.lock_queue().is_empty();
            if has_more {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => {}
                    () = tokio::time::sleep(self.config.processing_interval) => {}
                }
            }
        }

        tracing::debug!("processing loop idle");
    }

    /// 한 항목을 전달하고 실패 시 재시도 또는 드롭합니다.
    async fn dispatch(self: Arc<Self>, mut entry: QueueEntry) {
        let err = match self.attempt(&entry.packet).await {
            Ok(analyzer_id) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    packet_id = entry.packet.id(),
                    analyzer_id = analyzer_id.as_str(),
                    retry_count = entry.retry_count,
                    "packet delivered"
                );
                return;
            }
            Err(err) => err,
        };

        self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DISTRIBUTOR_DELIVERY_FAILURES_TOTAL).increment(1);

        if self.shutdown.is_cancelled() {
            tracing::warn!(
                packet_id = entry.packet.id(),
                retry_count = entry.retry_count,
                error = %err,
                "delivery failed during shutdown, packet abandoned"
            );
            return;
        }

        let retry_runtime = if entry.retry_count < self.config.max_retries {
            self.runtime()
        } else {
            None
        };

        if let Some(runtime) = retry_runtime {
            let delay = self.config.backoff_delay(entry.retry_count);
            entry.retry_count += 1;
            tracing::warn!(
                packet_id = entry.packet.id(),
                retry_count = entry.retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "delivery failed, scheduling retry"
            );
            self.schedule_retry(&runtime, entry, delay);
        } else {
            let dropped = DistributorError::RetriesExhausted {
                packet_id: entry.packet.id().to_owned(),
                attempts: entry.retry_count + 1,
            };
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::DISTRIBUTOR_PACKETS_DROPPED_TOTAL).increment(1);
            tracing::error!(
                error = %dropped,
                emitter_id = entry.packet.emitter_id(),
                last_error = %err,
                "packet dropped"
            );
        }
    }

    /// 선택 -> 전달 1회. 성공 시 analyzer id를 반환합니다.
    async fn attempt(&self, packet: &LogPacket) -> Result<String, DistributorError> {
        let target = self.registry.select_analyzer()?;

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.delivery_timeout,
            self.client.deliver(&target.endpoint, packet),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));
        metrics::histogram!(
            m::DISTRIBUTOR_DELIVERY_DURATION_SECONDS,
            m::LABEL_ANALYZER => target.id.clone()
        )
        .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                let count = packet.message_count();
                self.registry.record_delivery(&target.id, count);
                metrics::counter!(m::DISTRIBUTOR_PACKETS_DELIVERED_TOTAL, m::LABEL_ANALYZER => target.id.clone())
                    .increment(1);
                metrics::counter!(m::DISTRIBUTOR_MESSAGES_DELIVERED_TOTAL, m::LABEL_ANALYZER => target.id.clone())
                    .increment(u64::try_from(count).unwrap_or(u64::MAX));
                Ok(target.id)
            }
            Err(source) => {
                if source.is_unreachable() {
                    self.registry.mark_offline(&target.id);
                }
                Err(DistributorError::Delivery {
                    analyzer_id: target.id,
                    source,
                })
            }
        }
    }

    /// 백오프 후 재시도 레인에 다시 넣습니다.
    fn schedule_retry(self: &Arc<Self>, runtime: &Handle, mut entry: QueueEntry, delay: Duration) {
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DISTRIBUTOR_RETRIES_TOTAL).increment(1);
        self.scheduled_retries.fetch_add(1, Ordering::AcqRel);

        let shared = Arc::clone(self);
        let loop_runtime = runtime.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = shared.shutdown.cancelled() => {
                    tracing::debug!(packet_id = entry.packet.id(), "pending retry abandoned");
                }
                () = tokio::time::sleep(delay) => {
                    entry.enqueued_at = Utc::now();
                    shared.lock_queue().push_retry(entry);
                    shared.ensure_processing_on(&loop_runtime);
                }
            }
            shared.scheduled_retries.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// 분배 엔진
///
/// # 사용 예시
/// ```ignore
/// use logrelay_distributor::{DistributionEngineBuilder, HttpAnalyzerClient};
///
/// let mut engine = DistributionEngineBuilder::new()
///     .config(config)
///     .client(HttpAnalyzerClient::new()?)
///     .analyzer(AnalyzerSpec::new("A1", "http://localhost:3001", 0.1))
///     .build()?;
///
/// engine.start().await?;
/// let ack = engine.handle().enqueue(packet)?;
/// ```
pub struct DistributionEngine<C: AnalyzerClient> {
    shared: Arc<EngineShared<C>>,
    state: EngineState,
}

impl<C: AnalyzerClient> DistributionEngine<C> {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    /// 인그레스용 핸들
    pub fn handle(&self) -> DistributionHandle<C> {
        DistributionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 패킷을 큐에 넣습니다. 네트워크 I/O를 기다리지 않습니다.
    ///
    /// # Errors
    ///
    /// - `DistributorError::InvalidPacket`: emitter id가 비어 있음
    /// - `DistributorError::Stopped`: 엔진이 정지됨
    /// - `DistributorError::NoRuntime`: 엔진이 tokio 런타임 밖에서 빌드되었고 아직 시작되지 않음
    pub fn enqueue(&self, packet: LogPacket) -> Result<EnqueueAck, DistributorError> {
        self.shared.enqueue(packet)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.shared.queue_status()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }

    pub fn registry(&self) -> &Arc<AnalyzerRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// analyzer 상태 전이 이벤트를 구독합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyzerEvent> {
        self.shared.registry.subscribe()
    }

    /// analyzer를 등록하고, 헬스 모니터가 멈춰 있으면 시작합니다.
    pub fn register_analyzer(&self, spec: AnalyzerSpec) -> bool {
        let replaced = self.shared.registry.register(spec);
        if self.state != EngineState::Stopped {
            match self.shared.runtime() {
                Some(runtime) => {
                    self.shared.monitor.start_on(&runtime);
                }
                None => tracing::warn!("health monitor not started: no tokio runtime"),
            }
        }
        replaced
    }

    pub fn unregister_analyzer(&self, id: &str) -> bool {
        self.shared.registry.unregister(id)
    }

    pub fn is_health_monitor_running(&self) -> bool {
        self.shared.monitor.is_running()
    }
}

impl<C: AnalyzerClient> Pipeline for DistributionEngine<C> {
    async fn start(&mut self) -> Result<(), LogRelayError> {
        match self.state {
            EngineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            EngineState::Stopped => return Err(PipelineError::Stopped.into()),
            EngineState::Initialized => {}
        }

        tracing::info!(
            analyzers = self.shared.registry.len(),
            batch_size = self.shared.config.batch_size,
            max_retries = self.shared.config.max_retries,
            "starting distribution engine"
        );

        let runtime = self.shared.runtime().ok_or(DistributorError::NoRuntime)?;
        self.shared.monitor.start_on(&runtime);
        // start 전에 들어온 패킷 처리
        self.shared.ensure_processing_on(&runtime);

        self.state = EngineState::Running;
        tracing::info!("distribution engine started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogRelayError> {
        if self.state != EngineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping distribution engine");

        // 1. 처리 루프와 백오프 타이머 중단
        self.shared.shutdown.cancel();

        // 2. 헬스 모니터 중단
        self.shared.monitor.stop().await;

        // 3. 남은 항목 폐기 (큐는 영속화하지 않음)
        let remaining = self.shared.lock_queue().drain_all();
        metrics::gauge!(m::DISTRIBUTOR_QUEUE_LENGTH).set(0.0);
        if !remaining.is_empty() {
            tracing::warn!(count = remaining.len(), "discarding undelivered packets");
        }

        self.state = EngineState::Stopped;
        tracing::info!("distribution engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EngineState::Running => {
                let total = self.shared.registry.len();
                let online = self.shared.registry.online_count();
                if total == 0 {
                    HealthStatus::Unhealthy("no analyzers registered".to_owned())
                } else if online == 0 {
                    HealthStatus::Unhealthy(format!("all {total} analyzers offline"))
                } else if online < total {
                    HealthStatus::Degraded(format!("{} of {total} analyzers offline", total - online))
                } else {
                    HealthStatus::Healthy
                }
            }
            EngineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 복제 가능한 인그레스 핸들
pub struct DistributionHandle<C: AnalyzerClient> {
    shared: Arc<EngineShared<C>>,
}

impl<C: AnalyzerClient> Clone for DistributionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: AnalyzerClient> DistributionHandle<C> {
    /// [`DistributionEngine::enqueue`]와 동일
    pub fn enqueue(&self, packet: LogPacket) -> Result<EnqueueAck, DistributorError> {
        self.shared.enqueue(packet)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.shared.queue_status()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }

    pub fn registry(&self) -> &Arc<AnalyzerRegistry> {
        &self.shared.registry
    }
}

/// 분배 엔진 빌더
pub struct DistributionEngineBuilder<C: AnalyzerClient> {
    config: EngineConfig,
    client: Option<Arc<C>>,
    registry: Option<Arc<AnalyzerRegistry>>,
    analyzers: Vec<AnalyzerSpec>,
}

impl<C: AnalyzerClient> DistributionEngineBuilder<C> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            client: None,
            registry: None,
            analyzers: Vec::new(),
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// analyzer 클라이언트를 지정합니다.
    pub fn client(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// 이미 공유 중인 클라이언트를 지정합니다.
    pub fn shared_client(mut self, client: Arc<C>) -> Self {
        self.client = Some(client);
        self
    }

    /// 외부 레지스트리를 사용합니다.
    ///
    /// 설정하지 않으면 빌더가 새 레지스트리를 생성합니다.
    pub fn registry(mut self, registry: Arc<AnalyzerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 시작 시 등록할 analyzer를 추가합니다.
    pub fn analyzer(mut self, spec: AnalyzerSpec) -> Self {
        self.analyzers.push(spec);
        self
    }

    pub fn analyzers(mut self, specs: impl IntoIterator<Item = AnalyzerSpec>) -> Self {
        self.analyzers.extend(specs);
        self
    }

    /// 엔진을 빌드합니다.
    ///
    /// 헬스 모니터는 `Pipeline::start`에서 시작됩니다. tokio 런타임 안에서
    /// 빌드하면 그 런타임이 고정되어, 런타임 밖의 스레드에서도 enqueue할 수 있습니다.
    pub fn build(self) -> Result<DistributionEngine<C>, DistributorError> {
        self.config.validate()?;

        let client = self.client.ok_or_else(|| DistributorError::Config {
            field: "client".to_owned(),
            reason: "an analyzer client is required".to_owned(),
        })?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(AnalyzerRegistry::new()));

        for spec in self.analyzers {
            if !spec.weight.is_finite() {
                return Err(DistributorError::Config {
                    field: format!("analyzers.{}.weight", spec.id),
                    reason: "must be a finite number".to_owned(),
                });
            }
            registry.register(spec);
        }

        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&client),
            self.config.health_check_interval,
        );

        let shared = Arc::new(EngineShared {
            config: self.config,
            registry,
            client,
            monitor,
            queue: Mutex::new(DistributionQueue::new()),
            processing: AtomicBool::new(false),
            scheduled_retries: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            counters: EngineCounters::default(),
            runtime: OnceLock::new(),
        });
        // 런타임 안에서 빌드했다면 지금 고정
        let _ = shared.runtime();

        Ok(DistributionEngine {
            shared,
            state: EngineState::Initialized,
        })
    }
}

impl<C: AnalyzerClient> Default for DistributionEngineBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use logrelay_core::types::{LogLevel, LogMessage};
    use tokio::time::Instant as TokioInstant;

    use super::*;
    use crate::client::MockAnalyzerClient;
    use crate::config::EngineConfigBuilder;

    fn test_config() -> EngineConfig {
        EngineConfigBuilder::new()
            .batch_size(10)
            .processing_interval(Duration::from_millis(50))
            .max_retries(3)
            .retry_delay(Duration::from_secs(1))
            .delivery_timeout(Duration::from_secs(5))
            .health_check_interval(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn build_engine(
        client: &Arc<MockAnalyzerClient>,
        config: EngineConfig,
        analyzers: &[(&str, f64)],
    ) -> DistributionEngine<MockAnalyzerClient> {
        DistributionEngineBuilder::new()
            .config(config)
            .shared_client(Arc::clone(client))
            .analyzers(
                analyzers
                    .iter()
                    .map(|(id, weight)| AnalyzerSpec::new(*id, endpoint(id), *weight)),
            )
            .build()
            .unwrap()
    }

    fn endpoint(id: &str) -> String {
        format!("http://{}", id.to_lowercase())
    }

    fn packet_with(emitter: &str, messages: usize) -> LogPacket {
        let mut packet = LogPacket::new(emitter);
        for i in 0..messages {
            packet.add_message(LogMessage::new(LogLevel::Info, format!("message {i}"), emitter));
        }
        packet
    }

    /// 조건이 참이 될 때까지 가상 시간을 진행합니다.
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn builder_requires_client() {
        let result = DistributionEngineBuilder::<MockAnalyzerClient>::new().build();
        assert!(matches!(
            result,
            Err(DistributorError::Config { ref field, .. }) if field == "client"
        ));
    }

    #[test]
    fn builder_rejects_non_finite_weight() {
        let result = DistributionEngineBuilder::new()
            .client(MockAnalyzerClient::new())
            .analyzer(AnalyzerSpec::new("A1", "http://a1", f64::NAN))
            .build();
        assert!(matches!(result, Err(DistributorError::Config { .. })));
    }

    #[test]
    fn builder_creates_engine() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 0.5), ("A2", 0.5)]);
        assert_eq!(engine.state_name(), "initialized");
        assert_eq!(engine.registry().len(), 2);
        assert!(!engine.is_health_monitor_running());
    }

    #[tokio::test]
    async fn enqueue_returns_queued_ack() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        let packet = packet_with("svc-a", 2);
        let id = packet.id().to_owned();

        let ack = engine.enqueue(packet).unwrap();

        assert_eq!(ack.packet_id, id);
        assert_eq!(ack.message_count, 2);
        assert_eq!(ack.status, PacketStatus::Queued);
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["messageCount"], 2);
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_emitter() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        let result = engine.enqueue(LogPacket::new("  "));

        assert!(matches!(result, Err(DistributorError::InvalidPacket { .. })));
        assert_eq!(engine.queue_status().length, 0);
        assert_eq!(engine.stats().delivery.enqueued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_packet_is_still_delivered() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        engine.enqueue(packet_with("svc-a", 0)).unwrap();
        wait_until(|| client.successful_deliveries().len() == 1).await;

        assert_eq!(client.deliveries()[0].message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_goes_idle_when_queue_drains() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        engine.enqueue(packet_with("svc-a", 1)).unwrap();
        assert!(engine.queue_status().is_processing);

        wait_until(|| !engine.queue_status().is_processing).await;
        let status = engine.queue_status();
        assert_eq!(status.length, 0);
        assert!(status.oldest_enqueued_at.is_none());

        // 유휴 상태에서 다시 enqueue하면 루프 재시작
        engine.enqueue(packet_with("svc-a", 1)).unwrap();
        wait_until(|| client.successful_deliveries().len() == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_with_exponential_backoff() {
        let client = Arc::new(
            MockAnalyzerClient::new().with_failing_endpoint("http://a1", TransportError::Status(500)),
        );
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        let packet = packet_with("svc-a", 1);
        let id = packet.id().to_owned();

        let t0 = TokioInstant::now();
        engine.enqueue(packet).unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        let attempts = client.attempts_for(&id);
        assert_eq!(attempts.len(), 4, "initial attempt + 3 retries");
        let offsets: Vec<Duration> = attempts.iter().map(|a| a.at - t0).collect();
        for (offset, expected) in offsets.iter().zip([0u64, 1, 3, 7]) {
            let expected = Duration::from_secs(expected);
            assert!(
                *offset >= expected && *offset < expected + Duration::from_millis(100),
                "attempt at {offset:?}, expected ~{expected:?}"
            );
        }

        let stats = engine.stats();
        assert_eq!(stats.delivery.failed_attempts, 4);
        assert_eq!(stats.delivery.retried, 3);
        assert_eq!(stats.delivery.dropped, 1);
        assert_eq!(stats.queue.length, 0);
        assert_eq!(stats.queue.scheduled_retries, 0);

        // 드롭 이후 추가 시도 없음
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.attempts_for(&id).len(), 4);
        // Status 실패는 오프라인 신호가 아님
        assert!(engine.registry().get("A1").unwrap().is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_packet_jumps_ahead_of_fresh_packets() {
        let config = EngineConfigBuilder::new()
            .batch_size(1)
            .processing_interval(Duration::from_millis(70))
            .retry_delay(Duration::from_secs(1))
            .build()
            .unwrap();
        let packets: Vec<LogPacket> = (1..=30).map(|i| packet_with(&format!("p{i}"), 1)).collect();
        let ids: Vec<String> = packets.iter().map(|p| p.id().to_owned()).collect();
        let client = Arc::new(
            MockAnalyzerClient::new().with_packet_failures(&ids[0], 1, TransportError::Status(503)),
        );
        let engine = build_engine(&client, config, &[("A1", 1.0)]);

        let t0 = TokioInstant::now();
        for packet in packets {
            engine.enqueue(packet).unwrap();
        }
        wait_until(|| client.successful_deliveries().len() == 30).await;

        let delivered: Vec<String> = client
            .successful_deliveries()
            .into_iter()
            .map(|d| d.packet_id)
            .collect();
        // 배치는 70ms 간격: P2..P15는 0.07s~0.98s, 재시도는 1s에 큐 머리로 들어가 1.05s 배치에서 처리
        let mut expected: Vec<String> = ids[1..15].to_vec();
        expected.push(ids[0].clone());
        expected.extend_from_slice(&ids[15..]);
        assert_eq!(delivered, expected);

        // P2는 P1의 재시도 일정과 무관하게 전달됨
        let p2 = &client.attempts_for(&ids[1])[0];
        assert!(p2.at - t0 < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn no_available_backend_is_retried() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        engine.registry().mark_offline("A1");

        engine.enqueue(packet_with("svc-a", 2)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(client.deliveries().is_empty());
        assert_eq!(engine.stats().delivery.failed_attempts, 1);
        assert_eq!(engine.queue_status().scheduled_retries, 1);

        engine.registry().mark_online("A1");
        wait_until(|| client.successful_deliveries().len() == 1).await;

        let stats = engine.stats();
        assert_eq!(stats.delivery.retried, 1);
        assert_eq!(stats.delivery.delivered, 1);
        assert_eq!(stats.analyzers["A1"].total_messages, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_analyzer_is_marked_offline_immediately() {
        let client = Arc::new(MockAnalyzerClient::new().with_failing_endpoint(
            "http://a1",
            TransportError::Unreachable("connection refused".to_owned()),
        ));
        // A2 가중치 0: A1이 살아 있는 동안은 선택되지 않음
        let engine = build_engine(&client, test_config(), &[("A1", 1.0), ("A2", 0.0)]);
        let mut events = engine.subscribe();

        engine.enqueue(packet_with("svc-a", 3)).unwrap();
        wait_until(|| client.successful_deliveries().len() == 1).await;

        assert_eq!(
            events.try_recv().unwrap(),
            AnalyzerEvent::Offline {
                id: "A1".to_owned(),
                consecutive_failures: 1
            }
        );
        let deliveries = client.deliveries();
        assert_eq!(deliveries[0].endpoint, "http://a1");
        assert_eq!(deliveries[1].endpoint, "http://a2");
        let stats = engine.stats();
        assert!(!stats.analyzers["A1"].is_online);
        assert_eq!(stats.analyzers["A2"].total_messages, 3);
        assert_eq!(stats.online_analyzers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_timeout_counts_as_unreachable() {
        let client = Arc::new(MockAnalyzerClient::new().with_delivery_delay(Duration::from_secs(30)));
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        engine.enqueue(packet_with("svc-a", 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert!(!engine.registry().get("A1").unwrap().is_online);
        assert_eq!(engine.stats().delivery.failed_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_routes_only_to_live_analyzers() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 0.1), ("A2", 0.9)]);
        engine.registry().mark_offline("A1");

        for _ in 0..20 {
            engine.enqueue(packet_with("svc-a", 3)).unwrap();
        }
        wait_until(|| client.successful_deliveries().len() == 20).await;

        assert!(client.deliveries().iter().all(|d| d.endpoint == "http://a2"));
        let stats = engine.stats();
        assert_eq!(stats.analyzers["A2"].total_messages, 60);
        assert_eq!(stats.analyzers["A1"].total_messages, 0);
        assert!(stats.analyzers["A2"].last_distribution.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_entry_does_not_block_its_batch() {
        let flaky = packet_with("flaky", 1);
        let fast = packet_with("fast", 1);
        let flaky_id = flaky.id().to_owned();
        let fast_id = fast.id().to_owned();
        let client = Arc::new(
            MockAnalyzerClient::new().with_packet_failures(&flaky_id, 1, TransportError::Status(500)),
        );
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        engine.enqueue(flaky).unwrap();
        engine.enqueue(fast).unwrap();
        wait_until(|| client.successful_deliveries().len() == 2).await;

        let fast_attempts = client.attempts_for(&fast_id);
        assert_eq!(fast_attempts.len(), 1);
        assert!(fast_attempts[0].succeeded);
        assert_eq!(client.attempts_for(&flaky_id).len(), 2);
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let client = Arc::new(MockAnalyzerClient::new());
        let mut engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        engine.start().await.unwrap();
        assert_eq!(engine.state_name(), "running");
        assert!(engine.is_health_monitor_running());
        assert!(engine.start().await.is_err());

        engine.stop().await.unwrap();
        assert_eq!(engine.state_name(), "stopped");
        assert!(!engine.is_health_monitor_running());
        assert!(engine.stop().await.is_err());
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let client = Arc::new(MockAnalyzerClient::new());
        let mut engine = build_engine(&client, test_config(), &[]);
        let err = engine.stop().await.unwrap_err();
        assert!(matches!(
            err,
            LogRelayError::Pipeline(PipelineError::NotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_retries_and_rejects_enqueue() {
        let client = Arc::new(
            MockAnalyzerClient::new().with_failing_endpoint("http://a1", TransportError::Status(500)),
        );
        let mut engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        let handle = engine.handle();
        engine.start().await.unwrap();

        let packet = packet_with("svc-a", 1);
        let id = packet.id().to_owned();
        handle.enqueue(packet).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.attempts_for(&id).len(), 1);

        engine.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(client.attempts_for(&id).len(), 1);
        assert_eq!(handle.queue_status().scheduled_retries, 0);
        assert!(matches!(
            handle.enqueue(packet_with("svc-a", 1)),
            Err(DistributorError::Stopped)
        ));
        assert!(engine.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn health_reflects_analyzer_liveness() {
        let client = Arc::new(MockAnalyzerClient::new());
        let mut engine = build_engine(&client, test_config(), &[("A1", 0.5), ("A2", 0.5)]);
        assert!(engine.health_check().await.is_unhealthy());

        engine.start().await.unwrap();
        assert!(engine.health_check().await.is_healthy());

        engine.registry().mark_offline("A1");
        assert!(engine.health_check().await.is_degraded());

        engine.registry().mark_offline("A2");
        assert!(engine.health_check().await.is_unhealthy());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn register_analyzer_starts_health_monitor() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[]);
        assert!(!engine.is_health_monitor_running());

        assert!(!engine.register_analyzer(AnalyzerSpec::new("A1", "http://a1", 1.0)));
        assert!(engine.is_health_monitor_running());
        assert!(engine.register_analyzer(AnalyzerSpec::new("A1", "http://a1-new", 2.0)));
        assert_eq!(engine.registry().len(), 1);

        assert!(engine.unregister_analyzer("A1"));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handle_is_shared_across_tasks() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        let mut producers = JoinSet::new();
        for n in 0..4 {
            let handle = engine.handle();
            producers.spawn(async move {
                for _ in 0..25 {
                    handle.enqueue(packet_with(&format!("svc-{n}"), 1)).unwrap();
                }
            });
        }
        while producers.join_next().await.is_some() {}

        wait_until(|| client.successful_deliveries().len() == 100).await;
        let stats = engine.stats();
        assert_eq!(stats.delivery.enqueued, 100);
        assert_eq!(stats.delivery.delivered, 100);
        assert_eq!(stats.analyzers["A1"].total_messages, 100);
    }

    #[tokio::test]
    async fn enqueue_from_plain_thread_is_delivered() {
        let client = Arc::new(MockAnalyzerClient::new());
        let engine = build_engine(&client, test_config(), &[("A1", 1.0)]);

        let handle = engine.handle();
        let result = std::thread::spawn(move || handle.enqueue(packet_with("svc-a", 1)))
            .join()
            .unwrap();
        assert!(result.is_ok());
        wait_until(|| client.successful_deliveries().len() == 1).await;

        // 루프 플래그가 남아 있지 않아야 다음 패킷도 처리됨
        engine.handle().enqueue(packet_with("svc-a", 1)).unwrap();
        wait_until(|| client.successful_deliveries().len() == 2).await;
        assert_eq!(engine.stats().delivery.delivered, 2);
    }

    #[test]
    fn engine_built_outside_runtime_waits_for_start() {
        let client = Arc::new(MockAnalyzerClient::new());
        let mut engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        let handle = engine.handle();

        assert!(matches!(
            handle.enqueue(packet_with("svc-a", 1)),
            Err(DistributorError::NoRuntime)
        ));
        assert_eq!(handle.queue_status().length, 0);
        assert!(!handle.queue_status().is_processing);
        assert!(!engine.register_analyzer(AnalyzerSpec::new("A2", "http://a2", 1.0)));
        assert!(!engine.is_health_monitor_running());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(engine.start()).unwrap();
        assert!(engine.is_health_monitor_running());

        // 런타임 밖 스레드에서도 start 때 고정한 런타임으로 처리
        handle.enqueue(packet_with("svc-a", 1)).unwrap();
        runtime.block_on(async {
            wait_until(|| client.successful_deliveries().len() == 1).await;
            engine.stop().await.unwrap();
        });
        assert_eq!(handle.stats().delivery.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_during_shutdown_is_abandoned_not_dropped() {
        let client = Arc::new(
            MockAnalyzerClient::new()
                .with_failing_endpoint("http://a1", TransportError::Status(500))
                .with_delivery_delay(Duration::from_secs(2)),
        );
        let mut engine = build_engine(&client, test_config(), &[("A1", 1.0)]);
        let handle = engine.handle();
        engine.start().await.unwrap();

        let packet = packet_with("svc-a", 1);
        let id = packet.id().to_owned();
        handle.enqueue(packet).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(client.attempts_for(&id).is_empty());

        // 전달 도중 정지
        engine.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(client.attempts_for(&id).len(), 1);
        let delivery = handle.stats().delivery;
        assert_eq!(delivery.failed_attempts, 1);
        assert_eq!(delivery.retried, 0);
        assert_eq!(delivery.dropped, 0);
        assert_eq!(handle.queue_status().scheduled_retries, 0);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = EngineStats {
            queue: QueueStatus {
                length: 0,
                is_processing: false,
                oldest_enqueued_at: None,
                scheduled_retries: 0,
            },
            analyzers: BTreeMap::new(),
            total_analyzers: 0,
            online_analyzers: 0,
            delivery: DeliveryCounters::default(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queue"]["isProcessing"], false);
        assert_eq!(json["totalAnalyzers"], 0);
        assert_eq!(json["delivery"]["failedAttempts"], 0);
    }
}

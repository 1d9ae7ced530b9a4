//! 헬스 모니터 -- 주기적 analyzer 프로브
//!
//! [`HealthMonitor`]는 `health_check_interval`마다 등록된 모든 analyzer에
//! `GET {endpoint}/health`를 보내고 결과를 레지스트리에 반영합니다.
//!
//! - 첫 라운드는 시작 후 한 주기가 지난 뒤 실행됩니다.
//! - 프로브는 analyzer마다 별도 태스크에서 동시에 실행되며, 각자
//!   analyzer별 `health_check_timeout`으로 제한됩니다. 느린 analyzer가
//!   다른 analyzer의 판정을 늦추지 않습니다.
//! - 라운드가 주기보다 길어지면 밀린 틱은 건너뜁니다.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logrelay_core::metrics as m;

use crate::client::AnalyzerClient;
use crate::error::{DistributorError, TransportError};
use crate::registry::AnalyzerRegistry;

/// 한 라운드의 프로브 결과 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    /// 프로브한 analyzer 수
    pub probed: usize,
    /// 정상 응답 수
    pub healthy: usize,
    /// 실패 또는 타임아웃 수
    pub failed: usize,
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 주기적 헬스 프로브 실행기
pub struct HealthMonitor<C: AnalyzerClient> {
    registry: Arc<AnalyzerRegistry>,
    client: Arc<C>,
    interval: Duration,
    task: Mutex<Option<MonitorTask>>,
}

impl<C: AnalyzerClient> HealthMonitor<C> {
    pub fn new(registry: Arc<AnalyzerRegistry>, client: Arc<C>, interval: Duration) -> Self {
        Self {
            registry,
            client,
            interval,
            task: Mutex::new(None),
        }
    }

    /// 현재 tokio 런타임에서 백그라운드 프로브 루프를 시작합니다.
    ///
    /// 이미 실행 중이거나 런타임 밖에서 호출되면 `false`를 반환합니다.
    pub fn start(&self) -> bool {
        match Handle::try_current() {
            Ok(runtime) => self.start_on(&runtime),
            Err(_) => {
                warn!("health monitor not started: no tokio runtime");
                false
            }
        }
    }

    /// 지정한 런타임에서 프로브 루프를 시작합니다.
    ///
    /// 이미 실행 중이면 아무것도 하지 않고 `false`를 반환합니다.
    pub fn start_on(&self, runtime: &Handle) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(probe_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.client),
            self.interval,
            cancel.clone(),
        ));
        *task = Some(MonitorTask { cancel, handle });

        info!(interval = ?self.interval, "health monitor started");
        true
    }

    /// 모든 analyzer를 한 번 프로브하고 결과를 반영합니다.
    pub async fn check_all(&self) -> ProbeSummary {
        run_probes(&self.registry, &self.client).await
    }

    /// 프로브 루프를 중지하고 종료를 기다립니다.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "health monitor task ended abnormally");
            }
            info!("health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl<C: AnalyzerClient> Drop for HealthMonitor<C> {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel.cancel();
        }
    }
}

async fn probe_loop<C: AnalyzerClient>(
    registry: Arc<AnalyzerRegistry>,
    client: Arc<C>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    summary = run_probes(&registry, &client) => {
                        debug!(
                            probed = summary.probed,
                            healthy = summary.healthy,
                            failed = summary.failed,
                            "health check round complete"
                        );
                    }
                }
            }
        }
    }
}

async fn run_probes<C: AnalyzerClient>(
    registry: &AnalyzerRegistry,
    client: &Arc<C>,
) -> ProbeSummary {
    let mut probes = JoinSet::new();
    for target in registry.probe_targets() {
        let client = Arc::clone(client);
        probes.spawn(async move {
            let result = tokio::time::timeout(target.timeout, client.probe(&target.endpoint))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            (target.id, result)
        });
    }

    let mut summary = ProbeSummary::default();
    while let Some(joined) = probes.join_next().await {
        let (id, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "health probe task failed");
                continue;
            }
        };

        summary.probed += 1;
        match result {
            Ok(()) => {
                summary.healthy += 1;
                metrics::counter!(m::HEALTH_PROBES_TOTAL, m::LABEL_RESULT => "success")
                    .increment(1);
                registry.record_probe_success(&id);
            }
            Err(source) => {
                summary.failed += 1;
                metrics::counter!(m::HEALTH_PROBES_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                registry.record_probe_failure(&id);
                // 프로브 실패는 밖으로 전파하지 않고 liveness에만 반영
                let failure = DistributorError::Probe {
                    analyzer_id: id,
                    source,
                };
                debug!(error = %failure, "health probe failed");
            }
        }
    }
    summary
}

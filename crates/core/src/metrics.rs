//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logrelay_`
//! - 컴포넌트: `distributor_`, `registry_`, `health_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// analyzer 레이블 키
pub const LABEL_ANALYZER: &str = "analyzer";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 상태 전이 레이블 키 (online, offline)
pub const LABEL_STATE: &str = "state";

// ─── Distributor 메트릭 ─────────────────────────────────────────────

/// 큐에 들어온 패킷 수 (counter)
pub const DISTRIBUTOR_PACKETS_ENQUEUED_TOTAL: &str = "logrelay_distributor_packets_enqueued_total";

/// 전달에 성공한 패킷 수 (counter, label: analyzer)
pub const DISTRIBUTOR_PACKETS_DELIVERED_TOTAL: &str =
    "logrelay_distributor_packets_delivered_total";

/// 전달에 성공한 메시지 수 (counter, label: analyzer)
pub const DISTRIBUTOR_MESSAGES_DELIVERED_TOTAL: &str =
    "logrelay_distributor_messages_delivered_total";

/// 실패한 전달 시도 수 (counter)
pub const DISTRIBUTOR_DELIVERY_FAILURES_TOTAL: &str =
    "logrelay_distributor_delivery_failures_total";

/// 예약된 재시도 수 (counter)
pub const DISTRIBUTOR_RETRIES_TOTAL: &str = "logrelay_distributor_retries_total";

/// 재시도 소진으로 버려진 패킷 수 (counter)
pub const DISTRIBUTOR_PACKETS_DROPPED_TOTAL: &str = "logrelay_distributor_packets_dropped_total";

/// 큐 대기 항목 수 (gauge)
pub const DISTRIBUTOR_QUEUE_LENGTH: &str = "logrelay_distributor_queue_length";

/// 단일 전달 소요 시간 (histogram, 초, label: analyzer)
pub const DISTRIBUTOR_DELIVERY_DURATION_SECONDS: &str =
    "logrelay_distributor_delivery_duration_seconds";

// ─── Registry / Health 메트릭 ───────────────────────────────────────

/// 온라인 analyzer 수 (gauge)
pub const REGISTRY_ANALYZERS_ONLINE: &str = "logrelay_registry_analyzers_online";

/// 등록된 analyzer 수 (gauge)
pub const REGISTRY_ANALYZERS_REGISTERED: &str = "logrelay_registry_analyzers_registered";

/// analyzer 상태 전이 수 (counter, label: state)
pub const REGISTRY_TRANSITIONS_TOTAL: &str = "logrelay_registry_transitions_total";

/// 헬스 프로브 수 (counter, label: result)
pub const HEALTH_PROBES_TOTAL: &str = "logrelay_health_probes_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logrelay_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logrelay_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 전달 지연 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 5s 범위 (기본 전달 타임아웃이 5초)
pub const DELIVERY_DURATION_BUCKETS: [f64; 9] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Distributor
    describe_counter!(
        DISTRIBUTOR_PACKETS_ENQUEUED_TOTAL,
        "Total number of packets accepted into the distribution queue"
    );
    describe_counter!(
        DISTRIBUTOR_PACKETS_DELIVERED_TOTAL,
        "Total number of packets delivered to an analyzer"
    );
    describe_counter!(
        DISTRIBUTOR_MESSAGES_DELIVERED_TOTAL,
        "Total number of log messages delivered to an analyzer"
    );
    describe_counter!(
        DISTRIBUTOR_DELIVERY_FAILURES_TOTAL,
        "Total number of failed delivery attempts"
    );
    describe_counter!(
        DISTRIBUTOR_RETRIES_TOTAL,
        "Total number of delivery retries scheduled with backoff"
    );
    describe_counter!(
        DISTRIBUTOR_PACKETS_DROPPED_TOTAL,
        "Total number of packets dropped after exhausting retries"
    );
    describe_gauge!(
        DISTRIBUTOR_QUEUE_LENGTH,
        "Current number of packets waiting in the distribution queue"
    );
    describe_histogram!(
        DISTRIBUTOR_DELIVERY_DURATION_SECONDS,
        "Time to deliver a single packet in seconds"
    );

    // Registry / Health
    describe_gauge!(
        REGISTRY_ANALYZERS_ONLINE,
        "Number of analyzers currently online"
    );
    describe_gauge!(
        REGISTRY_ANALYZERS_REGISTERED,
        "Number of analyzers registered"
    );
    describe_counter!(
        REGISTRY_TRANSITIONS_TOTAL,
        "Analyzer liveness transitions by target state"
    );
    describe_counter!(HEALTH_PROBES_TOTAL, "Health probes issued by result");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "LogRelay daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

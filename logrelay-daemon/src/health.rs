//! Aggregated health reporting.
//!
//! Combines the engine's own `health_check()` with per-analyzer liveness
//! into a single [`DaemonHealth`] report.
//!
//! # Aggregation Rule
//!
//! - Engine unhealthy (not running, no live analyzer) -> Unhealthy
//! - Any analyzer offline -> Degraded(list of offline analyzers)
//! - Otherwise -> Healthy

use chrono::{DateTime, Utc};
use serde::Serialize;

use logrelay_core::pipeline::HealthStatus;
use logrelay_distributor::{AnalyzerSnapshot, QueueStatus};

/// Health report for the whole daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonHealth {
    /// Overall status (worst of engine and analyzers).
    pub status: HealthStatus,
    /// Seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Distribution queue snapshot.
    pub queue: QueueStatus,
    /// One entry per registered analyzer, in registration order.
    pub analyzers: Vec<AnalyzerHealth>,
}

/// Health of a single analyzer backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerHealth {
    pub id: String,
    pub endpoint: String,
    pub weight: f64,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub total_messages: u64,
    pub last_distribution: Option<DateTime<Utc>>,
    pub last_health_check: DateTime<Utc>,
}

impl From<AnalyzerSnapshot> for AnalyzerHealth {
    fn from(snapshot: AnalyzerSnapshot) -> Self {
        let status = if snapshot.is_online {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy(format!(
                "offline ({} consecutive failures)",
                snapshot.consecutive_failures
            ))
        };

        Self {
            id: snapshot.id,
            endpoint: snapshot.endpoint,
            weight: snapshot.weight,
            status,
            consecutive_failures: snapshot.consecutive_failures,
            total_messages: snapshot.stats.total_messages,
            last_distribution: snapshot.stats.last_distribution,
            last_health_check: snapshot.last_health_check,
        }
    }
}

/// Combine engine and analyzer health into one status.
///
/// An offline analyzer only degrades the daemon; the engine itself reports
/// Unhealthy once no analyzer is live.
pub fn aggregate_status(engine: &HealthStatus, analyzers: &[AnalyzerHealth]) -> HealthStatus {
    if let HealthStatus::Unhealthy(reason) = engine {
        return HealthStatus::Unhealthy(format!("distribution-engine: {reason}"));
    }

    let offline: Vec<&str> = analyzers
        .iter()
        .filter(|a| !a.status.is_healthy())
        .map(|a| a.id.as_str())
        .collect();

    if !offline.is_empty() {
        return HealthStatus::Degraded(format!("offline analyzers: {}", offline.join(", ")));
    }

    match engine {
        HealthStatus::Degraded(reason) => {
            HealthStatus::Degraded(format!("distribution-engine: {reason}"))
        }
        _ => HealthStatus::Healthy,
    }
}

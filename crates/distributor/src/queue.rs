//! 분배 작업 큐 -- 재시도 레인과 신규 레인
//!
//! [`DistributionQueue`]는 전달 대기 중인 패킷을 보관합니다.
//! 재시도 항목은 신규 항목보다 먼저 꺼내지며(큐 머리 재삽입), 각 레인 안에서는
//! FIFO 순서가 유지됩니다.
//!
//! ```text
//! drain_batch ◀── [retry lane: R1 R2 ...] ◀── push_retry
//!             ◀── [fresh lane: P3 P4 ...] ◀── push_back
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use logrelay_core::types::LogPacket;

/// 큐 항목 -- 패킷과 재시도 정보
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// 전달할 패킷
    pub packet: LogPacket,
    /// 큐에 들어온 시각 (재시도 시 갱신)
    pub enqueued_at: DateTime<Utc>,
    /// 지금까지 예약된 재시도 횟수
    pub retry_count: u32,
}

impl QueueEntry {
    /// 재시도 0회 항목을 생성합니다.
    pub fn new(packet: LogPacket) -> Self {
        Self {
            packet,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// 인메모리 분배 큐
#[derive(Debug, Default)]
pub struct DistributionQueue {
    /// 재시도 대기열 (먼저 꺼냄)
    retries: VecDeque<QueueEntry>,
    /// 신규 대기열
    fresh: VecDeque<QueueEntry>,
}

impl DistributionQueue {
    /// 빈 큐를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 신규 항목을 꼬리에 추가합니다.
    pub fn push_back(&mut self, entry: QueueEntry) {
        self.fresh.push_back(entry);
    }

    /// 재시도 항목을 머리 쪽(재시도 레인 끝)에 추가합니다.
    ///
    /// 모든 신규 항목보다 먼저, 이전 재시도 항목보다는 나중에 꺼내집니다.
    pub fn push_retry(&mut self, entry: QueueEntry) {
        self.retries.push_back(entry);
    }

    /// 최대 `batch_size`개를 꺼냅니다. 재시도 레인을 먼저 비웁니다.
    pub fn drain_batch(&mut self, batch_size: usize) -> Vec<QueueEntry> {
        let from_retries = batch_size.min(self.retries.len());
        let mut batch: Vec<QueueEntry> = self.retries.drain(..from_retries).collect();

        let from_fresh = (batch_size - from_retries).min(self.fresh.len());
        batch.extend(self.fresh.drain(..from_fresh));
        batch
    }

    /// 모든 항목을 꺼냅니다.
    pub fn drain_all(&mut self) -> Vec<QueueEntry> {
        self.retries.drain(..).chain(self.fresh.drain(..)).collect()
    }

    /// 대기 중인 항목 수
    pub fn len(&self) -> usize {
        self.retries.len() + self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.fresh.is_empty()
    }

    /// 대기 중인 항목 중 가장 이른 enqueue 시각
    pub fn oldest_enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.retries
            .iter()
            .chain(self.fresh.iter())
            .map(|entry| entry.enqueued_at)
            .min()
    }
}

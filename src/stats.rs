// src/stats.rs

//! # 统计模块 (stats)
//!
//! 总线运行计数器，全部为无锁原子变量。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    undelivered: AtomicU64,
    delivered: AtomicU64,
    faults: AtomicU64,
    evictions: AtomicU64,
}

/// `BusStats` 在某一时刻的快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub published: u64,
    /// 因校验失败或队列已满而被拒绝的发布次数。
    pub rejected: u64,
    pub dispatched: u64,
    /// 已分发但没有任何订阅者的消息数。
    pub undelivered: u64,
    pub delivered: u64,
    pub faults: u64,
    pub evictions: u64,
}

impl BusStats {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_undelivered(&self) {
        self.undelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

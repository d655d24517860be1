// src/persistence.rs

//! # 持久化模块 (persistence)
//!
//! 可选的消息历史存储。分发器在投递之后调用 `append`，失败只记日志；
//! `query` 只给后加入的订阅者和审计工具使用，不在分发路径上。

use crate::error::{BusError, Result};
use crate::message::{Message, MessageKind};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// 半开时间区间 `[start, end)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 从 `start` 到现在。
    pub fn since(start: DateTime<Utc>) -> Self {
        Self { start, end: Utc::now() + chrono::Duration::milliseconds(1) }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// ## `PersistenceAdapter` Trait
#[async_trait::async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn append(&self, message: &Message) -> Result<()>;

    /// 按种类和时间区间查询，结果按时间戳升序。
    /// 给定 `recipient` 时，返回发给它的消息以及所有广播消息。
    async fn query(&self, kind: MessageKind, range: TimeRange, recipient: Option<&str>) -> Result<Vec<Message>>;
}

/// ## `InMemoryStore`
///
/// 只保留最近 `capacity` 条消息，超出后丢弃最旧的。
pub struct InMemoryStore {
    messages: RwLock<VecDeque<Message>>,
    capacity: usize,
}

impl InMemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl PersistenceAdapter for InMemoryStore {
    async fn append(&self, message: &Message) -> Result<()> {
        if self.capacity == 0 {
            return Err(BusError::Persistence("store has zero capacity".into()));
        }
        let mut messages = self.messages.write().await;
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message.clone());
        Ok(())
    }

    async fn query(&self, kind: MessageKind, range: TimeRange, recipient: Option<&str>) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.kind() == kind && range.contains(m.timestamp()))
            .filter(|m| match (recipient, m.recipient()) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
            })
            .cloned()
            .collect();
        // 追加顺序不一定等于时间顺序
        found.sort_by_key(|m| m.timestamp());
        Ok(found)
    }
}

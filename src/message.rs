// src/message.rs

//! # 消息模块 (message)
//!
//! 定义了模块之间通信所使用的统一信封 `Message`。
//! 总线不解释 payload 的含义，只根据 `kind` 和 `recipient` 进行路由。

use crate::error::{BusError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 消息负载：字符串键到任意结构化值的映射。
pub type Payload = Map<String, Value>;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;

/// ## `MessageKind`
///
/// 封闭的消息种类枚举，订阅以它为单位。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    MarketData,
    TradingSignal,
    OrderExecution,
    RiskAlert,
    StrategyUpdate,
    PerformanceMetric,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::MarketData,
        MessageKind::TradingSignal,
        MessageKind::OrderExecution,
        MessageKind::RiskAlert,
        MessageKind::StrategyUpdate,
        MessageKind::PerformanceMetric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::MarketData => "market_data",
            MessageKind::TradingSignal => "trading_signal",
            MessageKind::OrderExecution => "order_execution",
            MessageKind::RiskAlert => "risk_alert",
            MessageKind::StrategyUpdate => "strategy_update",
            MessageKind::PerformanceMetric => "performance_metric",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BusError::InvalidMessage(format!("unknown message kind '{}'", s)))
    }
}

/// ## `Message`
///
/// 不可变的消息信封。字段全部私有，只能通过 `MessageBuilder` 构造，
/// `id` 和 `timestamp` 在构造时一次性填好，此后不再改变。
/// 分发时所有订阅者拿到的是同一个 `Arc<Message>`。
///
/// `clone()` 得到的是同一条消息，`id` 不变。把克隆再发布一次等于重发这条消息，
/// 订阅者和历史记录会看到两次相同的 `id`；需要一条新消息时请重新 `build()`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    kind: MessageKind,
    sender: String,
    recipient: Option<String>,
    payload: Payload,
    timestamp: DateTime<Utc>,
    priority: u8,
}

impl Message {
    /// 开始构造一条消息，默认广播、空 payload、优先级 1。
    pub fn builder(kind: MessageKind, sender: impl Into<String>) -> MessageBuilder {
        MessageBuilder {
            kind,
            sender: sender.into(),
            recipient: None,
            payload: Payload::new(),
            timestamp: None,
            priority: MIN_PRIORITY,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// `None` 表示广播给该种类的所有订阅者。
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// 序列化为 JSON，用于落盘或跨进程转发。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从 JSON 还原一条消息，保留原来的 `id` 和 `timestamp`，并做发布前校验。
    pub fn from_json(raw: &str) -> Result<Message> {
        let message: Message = serde_json::from_str(raw)?;
        message.validate()?;
        Ok(message)
    }

    /// 发布前的校验：优先级必须在 [1,5]，sender 不能为空，
    /// 指定的 recipient 也不能是空字符串。
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(BusError::InvalidMessage(format!(
                "priority {} outside [{}, {}]",
                self.priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }
        if self.sender.trim().is_empty() {
            return Err(BusError::InvalidMessage("sender is empty".into()));
        }
        if matches!(self.recipient.as_deref(), Some(r) if r.trim().is_empty()) {
            return Err(BusError::InvalidMessage("recipient is empty".into()));
        }
        Ok(())
    }
}

/// ## `MessageBuilder`
///
/// 所有默认值都在 `build()` 里一次性填充。
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    kind: MessageKind,
    sender: String,
    recipient: Option<String>,
    payload: Payload,
    timestamp: Option<DateTime<Utc>>,
    priority: u8,
}

impl MessageBuilder {
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// 向 payload 中追加一个字段。
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// 这里不做范围检查，越界的优先级在 `publish` 时被拒绝。
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: Uuid::new_v4(),
            kind: self.kind,
            sender: self.sender,
            recipient: self.recipient,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            priority: self.priority,
        }
    }
}

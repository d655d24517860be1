// src/error.rs

//! # 错误模块 (error)
//!
//! 总线对外暴露的所有错误类型。
//! 只有 `InvalidMessage`、`QueueFull` 和 `Closed` 会返回给发布者，
//! `DeliveryFault` 只在分发器内部记录，不会传播。

use std::error::Error;
use thiserror::Error;

/// 订阅者处理函数的返回类型。
pub type HandlerResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// 优先级越界或缺少必填字段，发布时直接拒绝，没有任何副作用。
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// 待分发队列已满，调用方自行决定重试或丢弃。
    #[error("pending queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// 某个订阅者处理失败或超时。
    #[error("delivery to '{subscriber}' failed: {reason}")]
    DeliveryFault { subscriber: String, reason: String },

    /// 总线已关闭。
    #[error("message bus is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

impl From<config::ConfigError> for BusError {
    fn from(e: config::ConfigError) -> Self {
        BusError::Config(e.to_string())
    }
}

/// JSON 编解码失败说明消息本身不合法。
impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::InvalidMessage(e.to_string())
    }
}

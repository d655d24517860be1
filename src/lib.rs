// src/lib.rs

//! # trading-bus
//!
//! 交易系统内部模块之间的发布/订阅消息总线。
//!
//! - `message`：消息信封和消息种类。
//! - `registry` / `router`：订阅的存储与解析。
//! - `dispatcher` / `delivery`：按优先级分发，并隔离每个订阅者的故障。
//! - `bus`：对外的 `MessageBus` 入口。

pub mod actor;
pub mod bus;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod message;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod stats;
pub mod subscriber;

pub use bus::MessageBus;
pub use config::BusConfig;
pub use error::{BusError, HandlerResult, Result};
pub use message::{Message, MessageKind, Payload};
pub use subscriber::{channel_subscriber, handler_fn, Subscriber};

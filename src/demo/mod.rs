// src/demo/mod.rs

//! # 演示组件 (demo)
//!
//! 几个挂在总线上的模拟组件，用来在一个进程里跑通完整的消息链路：
//! 行情 -> 信号 -> 成交 -> 风控告警 -> 策略状态。

pub mod data;
pub mod execution;
pub mod risk;
pub mod strategy;

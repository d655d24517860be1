// src/config.rs

//! # 配置模块 (config)
//!
//! 总线的启动参数。进程启动时构造一次，然后按值传给各个组件，
//! 运行期间不支持热更新。

use crate::error::{BusError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 默认日志级别，`RUST_LOG` 存在时以它为准。
    pub level: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            with_target: true,
        }
    }
}

/// ## `BusConfig`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 待分发队列的容量，满了以后 `publish` 返回 `QueueFull`。
    pub queue_capacity: usize,
    /// 连续失败多少次后自动注销订阅者。
    pub fault_threshold: u32,
    /// 单次投递的超时时间（毫秒）。
    pub delivery_timeout_ms: u64,
    /// 每个订阅的收件箱容量。
    pub subscriber_buffer: usize,
    /// 内存历史记录保留的消息条数，0 表示不保留。
    pub history_capacity: usize,
    pub log: LogConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            fault_threshold: 3,
            delivery_timeout_ms: 5_000,
            subscriber_buffer: 256,
            history_capacity: 10_000,
            log: LogConfig::default(),
        }
    }
}

impl BusConfig {
    /// 依次合并：`config/bus.*`（可选）-> `BUS_` 前缀的环境变量，缺省字段取默认值。
    ///
    /// 环境变量用 `__` 分隔层级，例如 `BUS_QUEUE_CAPACITY=64`、`BUS_LOG__LEVEL=debug`。
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("config/bus").required(false))
            .add_source(
                Environment::with_prefix("BUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: BusConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从指定文件加载，文件里没写的字段使用默认值。
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;
        let cfg: BusConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(BusError::Config("queue_capacity must be > 0".into()));
        }
        if self.fault_threshold == 0 {
            return Err(BusError::Config("fault_threshold must be > 0".into()));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(BusError::Config("delivery_timeout_ms must be > 0".into()));
        }
        if self.subscriber_buffer == 0 {
            return Err(BusError::Config("subscriber_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

// src/logging.rs

//! # 日志模块 (logging)

use crate::config::LogConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// 初始化全局日志。
/// `RUST_LOG` 存在时优先使用，例如 `RUST_LOG=info,DISPATCH=debug`。
/// 重复调用不会 panic，第二次起直接忽略。
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init();
}

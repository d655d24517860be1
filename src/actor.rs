// src/actor.rs

//! # Actor 模块
//!
//! 挂在总线上的独立组件（行情源、策略、执行、风控）的通用生命周期。

use std::sync::Arc;
use tokio::task::JoinHandle;

/// ## `Actor` Trait
///
/// Actor 在 `start` 中向总线注册自己需要的订阅，
/// 并返回后台任务的句柄，便于主程序统一等待或中止。
#[async_trait::async_trait]
pub trait Actor: Send + Sync {
    /// 出现在日志和 `sender` 字段里的名字，同时也是订阅用的 subscriber_id。
    fn name(&self) -> &str;

    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>>;
}

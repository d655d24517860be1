// src/bus.rs

//! # 消息总线模块 (bus)
//!
//! 提供了整个系统的通信中枢 `MessageBus`。
//! 它把注册表、路由、分发器和可选的持久化组装在一起，
//! 各个组件只需要持有一个 `MessageBus` 的克隆。

use crate::config::BusConfig;
use crate::delivery::DeliveryContext;
use crate::dispatcher::Dispatcher;
use crate::error::{BusError, Result};
use crate::message::{Message, MessageKind};
use crate::persistence::{InMemoryStore, PersistenceAdapter, TimeRange};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::stats::{BusStats, StatsSnapshot};
use crate::subscriber::Subscriber;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// ## `MessageBus`
///
/// 克隆开销很小，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct MessageBus {
    config: Arc<BusConfig>,
    registry: SubscriptionRegistry,
    dispatcher: Arc<Dispatcher>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    stats: Arc<BusStats>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MessageBus {
    /// 创建一个新的 `MessageBus`。
    /// `history_capacity > 0` 时附带一个内存历史存储。
    pub fn new(config: BusConfig) -> Self {
        let persistence: Option<Arc<dyn PersistenceAdapter>> = match config.history_capacity {
            0 => None,
            n => Some(Arc::new(InMemoryStore::new(n))),
        };
        Self::build(config, persistence)
    }

    /// 使用外部提供的持久化实现。
    pub fn with_persistence(config: BusConfig, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        Self::build(config, Some(persistence))
    }

    fn build(config: BusConfig, persistence: Option<Arc<dyn PersistenceAdapter>>) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let registry = SubscriptionRegistry::new(DeliveryContext {
            timeout: config.delivery_timeout(),
            buffer: config.subscriber_buffer,
            reports: reports_tx,
        });
        let stats = Arc::new(BusStats::default());
        let dispatcher = Dispatcher::new(
            config.clone(),
            registry.clone(),
            reports_rx,
            persistence.clone(),
            stats.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            registry,
            dispatcher: Arc::new(dispatcher),
            persistence,
            stats,
            shutdown: Arc::new(shutdown),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// 启动后台分发循环。重复调用只会启动一次。
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(dispatcher.run(shutdown)));
        info!(target: "BUS", capacity = self.config.queue_capacity, "Message bus started");
    }

    /// ## `shutdown`
    ///
    /// 停止分发循环并清空注册表。已经在收件箱里的消息仍会被投递完，
    /// 还在待分发队列中的消息被丢弃。
    pub async fn shutdown(&self) {
        self.dispatcher.close();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.registry.clear().await;
        info!(target: "BUS", stats = ?self.stats.snapshot(), "Message bus shut down");
    }

    /// ## `publish`
    ///
    /// 异步发布一条消息，返回总线中共享的 `Arc<Message>`。
    /// 没有订阅者时同样返回成功，消息被静默丢弃并计入 `undelivered`。
    pub async fn publish(&self, message: Message) -> Result<Arc<Message>> {
        self.dispatcher.publish(message).await
    }

    /// ## `subscribe`
    ///
    /// 为 (subscriber_id, kind) 注册处理函数，已存在时替换。
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        kind: MessageKind,
        handler: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionHandle> {
        if self.dispatcher.is_closed() {
            return Err(BusError::Closed);
        }
        let subscriber_id = subscriber_id.into();
        let handle = self.registry.register(subscriber_id.as_str(), kind, handler).await;
        self.dispatcher.reset_faults(&subscriber_id).await;
        Ok(handle)
    }

    /// 注销一个订阅，不存在时返回 `false`。
    pub async fn unsubscribe(&self, subscriber_id: &str, kind: MessageKind) -> bool {
        let removed = self.registry.unregister(subscriber_id, kind).await;
        self.dispatcher.reset_faults(subscriber_id).await;
        removed
    }

    /// 注销某个订阅者的全部订阅。
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let removed = self.registry.unregister_all(subscriber_id).await;
        self.dispatcher.reset_faults(subscriber_id).await;
        removed
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// 查询历史消息，给后加入的订阅者补齐状态或用于审计。
    /// 没有配置持久化时返回空列表。
    pub async fn history(&self, kind: MessageKind, range: TimeRange, recipient: Option<&str>) -> Result<Vec<Message>> {
        match &self.persistence {
            Some(store) => store.query(kind, range, recipient).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 待分发队列中的消息数。
    pub async fn pending(&self) -> usize {
        self.dispatcher.pending().await
    }
}

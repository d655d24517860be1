// src/dispatcher.rs

//! # 分发器模块 (dispatcher)
//!
//! 接收发布的消息，按优先级排序，再交给路由解析并投递到各订阅的收件箱。
//!
//! 排序规则：优先级高的先出；同优先级按时间戳先后；再相同则按发布顺序。
//! 持续不断的高优先级消息会让低优先级消息一直等待，这里不做公平性补偿。

use crate::config::BusConfig;
use crate::delivery::{DeliveryReport, ReportReceiver};
use crate::error::{BusError, Result};
use crate::message::Message;
use crate::persistence::PersistenceAdapter;
use crate::registry::SubscriptionRegistry;
use crate::router::Router;
use crate::stats::BusStats;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// 队列中的一条待分发消息。
struct Pending {
    priority: u8,
    timestamp: DateTime<Utc>,
    seq: u64,
    message: Arc<Message>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    /// `BinaryHeap` 是大顶堆：优先级大的排前面，时间戳和序号小的排前面。
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// ## `Dispatcher`
pub struct Dispatcher {
    config: BusConfig,
    router: Router,
    registry: SubscriptionRegistry,
    queue: Mutex<BinaryHeap<Pending>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
    /// 每个订阅者的连续故障次数。只有分发循环会修改它。
    faults: Mutex<HashMap<String, u32>>,
    reports: Mutex<Option<ReportReceiver>>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    stats: Arc<BusStats>,
}

impl Dispatcher {
    pub fn new(
        config: BusConfig,
        registry: SubscriptionRegistry,
        reports: ReportReceiver,
        persistence: Option<Arc<dyn PersistenceAdapter>>,
        stats: Arc<BusStats>,
    ) -> Self {
        Self {
            config,
            router: Router::new(registry.clone()),
            registry,
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            faults: Mutex::new(HashMap::new()),
            reports: Mutex::new(Some(reports)),
            persistence,
            stats,
        }
    }

    /// ## `publish`
    ///
    /// 校验后放入待分发队列，立即返回，不等待投递。
    /// - 校验失败返回 `InvalidMessage`，队列不受影响。
    /// - 队列已满返回 `QueueFull`，由调用方决定重试还是丢弃。
    pub async fn publish(&self, message: Message) -> Result<Arc<Message>> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(BusError::Closed);
        }
        if let Err(e) = message.validate() {
            self.stats.record_rejected();
            return Err(e);
        }

        let message = Arc::new(message);
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.config.queue_capacity {
                self.stats.record_rejected();
                warn!(target: "DISPATCH", capacity = self.config.queue_capacity, "Queue full, rejecting {}", message.id());
                return Err(BusError::QueueFull {
                    capacity: self.config.queue_capacity,
                });
            }
            queue.push(Pending {
                priority: message.priority(),
                timestamp: message.timestamp(),
                seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
                message: message.clone(),
            });
        }
        self.stats.record_published();
        self.notify.notify_one();
        debug!(target: "DISPATCH", id = %message.id(), kind = %message.kind(), priority = message.priority(), "Message queued");
        Ok(message)
    }

    /// 当前待分发的消息数。
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Acquire)
    }

    /// 取出队首消息，队列为空时等待新的发布。
    async fn next_pending(&self) -> Arc<Message> {
        loop {
            if let Some(pending) = self.queue.lock().await.pop() {
                return pending.message;
            }
            self.notify.notified().await;
        }
    }

    /// ## `run`
    ///
    /// 分发循环。同时处理三件事：关闭信号、投递报告、下一条待分发消息。
    /// 投递报告优先处理，这样被驱逐的订阅者不会再收到后续消息。
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut reports) = self.reports.lock().await.take() else {
            warn!(target: "DISPATCH", "Dispatch loop already started");
            return;
        };
        info!(target: "DISPATCH", "Dispatch loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(report) = reports.recv() => self.handle_report(report).await,
                message = self.next_pending() => self.dispatch(message).await,
            }
        }

        // 把还没处理的报告计入统计，然后关闭。
        while let Ok(report) = reports.try_recv() {
            self.handle_report(report).await;
        }
        let pending = self.pending().await;
        info!(target: "DISPATCH", pending, "Dispatch loop stopped");
    }

    /// 把一条消息投递到所有解析出的订阅。
    /// 使用 `try_send`，收件箱满了直接记一次故障，不等待。
    async fn dispatch(&self, message: Arc<Message>) {
        self.stats.record_dispatched();
        let subscriptions = self.router.resolve(&message).await;

        if subscriptions.is_empty() {
            self.stats.record_undelivered();
            debug!(target: "DISPATCH", id = %message.id(), kind = %message.kind(), "No subscribers, message dropped");
        }

        for subscription in subscriptions {
            match subscription.inbox.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(target: "DISPATCH", subscriber = %subscription.subscriber_id(), "Inbox full, delivery fault");
                    self.record_fault(subscription.subscriber_id(), "inbox full").await;
                }
                Err(TrySendError::Closed(_)) => {
                    // 订阅刚刚被替换或注销
                    debug!(target: "DISPATCH", subscriber = %subscription.subscriber_id(), "Inbox closed, skipping");
                }
            }
        }

        if let Some(store) = &self.persistence {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.append(&message).await {
                    warn!(target: "PERSIST", id = %message.id(), "Failed to persist message: {}", e);
                }
            });
        }
    }

    /// 处理一份投递报告。
    /// 已被替换或注销的注册发来的报告只计入统计，不影响当前注册的故障计数。
    async fn handle_report(&self, report: DeliveryReport) {
        let current = self.registry.is_current(&report.handle).await;
        let subscriber_id = &report.handle.subscriber_id;
        match report.outcome {
            Ok(()) => {
                self.stats.record_delivered();
                if current {
                    self.faults.lock().await.remove(subscriber_id);
                }
            }
            Err(fault) if !current => {
                self.stats.record_fault();
                debug!(target: "DISPATCH", subscriber = %subscriber_id, id = %report.message_id, "Ignoring fault from stale registration: {}", fault);
            }
            Err(fault) => {
                debug!(target: "DISPATCH", kind = %report.handle.kind, id = %report.message_id, "Fault reported: {}", fault);
                self.record_fault(subscriber_id, &fault.to_string()).await;
            }
        }
    }

    /// 清零某个订阅者的连续故障计数。注册、注销时调用。
    pub async fn reset_faults(&self, subscriber_id: &str) {
        self.faults.lock().await.remove(subscriber_id);
    }

    /// 记录一次故障；连续故障达到阈值时注销该订阅者的全部订阅。
    async fn record_fault(&self, subscriber_id: &str, reason: &str) {
        self.stats.record_fault();
        let count = {
            let mut faults = self.faults.lock().await;
            let count = faults.entry(subscriber_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.config.fault_threshold {
            self.faults.lock().await.remove(subscriber_id);
            let removed = self.registry.unregister_all(subscriber_id).await;
            if removed > 0 {
                self.stats.record_eviction();
                warn!(target: "DISPATCH", subscriber = %subscriber_id, faults = count, "Evicting subscriber after repeated faults (last: {})", reason);
            }
        }
    }

    /// 标记为关闭，之后的 `publish` 都会返回 `Closed`。
    pub(crate) fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }

    /// 不启动循环，直接按顺序分发当前队列中的全部消息，返回分发条数。
    /// 用于没有后台任务的场景，例如回放和测试。
    pub async fn drain(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.queue.lock().await.pop();
            match next {
                Some(pending) => {
                    self.dispatch(pending.message).await;
                    count += 1;
                }
                None => return count,
            }
        }
    }
}

// src/registry.rs

//! # 订阅注册表模块 (registry)
//!
//! 活跃订阅的唯一权威存储。
//! 写操作（注册、注销）持有写锁，查询持有读锁，
//! 所以查询总能看到一个完整的快照，不会看到注册到一半的状态。

use crate::delivery::{spawn_worker, DeliveryContext};
use crate::message::{Message, MessageKind};
use crate::subscriber::Subscriber;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// 注册成功后返回给订阅者的句柄。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub subscriber_id: String,
    pub kind: MessageKind,
}

/// ## `Subscription`
///
/// 一个 (subscriber_id, kind) 到处理函数的绑定。
/// `inbox` 是该订阅投递任务的收件箱。
#[derive(Clone)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub handler: Arc<dyn Subscriber>,
    pub(crate) inbox: mpsc::Sender<Arc<Message>>,
}

impl Subscription {
    pub fn subscriber_id(&self) -> &str {
        &self.handle.subscriber_id
    }

    pub fn kind(&self) -> MessageKind {
        self.handle.kind
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// ## `SubscriptionRegistry`
///
/// Key: 消息种类。
/// Value: subscriber_id 到订阅的映射，保证每个 (subscriber, kind) 最多一个订阅。
#[derive(Clone)]
pub struct SubscriptionRegistry {
    subscriptions: Arc<RwLock<HashMap<MessageKind, HashMap<String, Subscription>>>>,
    delivery: DeliveryContext,
}

impl SubscriptionRegistry {
    pub fn new(delivery: DeliveryContext) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            delivery,
        }
    }

    /// ## `register`
    ///
    /// 对同一个 (subscriber_id, kind) 幂等：再次注册会替换处理函数，而不是新增一条。
    /// 被替换的旧投递任务会处理完已经在收件箱里的消息后退出。
    pub async fn register(
        &self,
        subscriber_id: impl Into<String>,
        kind: MessageKind,
        handler: Arc<dyn Subscriber>,
    ) -> SubscriptionHandle {
        let subscriber_id = subscriber_id.into();
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            subscriber_id: subscriber_id.clone(),
            kind,
        };
        let inbox = spawn_worker(&self.delivery, handle.clone(), handler.clone());
        let subscription = Subscription {
            handle: handle.clone(),
            handler,
            inbox,
        };

        let mut subscriptions = self.subscriptions.write().await;
        let replaced = subscriptions
            .entry(kind)
            .or_default()
            .insert(subscriber_id.clone(), subscription)
            .is_some();

        if replaced {
            info!(target: "REGISTRY", subscriber = %subscriber_id, %kind, "Subscription replaced");
        } else {
            info!(target: "REGISTRY", subscriber = %subscriber_id, %kind, "Subscription registered");
        }
        handle
    }

    /// 注销一个订阅。不存在时什么也不做，返回 `false`。
    pub async fn unregister(&self, subscriber_id: &str, kind: MessageKind) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let removed = match subscriptions.get_mut(&kind) {
            Some(by_subscriber) => {
                let removed = by_subscriber.remove(subscriber_id).is_some();
                if by_subscriber.is_empty() {
                    subscriptions.remove(&kind);
                }
                removed
            }
            None => false,
        };

        if removed {
            info!(target: "REGISTRY", subscriber = %subscriber_id, %kind, "Subscription removed");
        } else {
            debug!(target: "REGISTRY", subscriber = %subscriber_id, %kind, "Unknown subscription, nothing to remove");
        }
        removed
    }

    /// 注销某个订阅者的全部订阅，返回移除的数量。
    pub async fn unregister_all(&self, subscriber_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let mut removed = 0;
        subscriptions.retain(|_, by_subscriber| {
            if by_subscriber.remove(subscriber_id).is_some() {
                removed += 1;
            }
            !by_subscriber.is_empty()
        });

        if removed > 0 {
            info!(target: "REGISTRY", subscriber = %subscriber_id, removed, "All subscriptions removed");
        } else {
            debug!(target: "REGISTRY", subscriber = %subscriber_id, "Unknown subscriber, nothing to remove");
        }
        removed
    }

    /// 某个种类当前所有订阅的快照。
    pub async fn subscriptions_for(&self, kind: MessageKind) -> Vec<Subscription> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(&kind)
            .map(|by_subscriber| by_subscriber.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 某个种类下指定订阅者的订阅。
    pub async fn get(&self, subscriber_id: &str, kind: MessageKind) -> Option<Subscription> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(&kind)
            .and_then(|by_subscriber| by_subscriber.get(subscriber_id))
            .cloned()
    }

    /// 某个订阅者订阅了哪些种类。
    pub async fn subscriptions_of(&self, subscriber_id: &str) -> Vec<MessageKind> {
        let subscriptions = self.subscriptions.read().await;
        let mut kinds: Vec<MessageKind> = subscriptions
            .iter()
            .filter(|(_, by_subscriber)| by_subscriber.contains_key(subscriber_id))
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub async fn contains(&self, subscriber_id: &str, kind: MessageKind) -> bool {
        self.get(subscriber_id, kind).await.is_some()
    }

    /// 句柄对应的注册是否仍然有效（没有被注销或替换）。
    pub async fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.get(&handle.subscriber_id, handle.kind)
            .await
            .is_some_and(|s| s.handle.id == handle.id)
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 清空所有订阅，关闭全部收件箱。总线关闭时调用。
    pub async fn clear(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        let count: usize = subscriptions.values().map(HashMap::len).sum();
        subscriptions.clear();
        info!(target: "REGISTRY", count, "Registry cleared");
    }
}

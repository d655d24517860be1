// src/router.rs

//! # 路由模块 (router)
//!
//! 把一条消息解析为应当收到它的订阅集合。纯查询，没有副作用。

use crate::message::Message;
use crate::registry::{Subscription, SubscriptionRegistry};

#[derive(Clone)]
pub struct Router {
    registry: SubscriptionRegistry,
}

impl Router {
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// ## `resolve`
    ///
    /// - 没有 `recipient`：返回该种类的全部订阅（广播）。
    /// - 有 `recipient`：只返回 subscriber_id 与之相同的那一个订阅。
    /// - 没有订阅者时返回空集合，这不是错误。
    ///
    /// 结果按 subscriber_id 排序，保证同一快照下的投递顺序是确定的。
    pub async fn resolve(&self, message: &Message) -> Vec<Subscription> {
        match message.recipient() {
            Some(recipient) => self
                .registry
                .get(recipient, message.kind())
                .await
                .into_iter()
                .collect(),
            None => {
                let mut subscriptions = self.registry.subscriptions_for(message.kind()).await;
                subscriptions.sort_by(|a, b| a.subscriber_id().cmp(b.subscriber_id()));
                subscriptions
            }
        }
    }
}

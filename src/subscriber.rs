// src/subscriber.rs

//! # 订阅者模块 (subscriber)
//!
//! 任何实现了 `Subscriber` 的组件都可以注册到总线上。
//! 总线只持有 `Arc<dyn Subscriber>` 引用，不接管订阅者自身的状态。

use crate::error::HandlerResult;
use crate::message::Message;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// ## `Subscriber` Trait
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// 处理一条消息。返回错误或超时都会被记为一次投递故障。
    async fn handle(&self, message: Arc<Message>) -> HandlerResult;
}

type BoxedHandler =
    Box<dyn Fn(Arc<Message>) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// ## `FnSubscriber`
///
/// 把一个异步闭包包装成 `Subscriber`。
pub struct FnSubscriber {
    handler: BoxedHandler,
}

#[async_trait::async_trait]
impl Subscriber for FnSubscriber {
    async fn handle(&self, message: Arc<Message>) -> HandlerResult {
        (self.handler)(message).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<FnSubscriber>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnSubscriber {
        handler: Box::new(move |msg| Box::pin(f(msg))),
    })
}

/// ## `ChannelSubscriber`
///
/// 把消息转发到一个有界的 `mpsc` 通道，由订阅者在自己的任务里消费。
/// 通道满时 `handle` 会等待，等待时间受总线的投递超时约束。
#[derive(Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::Sender<Arc<Message>>,
}

#[async_trait::async_trait]
impl Subscriber for ChannelSubscriber {
    async fn handle(&self, message: Arc<Message>) -> HandlerResult {
        self.sender
            .send(message)
            .await
            .map_err(|_| "inbound channel closed".into())
    }
}

/// 创建一个 `ChannelSubscriber` 和对应的接收端。
pub fn channel_subscriber(capacity: usize) -> (Arc<ChannelSubscriber>, mpsc::Receiver<Arc<Message>>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Arc::new(ChannelSubscriber { sender }), receiver)
}

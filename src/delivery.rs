// src/delivery.rs

//! # 投递模块 (delivery)
//!
//! 每个订阅都有一个独立的投递任务和一个有界收件箱。
//! 分发器只负责把消息塞进收件箱，真正调用处理函数的是这里的任务，
//! 所以一个慢订阅者不会拖住分发循环，也不会影响其他订阅者。

use crate::error::BusError;
use crate::message::Message;
use crate::registry::SubscriptionHandle;
use crate::subscriber::Subscriber;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 投递任务发回分发器的结果报告。
#[derive(Clone, Debug)]
pub struct DeliveryReport {
    /// 发出报告的那一次注册。订阅被替换或注销后，旧句柄的报告不再计入故障阈值。
    pub handle: SubscriptionHandle,
    pub message_id: Uuid,
    /// 失败时为 `BusError::DeliveryFault`。
    pub outcome: Result<(), BusError>,
}

pub type ReportSender = mpsc::UnboundedSender<DeliveryReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<DeliveryReport>;

/// 投递任务共享的参数。
#[derive(Clone)]
pub struct DeliveryContext {
    pub timeout: Duration,
    pub buffer: usize,
    pub reports: ReportSender,
}

/// 启动一个投递任务，返回它收件箱的发送端。
///
/// 发送端全部被丢弃后，任务会把收件箱里剩余的消息处理完再退出。
pub fn spawn_worker(
    ctx: &DeliveryContext,
    handle: SubscriptionHandle,
    handler: Arc<dyn Subscriber>,
) -> mpsc::Sender<Arc<Message>> {
    let (inbox_tx, mut inbox_rx) = mpsc::channel::<Arc<Message>>(ctx.buffer);
    let timeout = ctx.timeout;
    let reports = ctx.reports.clone();

    tokio::spawn(async move {
        while let Some(message) = inbox_rx.recv().await {
            let message_id = message.id();
            let outcome = deliver(handler.as_ref(), message, timeout)
                .await
                .map_err(|reason| BusError::DeliveryFault {
                    subscriber: handle.subscriber_id.clone(),
                    reason,
                });
            if let Err(fault) = &outcome {
                warn!(target: "DELIVERY", kind = %handle.kind, %message_id, "{}", fault);
            }
            let report = DeliveryReport {
                handle: handle.clone(),
                message_id,
                outcome,
            };
            // 分发器已经退出时，报告没人接收，忽略即可。
            let _ = reports.send(report);
        }
        debug!(target: "DELIVERY", subscriber = %handle.subscriber_id, kind = %handle.kind, "Inbox closed, worker exiting");
    });

    inbox_tx
}

/// 在超时内调用一次处理函数，错误、超时和 panic 都转换成故障原因。
async fn deliver(handler: &dyn Subscriber, message: Arc<Message>, timeout: Duration) -> Result<(), String> {
    let attempt = AssertUnwindSafe(handler.handle(message)).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(_)) => Err("handler panicked".to_string()),
        Err(_) => Err(format!("handler timed out after {:?}", timeout)),
    }
}

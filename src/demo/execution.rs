// src/demo/execution.rs

//! # 执行引擎模块 (execution)
//!
//! 模拟与交易所的交互，把交易信号变成成交回报。

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use trading_bus::actor::Actor;
use trading_bus::{channel_subscriber, Message, MessageBus, MessageKind};

/// ## `SimulatedExecutionEngine`
///
/// - 消费定向发给自己的 `TradingSignal`。
/// - 按信号价格全部成交，广播 `OrderExecution`。
pub struct SimulatedExecutionEngine {
    bus: MessageBus,
}

impl SimulatedExecutionEngine {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }

    fn fill_for(&self, signal: &Message) -> Message {
        let mut fill = signal.payload().clone();
        fill.insert("signal_id".into(), Value::String(signal.id().to_string()));
        Message::builder(MessageKind::OrderExecution, self.name())
            .priority(4)
            .payload(fill)
            .build()
    }
}

#[async_trait::async_trait]
impl Actor for SimulatedExecutionEngine {
    fn name(&self) -> &str {
        "execution"
    }

    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let (sub, mut signal_rx) = channel_subscriber(64);
        if let Err(e) = self.bus.subscribe(self.name(), MessageKind::TradingSignal, sub).await {
            error!(target: "EXECUTION", "Failed to subscribe: {}", e);
        }

        let handle = tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                info!(target: "EXECUTION", "Received signal {}. Simulating fill...", signal.id());
                let fill = self.fill_for(&signal);
                if let Err(e) = self.bus.publish(fill).await {
                    error!(target: "EXECUTION", "Failed to publish fill: {}", e);
                }
            }
        });

        vec![handle]
    }
}

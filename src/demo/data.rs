// src/demo/data.rs

//! # 数据引擎模块 (data)
//!
//! 模拟一个实时行情源，作为 `MarketData` 消息的生产者。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use trading_bus::actor::Actor;
use trading_bus::{Message, MessageBus, MessageKind};

/// ## `SimulatedDataEngine`
///
/// 周期性地广播一条 `MarketData` 消息，价格单调上涨。
pub struct SimulatedDataEngine {
    bus: MessageBus,
    symbol: String,
    interval: Duration,
}

impl SimulatedDataEngine {
    pub fn new(bus: MessageBus, symbol: String, interval: Duration) -> Self {
        Self { bus, symbol, interval }
    }
}

#[async_trait::async_trait]
impl Actor for SimulatedDataEngine {
    fn name(&self) -> &str {
        "data"
    }

    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let handle = tokio::spawn(async move {
            let mut price = 100.0;
            loop {
                let bar = Message::builder(MessageKind::MarketData, self.name())
                    .insert("symbol", self.symbol.clone())
                    .insert("close", price)
                    .build();

                info!(target: "DATA", "Publishing bar {} close={}", bar.id(), price);
                if let Err(e) = self.bus.publish(bar).await {
                    error!(target: "DATA", "Failed to publish bar: {}", e);
                }

                price += 1.0;
                tokio::time::sleep(self.interval).await;
            }
        });
        vec![handle]
    }
}

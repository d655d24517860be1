// src/demo/risk.rs

//! # 风控模块 (risk)

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trading_bus::actor::Actor;
use trading_bus::{channel_subscriber, Message, MessageBus, MessageKind};

/// ## `RiskMonitor`
///
/// 累计成交敞口，超过上限时发出最高优先级的 `RiskAlert`，
/// 每笔成交后广播一条 `PerformanceMetric`。
pub struct RiskMonitor {
    bus: MessageBus,
    max_exposure: f64,
    exposure: Mutex<f64>,
}

impl RiskMonitor {
    pub fn new(bus: MessageBus, max_exposure: f64) -> Self {
        Self {
            bus,
            max_exposure,
            exposure: Mutex::new(0.0),
        }
    }

    async fn handle_fill(&self, fill: &Message) {
        let price = fill.payload().get("price").and_then(Value::as_f64).unwrap_or(0.0);
        let quantity = fill.payload().get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
        let exposure = {
            let mut exposure = self.exposure.lock().await;
            *exposure += price * quantity;
            *exposure
        };
        info!(target: "RISK", "Fill {} -> exposure {:.2}", fill.id(), exposure);

        let mut outgoing = vec![Message::builder(MessageKind::PerformanceMetric, self.name())
            .insert("exposure", exposure)
            .build()];
        if exposure > self.max_exposure {
            warn!(target: "RISK", "Exposure {:.2} above limit {:.2}", exposure, self.max_exposure);
            outgoing.push(
                Message::builder(MessageKind::RiskAlert, self.name())
                    .priority(5)
                    .insert("exposure", exposure)
                    .insert("limit", self.max_exposure)
                    .build(),
            );
        }
        for msg in outgoing {
            if let Err(e) = self.bus.publish(msg).await {
                error!(target: "RISK", "Failed to publish: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for RiskMonitor {
    fn name(&self) -> &str {
        "risk"
    }

    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let (sub, mut fill_rx) = channel_subscriber(64);
        if let Err(e) = self.bus.subscribe(self.name(), MessageKind::OrderExecution, sub).await {
            error!(target: "RISK", "Failed to subscribe: {}", e);
        }

        let handle = tokio::spawn(async move {
            while let Some(fill) = fill_rx.recv().await {
                self.handle_fill(&fill).await;
            }
        });
        vec![handle]
    }
}

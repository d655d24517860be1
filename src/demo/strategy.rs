// src/demo/strategy.rs

//! # 策略模块 (strategy)
//!
//! 消费行情和风控告警，产出交易信号和策略状态更新。

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trading_bus::actor::Actor;
use trading_bus::{channel_subscriber, Message, MessageBus, MessageKind};

/// ## `SimpleTrendFollower`
///
/// - 收盘价超过阈值时，向 `execution` 定向发送买入信号。
/// - 收到 `RiskAlert` 后停止出信号，并广播一条 `StrategyUpdate`。
pub struct SimpleTrendFollower {
    bus: MessageBus,
    symbol: String,
    threshold: f64,
    halted: AtomicBool,
}

impl SimpleTrendFollower {
    pub fn new(bus: MessageBus, symbol: String, threshold: f64) -> Self {
        Self {
            bus,
            symbol,
            threshold,
            halted: AtomicBool::new(false),
        }
    }

    async fn handle_bar(&self, bar: &Message) {
        if bar.payload().get("symbol").and_then(Value::as_str) != Some(self.symbol.as_str()) {
            return;
        }
        let Some(close) = bar.payload().get("close").and_then(Value::as_f64) else {
            warn!(target: "STRATEGY", "Bar {} has no close price", bar.id());
            return;
        };
        if self.halted.load(Ordering::Relaxed) || close <= self.threshold {
            return;
        }

        let signal = Message::builder(MessageKind::TradingSignal, self.name())
            .recipient("execution")
            .priority(3)
            .insert("symbol", self.symbol.clone())
            .insert("side", "buy")
            .insert("price", close)
            .insert("quantity", 1.0)
            .build();
        info!(target: "STRATEGY", "close={} above {}, signalling buy", close, self.threshold);
        if let Err(e) = self.bus.publish(signal).await {
            error!(target: "STRATEGY", "Failed to publish signal: {}", e);
        }
    }

    async fn handle_alert(&self, alert: &Message) {
        if self.halted.swap(true, Ordering::Relaxed) {
            return;
        }
        warn!(target: "STRATEGY", "Risk alert from {}: {:?}. Halting.", alert.sender(), alert.payload());
        let update = Message::builder(MessageKind::StrategyUpdate, self.name())
            .priority(4)
            .insert("symbol", self.symbol.clone())
            .insert("status", "halted")
            .build();
        if let Err(e) = self.bus.publish(update).await {
            error!(target: "STRATEGY", "Failed to publish update: {}", e);
        }
    }
}

#[async_trait::async_trait]
impl Actor for SimpleTrendFollower {
    fn name(&self) -> &str {
        "strategy"
    }

    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let (bar_sub, mut bar_rx) = channel_subscriber(64);
        let (alert_sub, mut alert_rx) = channel_subscriber(16);
        for (kind, sub) in [(MessageKind::MarketData, bar_sub), (MessageKind::RiskAlert, alert_sub)] {
            if let Err(e) = self.bus.subscribe(self.name(), kind, sub).await {
                error!(target: "STRATEGY", "Failed to subscribe to {}: {}", kind, e);
            }
        }

        let this = self.clone();
        let bar_handler = tokio::spawn(async move {
            while let Some(bar) = bar_rx.recv().await {
                this.handle_bar(&bar).await;
            }
        });

        let this = self.clone();
        let alert_handler = tokio::spawn(async move {
            while let Some(alert) = alert_rx.recv().await {
                this.handle_alert(&alert).await;
            }
        });

        vec![bar_handler, alert_handler]
    }
}

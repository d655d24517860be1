// src/main.rs

//! # 主程序 (main)
//!
//! 组装总线和演示组件，运行一段时间后优雅关闭。

mod demo;

use demo::data::SimulatedDataEngine;
use demo::execution::SimulatedExecutionEngine;
use demo::risk::RiskMonitor;
use demo::strategy::SimpleTrendFollower;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use trading_bus::actor::Actor;
use trading_bus::logging::init_logging;
use trading_bus::persistence::TimeRange;
use trading_bus::{handler_fn, BusConfig, HandlerResult, MessageBus, MessageKind};

#[tokio::main]
async fn main() {
    // --- 1. 初始化 ---
    let config = match BusConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log);
    info!(target: "MAIN", ?config, "Configuration loaded");

    let started_at = Utc::now();
    let bus = MessageBus::new(config);
    let symbol = "BTC-USD".to_string();

    // 一个只打日志的监控订阅者，看状态更新和绩效指标
    let monitor = handler_fn(|msg| async move {
        info!(target: "MONITOR", "{} from {}: {:?}", msg.kind(), msg.sender(), msg.payload());
        HandlerResult::Ok(())
    });
    for kind in [MessageKind::StrategyUpdate, MessageKind::PerformanceMetric] {
        if let Err(e) = bus.subscribe("monitor", kind, monitor.clone()).await {
            error!(target: "MAIN", "Failed to subscribe monitor: {}", e);
        }
    }

    // --- 2. 组装 Actors ---
    let actors: Vec<Arc<dyn Actor>> = vec![
        Arc::new(SimpleTrendFollower::new(bus.clone(), symbol.clone(), 102.0)),
        Arc::new(SimulatedExecutionEngine::new(bus.clone())),
        Arc::new(RiskMonitor::new(bus.clone(), 500.0)),
        Arc::new(SimulatedDataEngine::new(bus.clone(), symbol.clone(), Duration::from_millis(500))),
    ];

    info!(target: "MAIN", "System starting up...");
    bus.start().await;

    // --- 3. 启动 Actors ---
    let mut handles = Vec::new();
    for actor in actors {
        info!(target: "MAIN", "Starting {}", actor.name());
        handles.extend(actor.start().await);
    }

    info!(target: "MAIN", "All actors started. Running for 5 seconds...");
    tokio::time::sleep(Duration::from_secs(5)).await;

    // --- 4. 优雅关闭 ---
    info!(target: "MAIN", "Shutting down...");
    bus.shutdown().await;
    for handle in &handles {
        handle.abort();
    }
    let _ = join_all(handles).await;

    match bus
        .history(MessageKind::RiskAlert, TimeRange::since(started_at), None)
        .await
    {
        Ok(alerts) => info!(target: "MAIN", "{} risk alerts recorded", alerts.len()),
        Err(e) => error!(target: "MAIN", "History query failed: {}", e),
    }
    info!(target: "MAIN", stats = ?bus.stats(), "System shut down gracefully.");
}

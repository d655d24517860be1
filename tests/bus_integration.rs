// tests/bus_integration.rs

//! 总线的端到端行为：排序、路由、故障隔离、背压和故障驱逐。

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use chrono::{Duration as ChronoDuration, Utc};
use trading_bus::error::HandlerResult;
use trading_bus::persistence::{PersistenceAdapter, TimeRange};
use trading_bus::stats::StatsSnapshot;
use trading_bus::{channel_subscriber, handler_fn, BusConfig, BusError, Message, MessageBus, MessageKind};

fn config() -> BusConfig {
    BusConfig {
        queue_capacity: 16,
        fault_threshold: 3,
        delivery_timeout_ms: 200,
        subscriber_buffer: 16,
        history_capacity: 64,
        ..BusConfig::default()
    }
}

async fn recv(rx: &mut mpsc::Receiver<Arc<Message>>) -> Arc<Message> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no delivery within 2s")
        .expect("channel closed")
}

async fn recv_tag(rx: &mut mpsc::Receiver<Arc<Message>>) -> String {
    let msg = recv(rx).await;
    tag(&*msg)
}

fn tag(msg: &Message) -> String {
    msg.payload()["tag"].as_str().unwrap().to_string()
}

fn tagged(kind: MessageKind, priority: u8, tag: &str) -> Message {
    Message::builder(kind, "producer")
        .priority(priority)
        .insert("tag", tag)
        .build()
}

/// 轮询统计计数，直到 `check` 成立或超过两秒。
async fn wait_for_stats(bus: &MessageBus, check: impl Fn(&StatsSnapshot) -> bool) -> bool {
    for _ in 0..200 {
        if check(&bus.stats()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_for_empty_queue(bus: &MessageBus) -> bool {
    for _ in 0..200 {
        if bus.pending().await == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn risk_alert_scenario() {
    let bus = MessageBus::new(config());
    let (risk, mut risk_rx) = channel_subscriber(8);
    let (feed, mut feed_rx) = channel_subscriber(8);
    bus.subscribe("risk", MessageKind::RiskAlert, risk).await.unwrap();
    bus.subscribe("strategy", MessageKind::MarketData, feed).await.unwrap();
    bus.start().await;

    let alert = Message::builder(MessageKind::RiskAlert, "exec")
        .priority(5)
        .insert("symbol", "BTC")
        .insert("drawdown", 0.12)
        .build();
    let published = bus.publish(alert.clone()).await.unwrap();

    let received = recv(&mut risk_rx).await;
    assert!(Arc::ptr_eq(&published, &received));
    assert_eq!(*received, alert);
    assert_eq!(received.payload()["symbol"], json!("BTC"));
    assert_eq!(received.payload()["drawdown"], json!(0.12));

    assert!(feed_rx.try_recv().is_err());
    bus.shutdown().await;
}

#[tokio::test]
async fn every_priority_is_delivered_exactly_once() {
    let bus = MessageBus::new(config());
    let (a, mut a_rx) = channel_subscriber(16);
    let (b, mut b_rx) = channel_subscriber(16);
    bus.subscribe("a", MessageKind::TradingSignal, a).await.unwrap();
    bus.subscribe("b", MessageKind::TradingSignal, b).await.unwrap();
    bus.start().await;

    for p in 1..=5u8 {
        bus.publish(tagged(MessageKind::TradingSignal, p, &p.to_string())).await.unwrap();
        assert_eq!(recv_tag(&mut a_rx).await, p.to_string());
        assert_eq!(recv_tag(&mut b_rx).await, p.to_string());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a_rx.try_recv().is_err());
    assert!(b_rx.try_recv().is_err());
    bus.shutdown().await;
}

#[tokio::test]
async fn higher_priority_is_delivered_first() {
    let bus = MessageBus::new(config());
    let (sub, mut rx) = channel_subscriber(8);
    bus.subscribe("exec", MessageKind::OrderExecution, sub).await.unwrap();

    // 先入队再启动，确保两条消息同时在队列里
    bus.publish(tagged(MessageKind::OrderExecution, 1, "m1")).await.unwrap();
    bus.publish(tagged(MessageKind::OrderExecution, 5, "m2")).await.unwrap();
    bus.start().await;

    assert_eq!(recv_tag(&mut rx).await, "m2");
    assert_eq!(recv_tag(&mut rx).await, "m1");
    bus.shutdown().await;
}

#[tokio::test]
async fn fifo_within_a_priority() {
    let bus = MessageBus::new(config());
    let (sub, mut rx) = channel_subscriber(8);
    bus.subscribe("strategy", MessageKind::StrategyUpdate, sub).await.unwrap();

    for t in ["first", "second", "third"] {
        bus.publish(tagged(MessageKind::StrategyUpdate, 3, t)).await.unwrap();
    }
    bus.start().await;

    assert_eq!(recv_tag(&mut rx).await, "first");
    assert_eq!(recv_tag(&mut rx).await, "second");
    assert_eq!(recv_tag(&mut rx).await, "third");
    bus.shutdown().await;
}

#[tokio::test]
async fn directed_message_skips_other_subscribers() {
    let bus = MessageBus::new(config());
    let (a, mut a_rx) = channel_subscriber(8);
    let (b, mut b_rx) = channel_subscriber(8);
    bus.subscribe("a", MessageKind::TradingSignal, a).await.unwrap();
    bus.subscribe("b", MessageKind::TradingSignal, b).await.unwrap();
    bus.start().await;

    let directed = Message::builder(MessageKind::TradingSignal, "strategy")
        .recipient("b")
        .insert("tag", "directed")
        .build();
    bus.publish(directed).await.unwrap();
    bus.publish(tagged(MessageKind::TradingSignal, 1, "broadcast")).await.unwrap();

    assert_eq!(recv_tag(&mut b_rx).await, "directed");
    assert_eq!(recv_tag(&mut b_rx).await, "broadcast");
    // a 收到的第一条就是广播，说明定向消息没有发给它
    assert_eq!(recv_tag(&mut a_rx).await, "broadcast");
    bus.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_twice_is_harmless() {
    let bus = MessageBus::new(config());
    let (sub, mut rx) = channel_subscriber(8);
    bus.subscribe("risk", MessageKind::RiskAlert, sub).await.unwrap();
    bus.start().await;

    assert!(bus.unsubscribe("risk", MessageKind::RiskAlert).await);
    assert!(!bus.unsubscribe("risk", MessageKind::RiskAlert).await);
    assert_eq!(bus.unsubscribe_all("nobody").await, 0);

    bus.publish(tagged(MessageKind::RiskAlert, 5, "late")).await.unwrap();
    assert!(wait_for_stats(&bus, |s| s.undelivered == 1).await);
    // 注销后收件箱被关闭，接收端读到结束
    assert!(recv_or_closed(&mut rx).await.is_none());
    bus.shutdown().await;
}

async fn recv_or_closed(rx: &mut mpsc::Receiver<Arc<Message>>) -> Option<Arc<Message>> {
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap_or(None)
}

#[tokio::test]
async fn failing_subscriber_does_not_block_healthy_one() {
    let bus = MessageBus::new(BusConfig {
        fault_threshold: 100,
        ..config()
    });
    let failing = handler_fn(|_msg| async {
        let result: HandlerResult = Err("always fails".into());
        result
    });
    let (healthy, mut healthy_rx) = channel_subscriber(8);
    bus.subscribe("broken", MessageKind::MarketData, failing).await.unwrap();
    bus.subscribe("healthy", MessageKind::MarketData, healthy).await.unwrap();
    bus.start().await;

    for t in ["one", "two"] {
        bus.publish(tagged(MessageKind::MarketData, 1, t)).await.unwrap();
    }
    assert_eq!(recv_tag(&mut healthy_rx).await, "one");
    assert_eq!(recv_tag(&mut healthy_rx).await, "two");
    assert!(wait_for_stats(&bus, |s| s.faults == 2).await);
    assert!(bus.registry().contains("broken", MessageKind::MarketData).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn slow_subscriber_times_out_without_stalling_others() {
    let bus = MessageBus::new(BusConfig {
        delivery_timeout_ms: 50,
        ..config()
    });
    let slow = handler_fn(|_msg| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        HandlerResult::Ok(())
    });
    let (fast, mut fast_rx) = channel_subscriber(8);
    bus.subscribe("slow", MessageKind::PerformanceMetric, slow).await.unwrap();
    bus.subscribe("fast", MessageKind::PerformanceMetric, fast).await.unwrap();
    bus.start().await;

    bus.publish(tagged(MessageKind::PerformanceMetric, 2, "pnl")).await.unwrap();
    assert_eq!(recv_tag(&mut fast_rx).await, "pnl");
    assert!(wait_for_stats(&bus, |s| s.faults == 1).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn repeated_faults_evict_the_subscriber() {
    let bus = MessageBus::new(BusConfig {
        fault_threshold: 2,
        ..config()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let crashing = handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let result: HandlerResult = Err("crashed".into());
            result
        }
    });
    bus.subscribe("crashy", MessageKind::MarketData, crashing.clone()).await.unwrap();
    bus.subscribe("crashy", MessageKind::RiskAlert, crashing).await.unwrap();
    bus.start().await;

    bus.publish(tagged(MessageKind::MarketData, 1, "a")).await.unwrap();
    bus.publish(tagged(MessageKind::MarketData, 1, "b")).await.unwrap();

    assert!(wait_for_stats(&bus, |s| s.evictions == 1).await);
    assert!(bus.registry().subscriptions_of("crashy").await.is_empty());

    bus.publish(tagged(MessageKind::MarketData, 1, "c")).await.unwrap();
    assert!(wait_for_stats(&bus, |s| s.undelivered == 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    bus.shutdown().await;
}

#[tokio::test]
async fn resubscribe_after_eviction_ignores_old_inbox_faults() {
    let bus = MessageBus::new(BusConfig {
        fault_threshold: 2,
        ..config()
    });
    let sluggish = handler_fn(|_msg| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result: HandlerResult = Err("stale quote".into());
        result
    });
    bus.subscribe("quotes", MessageKind::MarketData, sluggish).await.unwrap();
    bus.start().await;

    for t in ["a", "b", "c", "d"] {
        bus.publish(tagged(MessageKind::MarketData, 1, t)).await.unwrap();
    }
    assert!(wait_for_stats(&bus, |s| s.evictions == 1).await);

    // 旧收件箱里还剩两条消息，它们的失败不能算到新注册头上。
    let (healthy, mut healthy_rx) = channel_subscriber(8);
    let handle = bus.subscribe("quotes", MessageKind::MarketData, healthy).await.unwrap();
    assert!(wait_for_stats(&bus, |s| s.faults == 4).await);

    bus.publish(tagged(MessageKind::MarketData, 1, "fresh")).await.unwrap();
    assert_eq!(recv_tag(&mut healthy_rx).await, "fresh");
    assert!(bus.registry().is_current(&handle).await);
    assert_eq!(bus.stats().evictions, 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn success_resets_the_fault_count() {
    let bus = MessageBus::new(BusConfig {
        fault_threshold: 2,
        ..config()
    });
    let flaky = handler_fn(|msg| async move {
        let result: HandlerResult = if msg.payload()["tag"] == json!("bad") {
            Err("bad input".into())
        } else {
            Ok(())
        };
        result
    });
    bus.subscribe("flaky", MessageKind::StrategyUpdate, flaky).await.unwrap();
    bus.start().await;

    for t in ["bad", "good", "bad", "good"] {
        bus.publish(tagged(MessageKind::StrategyUpdate, 1, t)).await.unwrap();
    }
    assert!(wait_for_stats(&bus, |s| s.delivered == 2).await);
    assert_eq!(bus.stats().faults, 2);
    assert_eq!(bus.stats().evictions, 0);
    assert!(bus.registry().contains("flaky", MessageKind::StrategyUpdate).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn queue_full_rejects_and_recovers() {
    let bus = MessageBus::new(BusConfig {
        queue_capacity: 2,
        ..config()
    });
    let (sub, mut rx) = channel_subscriber(8);
    bus.subscribe("feed", MessageKind::MarketData, sub).await.unwrap();

    bus.publish(tagged(MessageKind::MarketData, 1, "a")).await.unwrap();
    bus.publish(tagged(MessageKind::MarketData, 1, "b")).await.unwrap();
    let err = bus
        .publish(tagged(MessageKind::MarketData, 1, "c"))
        .await
        .unwrap_err();
    assert_eq!(err, BusError::QueueFull { capacity: 2 });
    assert_eq!(bus.pending().await, 2);

    bus.start().await;
    assert_eq!(recv_tag(&mut rx).await, "a");
    assert_eq!(recv_tag(&mut rx).await, "b");
    assert!(wait_for_empty_queue(&bus).await);

    bus.publish(tagged(MessageKind::MarketData, 1, "d")).await.unwrap();
    assert_eq!(recv_tag(&mut rx).await, "d");
    assert_eq!(bus.stats().rejected, 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn invalid_priority_is_rejected() {
    let bus = MessageBus::new(config());
    for p in [0u8, 6] {
        let err = bus
            .publish(tagged(MessageKind::TradingSignal, p, "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidMessage(_)));
    }
    assert_eq!(bus.pending().await, 0);
}

#[tokio::test]
async fn resubscribe_replaces_handler() {
    let bus = MessageBus::new(config());
    let (old, mut old_rx) = channel_subscriber(8);
    let (new, mut new_rx) = channel_subscriber(8);
    bus.subscribe("strategy", MessageKind::MarketData, old).await.unwrap();
    bus.subscribe("strategy", MessageKind::MarketData, new).await.unwrap();
    assert_eq!(bus.registry().len().await, 1);
    bus.start().await;

    bus.publish(tagged(MessageKind::MarketData, 1, "tick")).await.unwrap();
    assert_eq!(recv_tag(&mut new_rx).await, "tick");
    assert!(recv_or_closed(&mut old_rx).await.is_none());
    bus.shutdown().await;
}

#[tokio::test]
async fn history_is_recorded_for_late_joiners() {
    let bus = MessageBus::new(config());
    let since = Utc::now() - ChronoDuration::seconds(1);
    bus.start().await;

    let to_risk = Message::builder(MessageKind::RiskAlert, "exec")
        .recipient("risk")
        .insert("tag", "directed")
        .build();
    bus.publish(to_risk).await.unwrap();
    bus.publish(tagged(MessageKind::RiskAlert, 5, "broadcast")).await.unwrap();
    bus.publish(tagged(MessageKind::MarketData, 1, "tick")).await.unwrap();

    // 持久化在分发之后异步写入
    assert!(wait_for_stats(&bus, |s| s.dispatched == 3).await);
    let mut recorded = Vec::new();
    for _ in 0..200 {
        recorded = bus
            .history(MessageKind::RiskAlert, TimeRange::since(since), None)
            .await
            .unwrap();
        if recorded.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(recorded.len(), 2);

    let range = TimeRange::since(since);

    let for_audit = bus
        .history(MessageKind::RiskAlert, range, Some("audit"))
        .await
        .unwrap();
    assert_eq!(for_audit.iter().map(tag).collect::<Vec<_>>(), vec!["broadcast"]);
    bus.shutdown().await;
}

struct BrokenStore;

#[async_trait::async_trait]
impl PersistenceAdapter for BrokenStore {
    async fn append(&self, _message: &Message) -> trading_bus::Result<()> {
        Err(BusError::Persistence("disk on fire".into()))
    }

    async fn query(
        &self,
        _kind: MessageKind,
        _range: TimeRange,
        _recipient: Option<&str>,
    ) -> trading_bus::Result<Vec<Message>> {
        Err(BusError::Persistence("disk on fire".into()))
    }
}

#[tokio::test]
async fn persistence_failure_does_not_affect_delivery() {
    let bus = MessageBus::with_persistence(config(), Arc::new(BrokenStore));
    let (sub, mut rx) = channel_subscriber(8);
    bus.subscribe("risk", MessageKind::RiskAlert, sub).await.unwrap();
    bus.start().await;

    bus.publish(tagged(MessageKind::RiskAlert, 5, "alert")).await.unwrap();
    assert_eq!(recv_tag(&mut rx).await, "alert");
    assert!(bus
        .history(MessageKind::RiskAlert, TimeRange::since(Utc::now()), None)
        .await
        .is_err());
    bus.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_bus() {
    let bus = MessageBus::new(config());
    bus.start().await;
    bus.shutdown().await;

    assert_eq!(
        bus.publish(tagged(MessageKind::MarketData, 1, "x")).await.unwrap_err(),
        BusError::Closed
    );
    let (sub, _rx) = channel_subscriber(1);
    assert!(matches!(
        bus.subscribe("late", MessageKind::MarketData, sub).await,
        Err(BusError::Closed)
    ));
}

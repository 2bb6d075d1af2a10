// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end coordination scenarios
//!
//! Exercises the bus, workflow engine and cache through the public API only:
//! 1. Fan-out publish to two subscribers
//! 2. Requests to an agent with no subscriber fail fast
//! 3. A workflow pauses at its gate and completes on approval
//! 4. LRU eviction honours read recency

use concord_core::config::BusConfig;
use concord_core::infrastructure::cache::BoundedCache;
use concord_core::infrastructure::message_bus::{direct_topic, handler_fn, MessageBus, MessageHandler};
use concord_core::message::{content, Content, Message, MessagePriority};
use concord_core::agent::AgentId;
use concord_core::application::workflow_engine::WorkflowEngine;
use concord_core::workflow::{stage_fn, InstanceStatus, WorkflowDefinition};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn recorder() -> (Arc<Mutex<Vec<Arc<Message>>>>, Arc<dyn MessageHandler>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(move |message: Arc<Message>| {
        let sink = sink.clone();
        async move {
            sink.lock().push(message);
            Ok(())
        }
    });
    (seen, handler)
}

#[tokio::test]
async fn test_two_subscribers_receive_identical_message() {
    let bus = MessageBus::started(BusConfig::default());
    let (a1, h1) = recorder();
    let (a2, h2) = recorder();
    bus.subscribe("A1", "t", h1, None).unwrap();
    bus.subscribe("A2", "t", h2, None).unwrap();

    let message = Message::event("origin", content(json!({"x": 1}))).with_priority(MessagePriority::High);
    let delivered = bus.publish("t", message).unwrap();
    bus.wait_idle().await;

    assert_eq!(delivered, 2);
    let a1 = a1.lock();
    let a2 = a2.lock();
    assert_eq!(a1.len(), 1);
    assert_eq!(a2.len(), 1);
    assert_eq!(a1[0].content(), &content(json!({"x": 1})));
    assert_eq!(a1[0].id(), a2[0].id());
    assert_eq!(a1[0].timestamp(), a2[0].timestamp());
    assert_eq!(a1[0].source(), a2[0].source());
    assert_eq!(a2[0].priority(), MessagePriority::High);
    assert_eq!(bus.get_history(Some("t"), None).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_all_stops_future_delivery() {
    let bus = MessageBus::started(BusConfig::default());
    let (gone, gone_handler) = recorder();
    let (kept, kept_handler) = recorder();
    bus.subscribe("leaver", "news", gone_handler.clone(), None).unwrap();
    bus.subscribe("leaver", "sports", gone_handler, None).unwrap();
    bus.subscribe("stayer", "news", kept_handler, None).unwrap();

    assert_eq!(bus.unsubscribe_all(&AgentId::new("leaver")).unwrap(), 2);
    assert_eq!(bus.publish("news", Message::event("desk", Content::new())).unwrap(), 1);
    assert_eq!(bus.publish("sports", Message::event("desk", Content::new())).unwrap(), 0);
    bus.wait_idle().await;

    assert!(gone.lock().is_empty());
    assert_eq!(kept.lock().len(), 1);
}

#[tokio::test]
async fn test_request_to_ghost_fails_without_waiting() {
    let bus = MessageBus::started(BusConfig::default());
    let started = Instant::now();
    let response = bus
        .request_response(
            &AgentId::new("ghost"),
            Message::command("asker", Content::new()),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(!response.success);
    assert!(!response.timed_out);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_silent_responder_times_out_on_deadline() {
    let bus = MessageBus::started(BusConfig::default());
    let silent = AgentId::new("silent");
    let (_, handler) = recorder();
    bus.subscribe(silent.clone(), direct_topic(&silent), handler, None).unwrap();

    let started = Instant::now();
    let response = bus
        .request_response(&silent, Message::command("asker", Content::new()), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(response.timed_out);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));
    assert_eq!(bus.get_stats().pending_requests, 0);
}

#[tokio::test]
async fn test_workflow_pauses_then_completes_on_approval() {
    let bus = MessageBus::started(BusConfig::default());
    let engine = WorkflowEngine::new("engine", bus);
    let definition = WorkflowDefinition::builder("w1", "Single gate")
        .stage(stage_fn("prepare", |ctx| {
            ctx.set("prepared", json!(true));
            Ok(())
        }))
        .build()
        .unwrap();
    engine.register_workflow(definition).await.unwrap();

    let instance = engine.start_instance(&"w1".into(), Content::new()).await.unwrap();
    assert_eq!(instance.status(), InstanceStatus::Paused);

    assert!(engine.approve(instance.id, None).await.unwrap());
    let completed = engine.get_instance(instance.id).await.unwrap();
    assert_eq!(completed.status(), InstanceStatus::Completed);
    assert_eq!(completed.context.get_str("outcome"), Some("completed"));

    assert!(!engine.approve(instance.id, None).await.unwrap());
    assert!(!engine.reject(instance.id, None).await.unwrap());
    assert_eq!(engine.get_instance(instance.id).await.unwrap(), completed);

    let stats = engine.get_statistics(None).await;
    assert_eq!((stats.total, stats.paused, stats.completed), (1, 0, 1));
}

#[test]
fn test_cache_evicts_least_recently_read() {
    let cache: BoundedCache<&str, u32> = BoundedCache::new(3);
    cache.set("k1", 1, None);
    cache.set("k2", 2, None);
    cache.set("k3", 3, None);
    assert_eq!(cache.get(&"k1"), Some(1));
    cache.set("k4", 4, None);

    assert!(!cache.contains(&"k2"));
    for key in ["k1", "k3", "k4"] {
        assert!(cache.contains(&key), "{key} should remain");
    }
    assert_eq!(cache.stats().size, 3);
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Message Bus Implementation - Pub/Sub, Direct Addressing and Request/Response
//
// Agents never call each other directly; everything goes through this bus.
//
// Delivery model:
// - Every subscription owns an unbounded FIFO queue served by its own task,
//   so `publish` only takes a snapshot of matching subscribers and enqueues.
// - Dispatch is serialised under the history lock: for a fixed topic and a
//   fixed subscriber, messages arrive in publish order.
// - Handler errors and panics are captured per invocation and recorded as
//   `HandlerFailure`s; they never reach the publisher.
//
// In-memory only (bus state is lost on restart).

use crate::domain::agent::AgentId;
use crate::domain::config::BusConfig;
use crate::domain::message::{Content, CorrelationId, Message, MessageId, MessageType, Response};
use crate::infrastructure::delivery::{InFlightGuard, InFlightTracker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of the reserved per-agent direct channel.
pub const DIRECT_TOPIC_PREFIX: &str = "direct.";

pub fn direct_topic(agent_id: &AgentId) -> String {
    format!("{}{}", DIRECT_TOPIC_PREFIX, agent_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscriber callback
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(func))
}

/// Predicate deciding whether a subscription receives a message
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Errors returned by bus operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("Message bus is not running")]
    NotRunning,
}

/// A handler invocation that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub subscription_id: SubscriptionId,
    pub agent_id: AgentId,
    pub message_id: MessageId,
    pub topic: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Per-message outcome aggregated by [`MessageBus::publish_and_wait`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub delivered: usize,
    pub succeeded: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DeliveryReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberInfo {
    pub subscription_id: SubscriptionId,
    pub agent_id: AgentId,
    pub topic: String,
    pub filtered: bool,
}

/// Snapshot of bus counters and table sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub direct_sent: u64,
    pub requests: u64,
    pub responses: u64,
    pub timeouts: u64,
    pub active_subscriptions: usize,
    pub topic_count: usize,
    pub pending_requests: usize,
    pub history_len: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    published: u64,
    delivered: u64,
    handler_failures: u64,
    direct_sent: u64,
    requests: u64,
    responses: u64,
    timeouts: u64,
}

/// Counters and failure log shared with subscription workers.
struct DeliveryLedger {
    counters: Mutex<Counters>,
    failures: Mutex<VecDeque<HandlerFailure>>,
    max_failures: usize,
}

impl DeliveryLedger {
    fn record_failure(&self, failure: HandlerFailure) {
        warn!(
            subscription_id = %failure.subscription_id,
            agent_id = %failure.agent_id,
            message_id = %failure.message_id,
            topic = %failure.topic,
            error = %failure.error,
            "Message handler failed"
        );
        metrics::counter!("concord_bus_handler_failures_total").increment(1);
        self.counters.lock().handler_failures += 1;
        let mut failures = self.failures.lock();
        if failures.len() >= self.max_failures {
            failures.pop_front();
        }
        failures.push_back(failure);
    }
}

struct Delivery {
    message: Arc<Message>,
    report: Option<oneshot::Sender<Result<(), String>>>,
    _guard: InFlightGuard,
}

struct Subscription {
    id: SubscriptionId,
    agent_id: AgentId,
    filter: Option<MessageFilter>,
    queue: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct SubscriptionTable {
    by_topic: HashMap<String, Vec<Subscription>>,
    topic_of: HashMap<SubscriptionId, String>,
}

impl SubscriptionTable {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let topic = self.topic_of.remove(&id)?;
        let subscriptions = self.by_topic.get_mut(&topic)?;
        let index = subscriptions.iter().position(|s| s.id == id)?;
        let removed = subscriptions.remove(index);
        if subscriptions.is_empty() {
            self.by_topic.remove(&topic);
        }
        Some(removed)
    }

    fn has_subscribers(&self, topic: &str) -> bool {
        self.by_topic.get(topic).is_some_and(|subs| !subs.is_empty())
    }
}

struct BusInner {
    config: BusConfig,
    running: AtomicBool,
    subscriptions: RwLock<SubscriptionTable>,
    pending: DashMap<CorrelationId, oneshot::Sender<Result<Content, String>>>,
    history: Mutex<VecDeque<Arc<Message>>>,
    ledger: Arc<DeliveryLedger>,
    in_flight: Arc<InFlightTracker>,
}

/// Asynchronous message bus with publish/subscribe, direct addressing and
/// request/response semantics.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a stopped bus; call [`MessageBus::start`] before use.
    pub fn new(config: BusConfig) -> Self {
        let max_failures = config.max_history.max(1);
        Self {
            inner: Arc::new(BusInner {
                config,
                running: AtomicBool::new(false),
                subscriptions: RwLock::new(SubscriptionTable::default()),
                pending: DashMap::new(),
                history: Mutex::new(VecDeque::new()),
                ledger: Arc::new(DeliveryLedger {
                    counters: Mutex::new(Counters::default()),
                    failures: Mutex::new(VecDeque::new()),
                    max_failures,
                }),
                in_flight: InFlightTracker::new(),
            }),
        }
    }

    /// Create and start a bus in one step
    pub fn started(config: BusConfig) -> Self {
        let bus = Self::new(config);
        bus.start();
        bus
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            info!(max_history = self.inner.config.max_history, "Message bus started");
        }
    }

    /// Stop the bus: every subscription is dropped (queued deliveries still
    /// drain) and every pending request fails.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut table = self.inner.subscriptions.write();
            let count = table.topic_of.len();
            *table = SubscriptionTable::default();
            count
        };
        let pending = self.inner.pending.len();
        self.inner.pending.clear();
        info!(
            dropped_subscriptions = dropped,
            failed_requests = pending,
            "Message bus stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BusError::NotRunning)
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Register `handler` for `topic` on behalf of `agent_id`.
    pub fn subscribe(
        &self,
        agent_id: impl Into<AgentId>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        filter: Option<MessageFilter>,
    ) -> Result<SubscriptionId, BusError> {
        self.ensure_running()?;
        let agent_id = agent_id.into();
        let topic = topic.into();
        let id = SubscriptionId::new();
        let (queue, receiver) = mpsc::unbounded_channel();

        spawn_worker(
            id,
            agent_id.clone(),
            topic.clone(),
            handler,
            receiver,
            self.inner.ledger.clone(),
        );

        let mut table = self.inner.subscriptions.write();
        table.topic_of.insert(id, topic.clone());
        table.by_topic.entry(topic.clone()).or_default().push(Subscription {
            id,
            agent_id: agent_id.clone(),
            filter,
            queue,
        });

        debug!(subscription_id = %id, agent_id = %agent_id, topic = %topic, "Subscribed");
        Ok(id)
    }

    /// Remove exactly one subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<bool, BusError> {
        self.ensure_running()?;
        let removed = self.inner.subscriptions.write().remove(subscription_id);
        if let Some(subscription) = &removed {
            debug!(subscription_id = %subscription_id, agent_id = %subscription.agent_id, "Unsubscribed");
        }
        Ok(removed.is_some())
    }

    /// Remove every subscription held by `agent_id`, returning how many were removed.
    pub fn unsubscribe_all(&self, agent_id: &AgentId) -> Result<usize, BusError> {
        self.ensure_running()?;
        let mut table = self.inner.subscriptions.write();
        let owned: Vec<SubscriptionId> = table
            .by_topic
            .values()
            .flatten()
            .filter(|s| &s.agent_id == agent_id)
            .map(|s| s.id)
            .collect();
        for id in &owned {
            table.remove(*id);
        }
        debug!(agent_id = %agent_id, removed = owned.len(), "Unsubscribed agent");
        Ok(owned.len())
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish `message` on `topic`, returning the number of matched subscribers.
    ///
    /// Returns once every matching handler invocation is scheduled; handlers
    /// may still be running afterwards.
    pub fn publish(&self, topic: &str, message: Message) -> Result<usize, BusError> {
        self.ensure_running()?;
        let (delivered, _) = self.dispatch(Arc::new(message.routed_to(topic)), false);
        Ok(delivered)
    }

    /// Publish and await every matched handler, aggregating their outcomes.
    pub async fn publish_and_wait(&self, topic: &str, message: Message) -> Result<DeliveryReport, BusError> {
        self.ensure_running()?;
        let message = Arc::new(message.routed_to(topic));
        let message_id = message.id();
        let (delivered, receivers) = self.dispatch(message, true);

        let outcomes = futures::future::join_all(receivers.into_iter().map(
            |(subscription_id, agent_id, receiver)| async move {
                let result = receiver
                    .await
                    .unwrap_or_else(|_| Err("delivery dropped before completion".to_string()));
                (subscription_id, agent_id, result)
            },
        ))
        .await;

        let mut failures = Vec::new();
        for (subscription_id, agent_id, result) in outcomes {
            if let Err(error) = result {
                failures.push(HandlerFailure {
                    subscription_id,
                    agent_id,
                    message_id,
                    topic: topic.to_string(),
                    error,
                    failed_at: Utc::now(),
                });
            }
        }

        Ok(DeliveryReport {
            message_id,
            delivered,
            succeeded: delivered - failures.len(),
            failures,
        })
    }

    /// Deliver on the target's direct channel. Returns `false` without
    /// enqueueing when the target has no direct subscription.
    pub fn send_direct(&self, target: &AgentId, message: Message) -> Result<bool, BusError> {
        self.ensure_running()?;
        let topic = direct_topic(target);
        if !self.inner.subscriptions.read().has_subscribers(&topic) {
            debug!(target = %target, "Direct send skipped: no direct subscriber");
            return Ok(false);
        }
        let message = message.addressed_to(MessageType::Direct, target).routed_to(&topic);
        let (delivered, _) = self.dispatch(Arc::new(message), false);
        self.inner.ledger.counters.lock().direct_sent += 1;
        Ok(delivered > 0)
    }

    /// Send a correlated request to `target` and suspend until a matching
    /// `send_response` arrives or `timeout` (bus default when `None`) elapses.
    pub async fn request_response(
        &self,
        target: &AgentId,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<Response, BusError> {
        self.ensure_running()?;
        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_request_timeout());
        let correlation_id = CorrelationId::new();
        let topic = direct_topic(target);

        if !self.inner.subscriptions.read().has_subscribers(&topic) {
            debug!(target = %target, "Request failed fast: no subscriber");
            return Ok(Response::failure(
                correlation_id,
                format!("no subscriber for agent '{}'", target),
            ));
        }

        let (sender, receiver) = oneshot::channel();
        self.inner.pending.insert(correlation_id, sender);
        self.inner.ledger.counters.lock().requests += 1;

        let message = message
            .addressed_to(MessageType::Request, target)
            .correlated(correlation_id)
            .routed_to(&topic);
        let (delivered, _) = self.dispatch(Arc::new(message), false);
        if delivered == 0 {
            self.inner.pending.remove(&correlation_id);
            return Ok(Response::failure(
                correlation_id,
                format!("no subscriber for agent '{}'", target),
            ));
        }

        debug!(correlation_id = %correlation_id, target = %target, "Request sent, awaiting response");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(payload))) => Ok(Response::success(correlation_id, payload)),
            Ok(Ok(Err(error))) => Ok(Response::rejected(correlation_id, error)),
            Ok(Err(_)) => Ok(Response::failure(
                correlation_id,
                "request abandoned before a response arrived",
            )),
            Err(_) => {
                self.inner.pending.remove(&correlation_id);
                self.inner.ledger.counters.lock().timeouts += 1;
                metrics::counter!("concord_bus_request_timeouts_total").increment(1);
                warn!(
                    correlation_id = %correlation_id,
                    target = %target,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Ok(Response::timeout(correlation_id, timeout))
            }
        }
    }

    /// Resolve a pending request. Returns `false` when the correlation id is
    /// unknown, already resolved, or timed out.
    pub fn send_response(&self, correlation_id: CorrelationId, payload: Content) -> Result<bool, BusError> {
        self.resolve_pending(correlation_id, Ok(payload))
    }

    /// Resolve a pending request as failed; the requester receives a failure
    /// [`Response`] carrying `error`. Same return contract as `send_response`.
    pub fn send_failure(&self, correlation_id: CorrelationId, error: impl Into<String>) -> Result<bool, BusError> {
        self.resolve_pending(correlation_id, Err(error.into()))
    }

    fn resolve_pending(&self, correlation_id: CorrelationId, outcome: Result<Content, String>) -> Result<bool, BusError> {
        self.ensure_running()?;
        match self.inner.pending.remove(&correlation_id) {
            Some((_, sender)) => {
                let accepted = sender.send(outcome).is_ok();
                if accepted {
                    self.inner.ledger.counters.lock().responses += 1;
                }
                Ok(accepted)
            }
            None => {
                debug!(correlation_id = %correlation_id, "Late or unknown response ignored");
                Ok(false)
            }
        }
    }

    /// Snapshot matching subscribers and enqueue one delivery per subscriber.
    fn dispatch(
        &self,
        message: Arc<Message>,
        with_reports: bool,
    ) -> (usize, Vec<(SubscriptionId, AgentId, oneshot::Receiver<Result<(), String>>)>) {
        let topic = message.topic().to_string();
        let mut receivers = Vec::new();
        let mut delivered = 0usize;

        // The history lock orders concurrent publishers.
        let mut history = self.inner.history.lock();
        {
            let table = self.inner.subscriptions.read();
            for subscription in table.by_topic.get(&topic).into_iter().flatten() {
                if !passes_filter(subscription, &message) {
                    continue;
                }
                let (report, receiver) = if with_reports {
                    let (tx, rx) = oneshot::channel();
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };
                let delivery = Delivery {
                    message: message.clone(),
                    report,
                    _guard: self.inner.in_flight.begin(),
                };
                if subscription.queue.send(delivery).is_ok() {
                    delivered += 1;
                    if let Some(receiver) = receiver {
                        receivers.push((subscription.id, subscription.agent_id.clone(), receiver));
                    }
                }
            }
        }

        if history.len() >= self.inner.config.max_history {
            history.pop_front();
        }
        history.push_back(message.clone());
        drop(history);

        {
            let mut counters = self.inner.ledger.counters.lock();
            counters.published += 1;
            counters.delivered += delivered as u64;
        }
        metrics::counter!("concord_bus_messages_published_total").increment(1);
        metrics::counter!("concord_bus_messages_delivered_total").increment(delivered as u64);

        debug!(
            message_id = %message.id(),
            topic = %topic,
            source = %message.source(),
            delivered = delivered,
            "Message published"
        );

        (delivered, receivers)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Most recent messages (oldest first), optionally restricted to a topic.
    pub fn get_history(&self, topic: Option<&str>, limit: Option<usize>) -> Vec<Arc<Message>> {
        let history = self.inner.history.lock();
        let matching: Vec<Arc<Message>> = history
            .iter()
            .filter(|m| topic.map_or(true, |t| m.topic() == t))
            .cloned()
            .collect();
        drop(history);
        match limit {
            Some(limit) if limit < matching.len() => matching[matching.len() - limit..].to_vec(),
            _ => matching,
        }
    }

    pub fn get_stats(&self) -> BusStats {
        let counters = *self.inner.ledger.counters.lock();
        let (active_subscriptions, topic_count) = {
            let table = self.inner.subscriptions.read();
            (table.topic_of.len(), table.by_topic.len())
        };
        BusStats {
            published: counters.published,
            delivered: counters.delivered,
            handler_failures: counters.handler_failures,
            direct_sent: counters.direct_sent,
            requests: counters.requests,
            responses: counters.responses,
            timeouts: counters.timeouts,
            active_subscriptions,
            topic_count,
            pending_requests: self.inner.pending.len(),
            history_len: self.inner.history.lock().len(),
        }
    }

    pub fn get_subscribers(&self, topic: &str) -> Vec<SubscriberInfo> {
        let table = self.inner.subscriptions.read();
        table
            .by_topic
            .get(topic)
            .into_iter()
            .flatten()
            .map(|s| SubscriberInfo {
                subscription_id: s.id,
                agent_id: s.agent_id.clone(),
                topic: topic.to_string(),
                filtered: s.filter.is_some(),
            })
            .collect()
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.inner.subscriptions.read().has_subscribers(topic)
    }

    /// Recorded handler failures, most recent last.
    pub fn get_failures(&self, limit: Option<usize>) -> Vec<HandlerFailure> {
        let failures = self.inner.ledger.failures.lock();
        let skip = limit.map_or(0, |l| failures.len().saturating_sub(l));
        failures.iter().skip(skip).cloned().collect()
    }

    /// Resolve once every delivery scheduled so far has been handled.
    pub async fn wait_idle(&self) {
        self.inner.in_flight.wait_idle().await;
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

fn passes_filter(subscription: &Subscription, message: &Message) -> bool {
    let Some(filter) = &subscription.filter else {
        return true;
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| filter(message))) {
        Ok(passed) => passed,
        Err(_) => {
            warn!(
                subscription_id = %subscription.id,
                message_id = %message.id(),
                "Subscription filter panicked; message skipped"
            );
            false
        }
    }
}

fn spawn_worker(
    subscription_id: SubscriptionId,
    agent_id: AgentId,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    ledger: Arc<DeliveryLedger>,
) {
    tokio::spawn(async move {
        while let Some(delivery) = receiver.recv().await {
            let message_id = delivery.message.id();
            let outcome = AssertUnwindSafe(handler.handle(delivery.message.clone()))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            if let Err(error) = &result {
                ledger.record_failure(HandlerFailure {
                    subscription_id,
                    agent_id: agent_id.clone(),
                    message_id,
                    topic: topic.clone(),
                    error: error.clone(),
                    failed_at: Utc::now(),
                });
            }
            if let Some(report) = delivery.report {
                let _ = report.send(result);
            }
        }
        debug!(subscription_id = %subscription_id, topic = %topic, "Subscription worker drained");
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

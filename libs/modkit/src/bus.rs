//! The in-process topic bus (C3): URL-pattern publish/subscribe used as the
//! coordination substrate between `Context`s and `Module` actions.
//!
//! No analogous component exists in the teacher repo; the pattern-matching
//! approach is grounded on the path-template syntax (`:name`, trailing `*`)
//! the teacher already depends on through `axum::Router`, compiled here with
//! `regex` instead of axum's matcher since the bus needs its own standalone
//! compiled-pattern cache independent of any HTTP router.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use regex::Regex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Type-erased payload carried alongside a publish.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Bound path parameters plus the concrete topic and payload, handed to a
/// subscriber on each matching publish.
#[derive(Clone)]
pub struct BusMessage {
    pub topic: String,
    pub params: HashMap<String, String>,
    pub payload: Payload,
}

/// An async subscriber callback.
pub type Handler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Opaque handle returned by `subscribe`, usable with `unsubscribe`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId(Uuid);

struct CompiledPattern {
    regex: Regex,
    names: Vec<String>,
}

fn compile_pattern(pattern: &str) -> CoreResult<CompiledPattern> {
    let mut names = Vec::new();
    let mut regex_src = String::from("^");
    let segments: Vec<&str> = pattern.split('/').collect();

    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            regex_src.push('/');
        }
        if seg == &"*" {
            regex_src.push_str("(?P<__wildcard>.*)");
        } else if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(CoreError::InvalidTopic {
                    pattern: pattern.to_string(),
                    reason: "named segment is missing a name after ':'".to_string(),
                });
            }
            names.push(name.to_string());
            regex_src.push_str(&format!("(?P<{name}>[^/]+)"));
        } else {
            regex_src.push_str(&regex::escape(seg));
        }
    }
    regex_src.push('$');

    let regex = Regex::new(&regex_src).map_err(|e| CoreError::InvalidTopic {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    Ok(CompiledPattern { regex, names })
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    compiled: CompiledPattern,
    handler: Handler,
    once: bool,
    matched_cache: DashMap<String, HashMap<String, String>>,
}

impl Subscription {
    fn matches(&self, topic: &str) -> Option<HashMap<String, String>> {
        if let Some(cached) = self.matched_cache.get(topic) {
            return Some(cached.clone());
        }
        let caps = self.compiled.regex.captures(topic)?;
        let mut params = HashMap::new();
        for name in &self.compiled.names {
            if let Some(m) = caps.name(name) {
                params.insert(name.clone(), m.as_str().to_string());
            }
        }
        if let Some(m) = caps.name("__wildcard") {
            params.insert("*".to_string(), m.as_str().to_string());
        }
        self.matched_cache.insert(topic.to_string(), params.clone());
        Some(params)
    }
}

/// The process-wide pub/sub bus.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    in_flight: AtomicU64,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handler invocations currently scheduled or running.
    pub fn in_flight(&self) -> u64 {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, topic_pattern: &str, handler: Handler) -> CoreResult<SubscriptionId> {
        self.subscribe_inner(topic_pattern, handler, false)
    }

    fn subscribe_inner(
        &self,
        topic_pattern: &str,
        handler: Handler,
        once: bool,
    ) -> CoreResult<SubscriptionId> {
        let compiled = compile_pattern(topic_pattern)?;
        let id = SubscriptionId(Uuid::new_v4());
        self.inner.subscriptions.insert(
            id,
            Subscription {
                id,
                pattern: topic_pattern.to_string(),
                compiled,
                handler,
                once,
                matched_cache: DashMap::new(),
            },
        );
        Ok(id)
    }

    /// Sugar over `subscribe(..., once = true)`; resolves when the next
    /// matching publish occurs.
    pub fn once(&self, topic: &str) -> CoreResult<BoxFuture<'static, BusMessage>> {
        let (tx, rx) = oneshot::channel::<BusMessage>();
        let tx = parking_lot::Mutex::new(Some(tx));
        self.subscribe_inner(
            topic,
            Arc::new(move |msg: BusMessage| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(msg);
                }
                Box::pin(async { Ok(()) })
            }),
            true,
        )?;

        Ok(Box::pin(async move {
            rx.await
                .expect("once subscription dropped before it fired")
        }))
    }

    /// Removes a subscription by its handle.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.remove(&id);
    }

    /// Removes every subscription whose pattern matches `topic` (not
    /// restricted to exact string equality).
    pub fn unsubscribe_matching(&self, topic: &str) {
        let ids: Vec<SubscriptionId> = self
            .inner
            .subscriptions
            .iter()
            .filter(|e| e.value().matches(topic).is_some())
            .map(|e| *e.key())
            .collect();
        for id in ids {
            self.inner.subscriptions.remove(&id);
        }
    }

    /// Publishes `topic` with an arbitrary payload. Returns once every
    /// matched handler has been scheduled and awaited; handler failures are
    /// logged, never propagated, and never abort sibling handlers.
    pub async fn publish(&self, topic: &str, payload: Payload) {
        // Yield once before computing the match set so subscriptions made
        // earlier in this same synchronous tick are observable.
        tokio::task::yield_now().await;

        let mut matched: Vec<(SubscriptionId, Handler, HashMap<String, String>, bool)> =
            Vec::new();
        for entry in self.inner.subscriptions.iter() {
            if let Some(params) = entry.value().matches(topic) {
                matched.push((
                    entry.value().id,
                    entry.value().handler.clone(),
                    params,
                    entry.value().once,
                ));
            }
        }

        for (id, _, _, once) in &matched {
            if *once {
                self.inner.subscriptions.remove(id);
            }
        }

        if matched.is_empty() {
            return;
        }

        self.inner
            .in_flight
            .fetch_add(matched.len() as u64, Ordering::SeqCst);

        let topic_owned = topic.to_string();
        let tasks: Vec<_> = matched
            .into_iter()
            .map(|(_, handler, params, _)| {
                let payload = payload.clone();
                let topic = topic_owned.clone();
                let in_flight = self.inner.clone();
                tokio::spawn(async move {
                    let msg = BusMessage {
                        topic,
                        params,
                        payload,
                    };
                    if let Err(err) = handler(msg).await {
                        tracing::warn!(error = %err, "bus handler failed");
                    }
                    in_flight.in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            if let Err(join_err) = task.await {
                tracing::warn!(error = %join_err, "bus handler task panicked");
            }
        }
    }

    #[cfg(test)]
    fn pattern_for(&self, id: SubscriptionId) -> Option<String> {
        self.inner.subscriptions.get(&id).map(|s| s.pattern.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn payload() -> Payload {
        Arc::new(())
    }

    #[tokio::test]
    async fn publish_invokes_matching_subscriber_with_bound_params() {
        let bus = Bus::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        bus.subscribe(
            "/request/:id/get/dashboard",
            Arc::new(move |msg: BusMessage| {
                *seen2.lock() = Some(msg.params.get("id").cloned());
                Box::pin(async { Ok(()) })
            }),
        )
        .unwrap();

        bus.publish("/request/42/get/dashboard", payload()).await;
        assert_eq!(*seen.lock(), Some(Some("42".to_string())));
    }

    #[tokio::test]
    async fn wildcard_segment_captures_remainder() {
        let bus = Bus::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        bus.subscribe(
            "/request/:id/*",
            Arc::new(move |msg: BusMessage| {
                *seen2.lock() = msg.params.get("*").cloned();
                Box::pin(async { Ok(()) })
            }),
        )
        .unwrap();

        bus.publish("/request/7/get/a/b/c", payload()).await;
        assert_eq!(seen.lock().as_deref(), Some("get/a/b/c"));
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_siblings_and_in_flight_returns_to_zero() {
        let bus = Bus::new();
        let spy_calls = Arc::new(AtomicUsize::new(0));
        let spy_calls2 = spy_calls.clone();

        bus.subscribe(
            "/t",
            Arc::new(|_msg: BusMessage| Box::pin(async { anyhow::bail!("boom") })),
        )
        .unwrap();
        bus.subscribe(
            "/t",
            Arc::new(move |_msg: BusMessage| {
                spy_calls2.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }),
        )
        .unwrap();

        bus.publish("/t", payload()).await;
        assert_eq!(spy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn once_subscription_fires_only_for_the_next_publish() {
        let bus = Bus::new();
        let fut = bus.once("/ping").unwrap();
        bus.publish("/ping", payload()).await;
        let msg = fut.await;
        assert_eq!(msg.topic, "/ping");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        bus.subscribe(
            "/ping",
            Arc::new(move |_msg: BusMessage| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }),
        )
        .unwrap();
        bus.publish("/ping", payload()).await;
        bus.publish("/ping", payload()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = Bus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let id = bus
            .subscribe(
                "/t",
                Arc::new(move |_msg: BusMessage| {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                }),
            )
            .unwrap();

        bus.unsubscribe(id);
        bus.publish("/t", payload()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_pattern_is_rejected_at_subscribe_time() {
        let bus = Bus::new();
        let err = bus
            .subscribe(
                "/bad/:",
                Arc::new(|_msg: BusMessage| Box::pin(async { Ok(()) })),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTopic { .. }));
    }

    #[tokio::test]
    async fn pattern_for_reports_registered_pattern() {
        let bus = Bus::new();
        let id = bus
            .subscribe(
                "/x",
                Arc::new(|_msg: BusMessage| Box::pin(async { Ok(()) })),
            )
            .unwrap();
        assert_eq!(bus.pattern_for(id).as_deref(), Some("/x"));
    }
}

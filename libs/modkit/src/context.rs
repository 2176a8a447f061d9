//! The per-trigger scheduler (C5): plans an execution graph from a trigger
//! topic, validates phase/dependency ordering, runs phases with intra-phase
//! concurrency via the Bus, and aggregates terminal state.
//!
//! No direct analogue exists in the teacher; the phase-grouped,
//! concurrent-within-phase, abort-on-error execution loop is modeled on
//! `runtime/host_runtime.rs`'s `run_init_phase`/`run_db_phase` passes, which
//! resolve every entry in a phase, `join_all` their futures, and stop on the
//! first failing phase.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::action::ActionRegistry;
use crate::bus::Bus;
use crate::error::{CoreError, CoreResult};

/// Context lifecycle state. Terminal states (`Done`, `Error`) are sticky.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContextState {
    Pending,
    Running,
    Done,
    Error,
}

impl ContextState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ContextState::Done | ContextState::Error)
    }
}

/// Which kind of trigger produced this context, and any kind-specific
/// scheduling behavior (only the overall timeout, for HTTP).
#[derive(Clone, Debug)]
pub enum ContextKind {
    Init,
    Http { timeout: Duration },
}

impl ContextKind {
    pub fn default_http() -> Self {
        ContextKind::Http {
            timeout: Duration::from_millis(5_000),
        }
    }
}

struct Inner {
    state: ContextState,
    action_log: HashSet<String>,
    errored_actions: HashSet<String>,
    phase_map: BTreeMap<i32, HashSet<String>>,
    data: HashMap<String, Arc<dyn Any + Send + Sync>>,
    error: Option<Arc<CoreError>>,
}

struct ContextInner {
    id: String,
    created_at: DateTime<Utc>,
    kind: ContextKind,
    trigger: String,
    bus: Bus,
    action_registry: ActionRegistry,
    inner: Mutex<Inner>,
    notify: tokio::sync::Notify,
}

/// A one-shot orchestrator for a single trigger. Cheap to clone: sharing a
/// `Context` across the Bus and its Module subscribers is the normal way to
/// pass it along as a publish payload.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(kind: ContextKind, trigger: impl Into<String>, bus: Bus, action_registry: ActionRegistry) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                kind,
                trigger: trigger.into(),
                bus,
                action_registry,
                inner: Mutex::new(Inner {
                    state: ContextState::Pending,
                    action_log: HashSet::new(),
                    errored_actions: HashSet::new(),
                    phase_map: BTreeMap::new(),
                    data: HashMap::new(),
                    error: None,
                }),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn trigger(&self) -> &str {
        &self.inner.trigger
    }

    pub fn kind(&self) -> &ContextKind {
        &self.inner.kind
    }

    pub fn state(&self) -> ContextState {
        self.inner.inner.lock().state
    }

    pub fn error(&self) -> Option<Arc<CoreError>> {
        self.inner.inner.lock().error.clone()
    }

    pub fn action_log(&self) -> HashSet<String> {
        self.inner.inner.lock().action_log.clone()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.inner.inner.lock().data.insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.inner.lock().data.get(key).cloned()
    }

    fn start(&self) {
        let mut inner = self.inner.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = ContextState::Running;
        }
    }

    fn transition_done(&self) {
        let mut inner = self.inner.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = ContextState::Done;
        }
        drop(inner);
        self.inner.notify.notify_waiters();
    }

    fn transition_error(&self, err: CoreError) {
        let mut inner = self.inner.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = ContextState::Error;
            inner.error = Some(Arc::new(err));
        }
        drop(inner);
        self.inner.notify.notify_waiters();
    }

    /// Marks `{module}/{action}` as completed successfully. No-op if the
    /// context has already reached a terminal state.
    pub fn action_done(&self, module: &str, action: &str) {
        let fq = format!("{module}/{action}");
        {
            let mut inner = self.inner.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.action_log.insert(fq.clone());
        }
        self.inner.notify.notify_waiters();

        tracing::debug!(
            context_id = %self.inner.id,
            trigger = %self.inner.trigger,
            action = %fq,
            "action done"
        );

        let bus = self.inner.bus.clone();
        let topic = format!("{}/{}/{}/done", self.inner.trigger, self.inner.id, fq);
        tokio::spawn(async move {
            bus.publish(&topic, Arc::new(())).await;
        });
    }

    /// Marks `{module}/{action}` as failed and pushes the whole context into
    /// `Error`. No-op if already terminal.
    pub fn action_error(&self, module: &str, action: &str, err: anyhow::Error) {
        let fq = format!("{module}/{action}");
        let err_display = err.to_string();
        {
            let mut inner = self.inner.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.errored_actions.insert(fq.clone());
            inner.state = ContextState::Error;
            inner.error = Some(Arc::new(CoreError::ActionFailed {
                action: fq.clone(),
                source: err,
            }));
        }
        self.inner.notify.notify_waiters();

        tracing::warn!(
            context_id = %self.inner.id,
            trigger = %self.inner.trigger,
            action = %fq,
            error = %err_display,
            "action error"
        );

        let bus = self.inner.bus.clone();
        let topic = format!("{}/{}/{}/error", self.inner.trigger, self.inner.id, fq);
        tokio::spawn(async move {
            bus.publish(&topic, Arc::new(())).await;
        });
    }

    /// Resolves immediately if `action_log` already covers every entry in
    /// `deps`; otherwise suspends until it does, or rejects as soon as any
    /// listed dependency errors.
    pub async fn wait_for(&self, deps: &[String]) -> CoreResult<()> {
        if deps.is_empty() {
            return Ok(());
        }
        loop {
            {
                let inner = self.inner.inner.lock();
                if let Some(failed) = deps.iter().find(|d| inner.errored_actions.contains(*d)) {
                    return Err(CoreError::ActionFailed {
                        action: failed.clone(),
                        source: anyhow::anyhow!("dependency failed"),
                    });
                }
                if deps.iter().all(|d| inner.action_log.contains(d)) {
                    return Ok(());
                }
            }
            self.inner.notify.notified().await;
        }
    }

    async fn wait_for_phase(&self, phase_actions: &HashSet<String>) {
        loop {
            {
                let inner = self.inner.inner.lock();
                let settled = phase_actions
                    .iter()
                    .all(|a| inner.action_log.contains(a) || inner.errored_actions.contains(a));
                if settled {
                    return;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Runs the full plan → validate → execute-by-phase → finish algorithm
    /// for this context's trigger topic.
    pub async fn run(&self) -> CoreResult<()> {
        let body = self.run_inner();
        match &self.inner.kind {
            ContextKind::Init => body.await,
            ContextKind::Http { timeout } => match tokio::time::timeout(*timeout, body).await {
                Ok(result) => result,
                Err(_) => {
                    let err = CoreError::Timeout {
                        context_id: self.inner.id.clone(),
                        elapsed_ms: timeout.as_millis() as u64,
                    };
                    self.transition_error(err.clone());
                    Err(err)
                }
            },
        }
    }

    async fn run_inner(&self) -> CoreResult<()> {
        self.start();
        tracing::debug!(
            context_id = %self.inner.id,
            trigger = %self.inner.trigger,
            "context started"
        );

        // 1. Plan.
        let plan = self.inner.action_registry.actions_for(&self.inner.trigger);
        if plan.is_empty() {
            let err = CoreError::NoHandlers {
                topic: self.inner.trigger.clone(),
            };
            tracing::warn!(
                context_id = %self.inner.id,
                trigger = %self.inner.trigger,
                "no handlers registered for trigger"
            );
            self.transition_error(err.clone());
            return Err(err);
        }

        // 2. Validate.
        let action_to_phase: HashMap<String, i32> =
            plan.iter().map(|a| (a.fq_id(), a.phase)).collect();

        for action in &plan {
            for dep in action.resolved_dependencies() {
                let Some(&dep_phase) = action_to_phase.get(&dep) else {
                    let err = CoreError::UnresolvedDependency {
                        action: action.fq_id(),
                        dependency: dep,
                    };
                    tracing::warn!(
                        context_id = %self.inner.id,
                        trigger = %self.inner.trigger,
                        action = %action.fq_id(),
                        "unresolved dependency"
                    );
                    self.transition_error(err.clone());
                    return Err(err);
                };
                if dep_phase > action.phase {
                    let err = CoreError::PhaseParadox {
                        action: action.fq_id(),
                        action_phase: action.phase,
                        dependency: dep,
                        dependency_phase: dep_phase,
                    };
                    tracing::warn!(
                        context_id = %self.inner.id,
                        trigger = %self.inner.trigger,
                        action = %action.fq_id(),
                        "phase paradox"
                    );
                    self.transition_error(err.clone());
                    return Err(err);
                }
            }
        }

        let mut phase_map: BTreeMap<i32, HashSet<String>> = BTreeMap::new();
        for action in &plan {
            phase_map.entry(action.phase).or_default().insert(action.fq_id());
        }
        self.inner.inner.lock().phase_map = phase_map.clone();

        // 3. Run phases, ascending. Every action in a phase is published
        // concurrently (`join_all`, matching `lifecycle.rs`'s phase walk):
        // a same-phase peer dependency is legal per the validation pass
        // above, and only works if the coordinator is already awaiting the
        // dependency's publish when the dependent's `wait_for` suspends.
        for (phase, actions_in_phase) in phase_map.iter() {
            let phase = *phase;
            tracing::debug!(
                context_id = %self.inner.id,
                trigger = %self.inner.trigger,
                phase,
                count = actions_in_phase.len(),
                "context phase starting"
            );

            let publishes = plan
                .iter()
                .filter(|a| actions_in_phase.contains(&a.fq_id()))
                .map(|action| {
                    let topic = format!(
                        "/context/execute/{}/{}",
                        action.module_name, action.action_name
                    );
                    let context: Arc<dyn Any + Send + Sync> = Arc::new(self.clone());
                    let bus = self.inner.bus.clone();
                    async move { bus.publish(&topic, context).await }
                });
            futures::future::join_all(publishes).await;

            self.wait_for_phase(actions_in_phase).await;

            if self.state() == ContextState::Error {
                tracing::debug!(
                    context_id = %self.inner.id,
                    trigger = %self.inner.trigger,
                    phase,
                    "context phase aborted"
                );
                break;
            }
        }

        // 4. Finish.
        if self.state() != ContextState::Error {
            self.transition_done();
            tracing::debug!(
                context_id = %self.inner.id,
                trigger = %self.inner.trigger,
                "context done"
            );
            Ok(())
        } else {
            Err(self
                .error()
                .map(|e| (*e).clone())
                .unwrap_or(CoreError::NoHandlers {
                    topic: self.inner.trigger.clone(),
                }))
        }
    }
}

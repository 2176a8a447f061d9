//! Process-wide wiring of the triad: owns the `Registry`, `Bus`, and
//! `ActionRegistry`, and drives the two process-level moments the
//! specification names — lifecycle setup followed by the `/init` trigger at
//! startup, and lifecycle teardown at shutdown.
//!
//! Grounded on the teacher's `HostRuntime::run_full_cycle` (system_wire → DB
//! → init → REST → gRPC → start → wait → stop), reduced to the phases this
//! specification keeps: lifecycle setup, the init context, and lifecycle
//! teardown — request-time contexts are driven per-request by the HTTP
//! collaborator rather than by this type.

use std::time::Duration;

use crate::action::ActionRegistry;
use crate::bus::Bus;
use crate::context::{Context, ContextKind};
use crate::error::CoreResult;
use crate::lifecycle::LifecycleCoordinator;
use crate::registry::Registry;

/// The running process's shared core: one `Registry`, one `Bus`, one
/// `ActionRegistry`, cloned cheaply into every `Module`'s `install` call.
#[derive(Clone)]
pub struct Runtime {
    pub registry: Registry,
    pub bus: Bus,
    pub actions: ActionRegistry,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            bus: Bus::new(),
            actions: ActionRegistry::new(),
        }
    }

    /// Runs lifecycle setup (ascending phase), then publishes `/init` and
    /// waits for the resulting `InitContext` to reach a terminal state.
    /// Returns `Err` if either setup or the init context fails.
    pub async fn start(&self) -> anyhow::Result<()> {
        let coordinator = LifecycleCoordinator::new(self.registry.clone());
        coordinator.run_setup().await?;

        let ctx = Context::new(ContextKind::Init, "/init", self.bus.clone(), self.actions.clone());
        ctx.run().await?;
        Ok(())
    }

    /// Builds and runs an `HttpContext` for `method`/`path`, bounded by
    /// `timeout`. Returns the finished context so the HTTP collaborator can
    /// inspect its terminal state and any error.
    pub async fn handle_request(&self, method: &str, path: &str, timeout: Duration) -> Context {
        self.handle_request_with(method, path, timeout, |_ctx| {}).await
    }

    /// Same as [`Self::handle_request`], but calls `seed` on the freshly
    /// built `Context` before running it — the HTTP collaborator uses this
    /// to stash the inbound `HttpRequest`/`HttpResponse` into the context's
    /// scratch `data` map (§3's "context-kind-specific fields") without
    /// `modkit` itself depending on HTTP types.
    pub async fn handle_request_with(
        &self,
        method: &str,
        path: &str,
        timeout: Duration,
        seed: impl FnOnce(&Context),
    ) -> Context {
        let trigger = format!("/request/:requestId/{}{}", method.to_lowercase(), path);
        let ctx = Context::new(
            ContextKind::Http { timeout },
            trigger,
            self.bus.clone(),
            self.actions.clone(),
        );
        seed(&ctx);
        let _: CoreResult<()> = ctx.run().await;
        ctx
    }

    /// Runs lifecycle teardown (descending phase) and resets the registry.
    pub async fn shutdown(&self) {
        let coordinator = LifecycleCoordinator::new(self.registry.clone());
        coordinator.run_teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::registry::RegisterOptions;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Warmer {
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl crate::lifecycle::Lifecycle for Warmer {
        async fn setup(&self) -> anyhow::Result<()> {
            self.log.lock().push("setup");
            Ok(())
        }
        async fn teardown(&self) -> anyhow::Result<()> {
            self.log.lock().push("teardown");
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_runs_lifecycle_then_init_trigger() {
        let runtime = Runtime::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        runtime
            .registry
            .register_lifecycle_instance(
                Arc::new(Warmer { log: log.clone() }),
                RegisterOptions::new().key("warmer").phase(10),
            )
            .unwrap();

        runtime
            .actions
            .register("/init", Action::new("Bootstrap", "noop").phase(60), true)
            .unwrap();
        runtime
            .bus
            .subscribe(
                "/context/execute/Bootstrap/noop",
                Arc::new(|msg: crate::bus::BusMessage| {
                    Box::pin(async move {
                        let ctx = msg.payload.downcast_ref::<Context>().cloned().unwrap();
                        ctx.action_done("Bootstrap", "noop");
                        Ok(())
                    })
                }),
            )
            .unwrap();

        runtime.start().await.unwrap();
        assert_eq!(*log.lock(), vec!["setup"]);

        runtime.shutdown().await;
        assert_eq!(*log.lock(), vec!["setup", "teardown"]);
    }

    #[tokio::test]
    async fn handle_request_with_no_matching_action_yields_no_handlers() {
        let runtime = Runtime::new();
        let ctx = runtime
            .handle_request("get", "/nowhere", Duration::from_millis(100))
            .await;
        assert_eq!(ctx.state(), crate::context::ContextState::Error);
        assert!(matches!(
            ctx.error().as_deref(),
            Some(crate::error::CoreError::NoHandlers { .. })
        ));
    }
}

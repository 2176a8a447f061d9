//! LifecycleCoordinator (C2): ordered startup (ascending phase) and
//! teardown (descending phase) of registry components that opted into
//! setup/teardown.
//!
//! Grounded on `runtime/host_runtime.rs`'s `run_init_phase`/`run_stop_phase`
//! (phase-grouped passes, descending teardown that logs-and-continues on
//! failure), generalized from a fixed db/init/rest/grpc pipeline to the
//! single ascending/descending phase walk this specification names, and
//! made concurrent within a phase per §4.2/§5.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::registry::Registry;

/// Implemented by any component the Registry tracks for phased
/// startup/teardown. Both methods default to a no-op so "present in the
/// startup plan" stays orthogonal to "has real init work," exactly as the
/// specification requires.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Drives every lifecycle-participating registration through setup
/// (ascending phase, concurrent within a phase, abort-on-failure) and
/// teardown (descending phase, concurrent within a phase, log-and-continue).
pub struct LifecycleCoordinator {
    registry: Registry,
}

impl LifecycleCoordinator {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Runs every phase's setups in ascending order. Aborts on the first
    /// failing phase; already-completed setups from earlier phases are not
    /// rolled back (teardown is still expected to release them later).
    pub async fn run_setup(&self) -> anyhow::Result<()> {
        let entries = self.registry.lifecycle_entries_by_phase();
        let mut phases: Vec<i32> = entries.iter().map(|(p, _, _)| *p).collect();
        phases.dedup();

        for phase in phases {
            let in_phase: Vec<(String, Arc<dyn Lifecycle>)> = entries
                .iter()
                .filter(|(p, _, _)| *p == phase)
                .map(|(_, k, c)| (k.clone(), c.clone()))
                .collect();

            tracing::info!(phase, count = in_phase.len(), "lifecycle setup phase");

            let results = join_all(in_phase.iter().map(|(key, component)| {
                let key = key.clone();
                async move {
                    component
                        .setup()
                        .await
                        .map_err(|err| (key, err))
                }
            }))
            .await;

            for result in results {
                if let Err((key, err)) = result {
                    tracing::error!(key = %key, error = %err, "lifecycle setup failed");
                    return Err(err.context(format!("setup failed for '{key}'")));
                }
            }
        }

        Ok(())
    }

    /// Runs every phase's teardowns in descending order. A failing
    /// `teardown()` is logged and does not stop the walk. After the final
    /// phase, the registry is reset.
    pub async fn run_teardown(&self) {
        let entries = self.registry.lifecycle_entries_by_phase();
        let mut phases: Vec<i32> = entries.iter().map(|(p, _, _)| *p).collect();
        phases.dedup();
        phases.reverse();

        for phase in phases {
            let in_phase: Vec<(String, Arc<dyn Lifecycle>)> = entries
                .iter()
                .filter(|(p, _, _)| *p == phase)
                .map(|(_, k, c)| (k.clone(), c.clone()))
                .collect();

            tracing::info!(phase, count = in_phase.len(), "lifecycle teardown phase");

            join_all(in_phase.iter().map(|(key, component)| {
                let key = key.clone();
                async move {
                    if let Err(err) = component.teardown().await {
                        tracing::warn!(key = %key, error = %err, "lifecycle teardown failed");
                    }
                }
            }))
            .await;
        }

        self.registry.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisterOptions;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_setup: bool,
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        async fn setup(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("setup:{}", self.name));
            if self.fail_setup {
                anyhow::bail!("setup failed for {}", self.name);
            }
            Ok(())
        }

        async fn teardown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("teardown:{}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn setup_and_teardown_run_in_opposite_phase_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register_lifecycle_instance(
                Arc::new(Recorder {
                    name: "early",
                    log: log.clone(),
                    fail_setup: false,
                }),
                RegisterOptions::new().key("early").phase(10),
            )
            .unwrap();
        registry
            .register_lifecycle_instance(
                Arc::new(Recorder {
                    name: "late",
                    log: log.clone(),
                    fail_setup: false,
                }),
                RegisterOptions::new().key("late").phase(20),
            )
            .unwrap();

        let coordinator = LifecycleCoordinator::new(registry.clone());
        coordinator.run_setup().await.unwrap();
        coordinator.run_teardown().await;

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec!["setup:early", "setup:late", "teardown:late", "teardown:early"]
        );
        assert!(!registry.contains("early"));
    }

    #[tokio::test]
    async fn failing_setup_aborts_remaining_phases() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register_lifecycle_instance(
                Arc::new(Recorder {
                    name: "bad",
                    log: log.clone(),
                    fail_setup: true,
                }),
                RegisterOptions::new().key("bad").phase(10),
            )
            .unwrap();
        registry
            .register_lifecycle_instance(
                Arc::new(Recorder {
                    name: "never",
                    log: log.clone(),
                    fail_setup: false,
                }),
                RegisterOptions::new().key("never").phase(20),
            )
            .unwrap();

        let coordinator = LifecycleCoordinator::new(registry);
        let err = coordinator.run_setup().await.unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert_eq!(*log.lock(), vec!["setup:bad"]);
    }
}

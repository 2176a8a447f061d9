//! The service container (C1): a typed registry that stores singletons,
//! per-call factories, and scalars; supports tag-based multi-resolution;
//! detects resolution cycles.
//!
//! Modeled on the teacher's `RegistryBuilder`/`ModuleRegistry` split between
//! declaration and resolution, generalized from "module wiring" to a
//! general-purpose DI container, and enriched with the cycle-detection
//! approach from `ferrous-di`'s `internal::circular` (adapted to a
//! `thread_local` resolution stack, since `resolve` never awaits).

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{CoreError, CoreResult};
use crate::lifecycle::Lifecycle;

/// Type-erased object stored in the registry.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// A factory closure. Receives the registry so it can resolve its own
/// dependencies, and returns a freshly constructed, type-erased instance.
pub type Factory = Arc<dyn Fn(&Registry) -> anyhow::Result<AnyArc> + Send + Sync>;

/// Options accepted by every `register_*` call.
///
/// This is exactly the recognized set from the specification: `{ key,
/// singleton, tags, phase }` (`setup`/`teardown` live on the separate
/// `register_lifecycle_instance` path, see `lifecycle.rs`).
#[derive(Clone, Default)]
pub struct RegisterOptions {
    pub key: Option<String>,
    pub singleton: bool,
    pub tags: Vec<String>,
    pub phase: Option<i32>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn phase(mut self, phase: i32) -> Self {
        self.phase = Some(phase);
        self
    }
}

enum Kind {
    Factory(Factory),
    Instance,
    Scalar,
}

struct Entry {
    kind: Kind,
    singleton: bool,
    #[allow(dead_code)]
    phase: Option<i32>,
    tags: HashSet<String>,
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard pushing `key` onto the per-thread resolution stack, detecting
/// re-entrancy (a cycle) before the push succeeds.
struct ResolutionGuard {
    pushed: bool,
}

impl ResolutionGuard {
    fn enter(key: &str) -> CoreResult<Self> {
        let cycle = RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().position(|k| k == key) {
                let mut path: Vec<String> = stack[pos..].to_vec();
                path.push(key.to_string());
                return Some(path);
            }
            stack.push(key.to_string());
            None
        });

        if let Some(path) = cycle {
            return Err(CoreError::CircularDependency { path });
        }
        Ok(Self { pushed: true })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        if self.pushed {
            RESOLUTION_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
}

/// The process-wide, typed service container.
///
/// Cheap to clone: internally it's an `Arc` around a couple of `DashMap`s, so
/// reads of an already-cached singleton never take a lock.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: DashMap<String, Entry>,
    singletons: DashMap<String, AnyArc>,
    lifecycle: DashMap<String, (i32, Arc<dyn Lifecycle>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built instance. Always `singleton = true`: the
    /// instance is cached immediately, per the data model.
    pub fn register_instance<T>(&self, value: T, mut opts: RegisterOptions) -> CoreResult<String>
    where
        T: Any + Send + Sync + 'static,
    {
        opts.singleton = true;
        let key = opts.key.clone().unwrap_or_else(|| type_key::<T>());
        self.validate_phase(&opts)?;

        let any: AnyArc = Arc::new(value);
        self.inner.singletons.insert(key.clone(), any);
        self.inner.entries.insert(
            key.clone(),
            Entry {
                kind: Kind::Instance,
                singleton: true,
                phase: opts.phase,
                tags: opts.tags.into_iter().collect(),
            },
        );
        Ok(key)
    }

    /// Register a factory. If `singleton`, the first `resolve` builds and
    /// caches the instance; later calls return the cached reference.
    /// Otherwise every `resolve` builds a fresh instance.
    pub fn register_factory<T, F>(&self, factory: F, opts: RegisterOptions) -> CoreResult<String>
    where
        T: Any + Send + Sync + 'static,
        F: Fn(&Registry) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let key = opts.key.clone().unwrap_or_else(|| type_key::<T>());
        self.validate_phase(&opts)?;

        let wrapped: Factory = Arc::new(move |reg| {
            let value = factory(reg)?;
            let any: AnyArc = Arc::new(value);
            Ok(any)
        });

        self.inner.entries.insert(
            key.clone(),
            Entry {
                kind: Kind::Factory(wrapped),
                singleton: opts.singleton,
                phase: opts.phase,
                tags: opts.tags.into_iter().collect(),
            },
        );
        Ok(key)
    }

    /// Register a scalar value. A `key` is mandatory; scalars are always
    /// singletons (re-registration under the same key overwrites).
    pub fn register_scalar<T>(
        &self,
        key: impl Into<String>,
        value: T,
        mut opts: RegisterOptions,
    ) -> CoreResult<String>
    where
        T: Any + Send + Sync + 'static,
    {
        opts.singleton = true;
        let key = key.into();
        opts.key = Some(key.clone());
        self.validate_phase(&opts)?;

        let any: AnyArc = Arc::new(value);
        self.inner.singletons.insert(key.clone(), any);
        self.inner.entries.insert(
            key.clone(),
            Entry {
                kind: Kind::Scalar,
                singleton: true,
                phase: opts.phase,
                tags: opts.tags.into_iter().collect(),
            },
        );
        Ok(key)
    }

    /// Registers a pre-built instance that also participates in phased
    /// setup/teardown (`LifecycleCoordinator` drives it). Always a
    /// singleton; defaults to phase 100 when unset, matching the data
    /// model's default action/component phase.
    pub fn register_lifecycle_instance<T>(
        &self,
        value: Arc<T>,
        mut opts: RegisterOptions,
    ) -> CoreResult<String>
    where
        T: Lifecycle + Any + Send + Sync + 'static,
    {
        opts.singleton = true;
        opts.phase.get_or_insert(100);
        let key = opts.key.clone().unwrap_or_else(|| type_key::<T>());

        let any: AnyArc = value.clone();
        self.inner.singletons.insert(key.clone(), any);
        self.inner.entries.insert(
            key.clone(),
            Entry {
                kind: Kind::Instance,
                singleton: true,
                phase: opts.phase,
                tags: opts.tags.into_iter().collect(),
            },
        );
        let as_lifecycle: Arc<dyn Lifecycle> = value;
        self.inner
            .lifecycle
            .insert(key.clone(), (opts.phase.unwrap(), as_lifecycle));
        Ok(key)
    }

    /// `(phase, key, component)` triples for every lifecycle-participating
    /// registration, sorted ascending by phase. Used by the
    /// `LifecycleCoordinator`.
    pub fn lifecycle_entries_by_phase(&self) -> Vec<(i32, String, Arc<dyn Lifecycle>)> {
        let mut out: Vec<(i32, String, Arc<dyn Lifecycle>)> = self
            .inner
            .lifecycle
            .iter()
            .map(|e| (e.value().0, e.key().clone(), e.value().1.clone()))
            .collect();
        out.sort_by_key(|(phase, key, _)| (*phase, key.clone()));
        out
    }

    /// Diagnostic view of [`Self::lifecycle_entries_by_phase`]: which keys
    /// land in which phase, without the `Arc<dyn Lifecycle>` handles.
    /// Grounded on the teacher's `modules_by_system_priority` introspection
    /// helper, generalized from "module" to any lifecycle-participating key.
    pub fn modules_by_phase(&self) -> std::collections::BTreeMap<i32, Vec<String>> {
        let mut out: std::collections::BTreeMap<i32, Vec<String>> = std::collections::BTreeMap::new();
        for (phase, key, _) in self.lifecycle_entries_by_phase() {
            out.entry(phase).or_default().push(key);
        }
        out
    }

    fn validate_phase(&self, opts: &RegisterOptions) -> CoreResult<()> {
        if opts.phase.is_some() && !opts.singleton {
            return Err(CoreError::InvalidRegistration {
                key: opts.key.clone().unwrap_or_default(),
                reason: "phase requires singleton = true".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve by explicit key.
    pub fn resolve<T>(&self, key: &str) -> CoreResult<Arc<T>>
    where
        T: Any + Send + Sync + 'static,
    {
        downcast(self.resolve_any(key)?, key)
    }

    /// Resolve by explicit key without downcasting. Used by callers that
    /// can't name a single concrete type (e.g. [`Self::resolve_by_tag_any`]).
    pub fn resolve_any(&self, key: &str) -> CoreResult<AnyArc> {
        if let Some(cached) = self.inner.singletons.get(key) {
            return Ok(cached.clone());
        }

        let entry_kind = {
            let entry = self
                .inner
                .entries
                .get(key)
                .ok_or_else(|| CoreError::NotRegistered {
                    key: key.to_string(),
                })?;
            match &entry.kind {
                Kind::Instance | Kind::Scalar => None,
                Kind::Factory(f) => Some((f.clone(), entry.singleton)),
            }
        };

        let Some((factory, singleton)) = entry_kind else {
            // Instance/Scalar entries are always pre-cached; reaching here
            // means the cache entry was evicted by a concurrent reset().
            return Err(CoreError::NotRegistered {
                key: key.to_string(),
            });
        };

        let _guard = ResolutionGuard::enter(key)?;
        let built = factory(self).map_err(|source| CoreError::ActionFailed {
            action: key.to_string(),
            source,
        })?;

        if singleton {
            // Another thread may have raced us; DashMap::entry keeps the
            // first writer's value so `resolve` stays referentially stable.
            let cached = self
                .inner
                .singletons
                .entry(key.to_string())
                .or_insert_with(|| built.clone());
            return Ok(cached.clone());
        }

        Ok(built)
    }

    /// Resolve by type, deriving the key from `std::any::type_name::<T>()`.
    pub fn resolve_by_type<T>(&self) -> CoreResult<Arc<T>>
    where
        T: Any + Send + Sync + 'static,
    {
        self.resolve::<T>(&type_key::<T>())
    }

    /// Resolve every registration tagged with `tag`, type-erased. Use this
    /// when callers can't or don't want to name a single concrete `T` (e.g.
    /// heterogeneous `Module` instances tagged `"Module"`).
    ///
    /// Order is unspecified; callers must not depend on it beyond set
    /// equality, per the specification.
    pub fn resolve_by_tag_any(&self, tag: &str) -> CoreResult<Vec<AnyArc>> {
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.tags.contains(tag))
            .map(|e| e.key().clone())
            .collect();

        keys.iter().map(|k| self.resolve_any(k)).collect()
    }

    /// Typed sugar over [`Self::resolve_by_tag_any`].
    pub fn resolve_by_tag<T>(&self, tag: &str) -> CoreResult<Vec<Arc<T>>>
    where
        T: Any + Send + Sync + 'static,
    {
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.tags.contains(tag))
            .map(|e| e.key().clone())
            .collect();

        keys.iter().map(|k| self.resolve::<T>(k)).collect()
    }

    /// Clears all registrations and cached instances without running
    /// teardown hooks. `LifecycleCoordinator::shutdown` calls this last.
    pub fn reset(&self) {
        self.inner.entries.clear();
        self.inner.singletons.clear();
        self.inner.lifecycle.clear();
    }

    /// Introspection helper: registered keys grouped by declared phase,
    /// ascending. Used by the lifecycle coordinator and by tests/diagnostics.
    pub fn keys_by_phase(&self) -> Vec<(i32, String)> {
        let mut out: Vec<(i32, String)> = self
            .inner
            .entries
            .iter()
            .filter_map(|e| e.phase.map(|p| (p, e.key().clone())))
            .collect();
        out.sort_by_key(|(phase, key)| (*phase, key.clone()));
        out
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }
}

fn downcast<T: Any + Send + Sync + 'static>(any: AnyArc, key: &str) -> CoreResult<Arc<T>> {
    any.downcast::<T>().map_err(|_| CoreError::NotRegistered {
        key: key.to_string(),
    })
}

fn type_key<T: ?Sized>() -> String {
    std::any::type_name::<T>().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_instance_is_cached_and_stable() {
        let registry = Registry::new();
        registry
            .register_instance(42i32, RegisterOptions::new().key("answer"))
            .unwrap();

        let a = registry.resolve::<i32>("answer").unwrap();
        let b = registry.resolve::<i32>("answer").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, 42);
    }

    #[test]
    fn resolve_missing_key_fails() {
        let registry = Registry::new();
        let err = registry.resolve::<i32>("nope").unwrap_err();
        assert!(matches!(err, CoreError::NotRegistered { .. }));
    }

    #[test]
    fn singleton_factory_returns_same_reference() {
        let registry = Registry::new();
        registry
            .register_factory(
                |_| Ok(String::from("built")),
                RegisterOptions::new().key("svc").singleton(true),
            )
            .unwrap();

        let a = registry.resolve::<String>("svc").unwrap();
        let b = registry.resolve::<String>("svc").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn non_singleton_factory_returns_fresh_instances() {
        let registry = Registry::new();
        registry
            .register_factory(
                |_| Ok(String::from("built")),
                RegisterOptions::new().key("svc").singleton(false),
            )
            .unwrap();

        let a = registry.resolve::<String>("svc").unwrap();
        let b = registry.resolve::<String>("svc").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn phase_requires_singleton() {
        let registry = Registry::new();
        let err = registry
            .register_factory(|_| Ok(1i32), RegisterOptions::new().key("x").phase(10))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRegistration { .. }));
    }

    struct NoopLifecycle;

    #[async_trait::async_trait]
    impl Lifecycle for NoopLifecycle {
        async fn setup(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn teardown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn modules_by_phase_groups_keys_under_ascending_phase() {
        let registry = Registry::new();
        registry
            .register_lifecycle_instance(
                Arc::new(NoopLifecycle),
                RegisterOptions::new().key("early").phase(10),
            )
            .unwrap();
        registry
            .register_lifecycle_instance(
                Arc::new(NoopLifecycle),
                RegisterOptions::new().key("late_a").phase(20),
            )
            .unwrap();
        registry
            .register_lifecycle_instance(
                Arc::new(NoopLifecycle),
                RegisterOptions::new().key("late_b").phase(20),
            )
            .unwrap();

        let by_phase = registry.modules_by_phase();
        assert_eq!(by_phase.get(&10), Some(&vec!["early".to_string()]));
        assert_eq!(
            by_phase.get(&20),
            Some(&vec!["late_a".to_string(), "late_b".to_string()])
        );
        assert_eq!(by_phase.keys().collect::<Vec<_>>(), vec![&10, &20]);
    }

    #[test]
    fn resolve_by_tag_returns_all_matches() {
        let registry = Registry::new();
        registry
            .register_instance(1i32, RegisterOptions::new().key("a").tag("nums"))
            .unwrap();
        registry
            .register_instance(2i32, RegisterOptions::new().key("b").tag("nums"))
            .unwrap();
        registry
            .register_instance(3i32, RegisterOptions::new().key("c"))
            .unwrap();

        let mut values: Vec<i32> = registry
            .resolve_by_tag::<i32>("nums")
            .unwrap()
            .iter()
            .map(|v| **v)
            .collect();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn resolve_by_tag_any_returns_type_erased_handles() {
        let registry = Registry::new();
        registry
            .register_instance(1i32, RegisterOptions::new().key("a").tag("nums"))
            .unwrap();
        registry
            .register_instance("two".to_string(), RegisterOptions::new().key("b").tag("nums"))
            .unwrap();

        let values = registry.resolve_by_tag_any("nums").unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().any(|v| v.downcast_ref::<i32>() == Some(&1)));
        assert!(values
            .iter()
            .any(|v| v.downcast_ref::<String>().map(String::as_str) == Some("two")));
    }

    #[test]
    fn circular_dependency_is_detected() {
        let registry = Registry::new();
        let r1 = registry.clone();
        registry
            .register_factory(
                move |_| {
                    let _: Arc<i32> = r1.resolve("b")?;
                    Ok(1i32)
                },
                RegisterOptions::new().key("a"),
            )
            .unwrap();
        let r2 = registry.clone();
        registry
            .register_factory(
                move |_| {
                    let _: Arc<i32> = r2.resolve("a")?;
                    Ok(2i32)
                },
                RegisterOptions::new().key("b"),
            )
            .unwrap();

        let err = registry.resolve::<i32>("a").unwrap_err();
        match err {
            CoreError::CircularDependency { path } => {
                assert_eq!(path.first().map(String::as_str), Some("a"));
                assert_eq!(path.last().map(String::as_str), Some("a"));
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn reset_clears_registrations_and_cache() {
        let registry = Registry::new();
        registry
            .register_instance(1i32, RegisterOptions::new().key("a"))
            .unwrap();
        registry.reset();
        assert!(registry.resolve::<i32>("a").is_err());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn scalar_requires_an_explicit_key() {
        // `register_scalar` always takes an explicit key via its signature,
        // satisfying the "scalar requires an explicit key" invariant
        // without needing a runtime check.
        let registry = Registry::new();
        let key = registry
            .register_scalar("env", "production".to_string(), RegisterOptions::new())
            .unwrap();
        assert_eq!(key, "env");
        assert_eq!(*registry.resolve::<String>("env").unwrap(), "production");
    }
}

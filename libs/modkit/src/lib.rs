//! # modkit — the orchestration core
//!
//! Turns a collection of independently-authored [`Module`]s into a running
//! application without letting them know about each other. Modules declare
//! [`Action`]s annotated with a phase and a dependency list; the framework
//! discovers them at startup (via `#[module]`/`#[init]`/`#[request]` from
//! `modkit-macros`), groups them into execution plans per [`Context`], and
//! runs them with correct ordering, intra-phase parallelism, and failure
//! containment.
//!
//! The core triad:
//! - [`Registry`] — a typed service container (singletons, factories,
//!   scalars, tag-based multi-resolution, cycle detection).
//! - [`Bus`] — an in-process topic bus with URL-pattern matching, used as
//!   the coordination substrate between contexts and actions.
//! - [`Context`] — the per-trigger scheduler: plans phases, validates the
//!   dependency graph, runs phases with intra-phase concurrency, aggregates
//!   terminal state.
//!
//! [`LifecycleCoordinator`] drives phased startup/teardown of registry
//! components; [`ActionRegistry`] is the static trigger-topic → action
//! table; [`Module`]/`install_action` is the per-action execution protocol
//! every concrete module shares.

pub use async_trait::async_trait;
pub use inventory;

pub mod action;
pub mod bus;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod registry;
pub mod runtime;

pub use action::{Action, ActionRegistry};
pub use bus::{Bus, BusMessage, SubscriptionId};
pub use context::{Context, ContextKind, ContextState};
pub use error::{CoreError, CoreResult, SharedError};
pub use lifecycle::{Lifecycle, LifecycleCoordinator};
pub use module::{install_action, Module};
pub use registry::{RegisterOptions, Registry};
pub use runtime::Runtime;

pub use modkit_macros::module;

/// An `install` function generated by `#[module(...)]`, submitted to this
/// inventory at link time so `install_all` can wire every discovered module
/// into a fresh `Registry`/`ActionRegistry`/`Bus` without a central
/// registration call.
pub struct ModuleInstaller(pub fn(&Registry, &ActionRegistry, &Bus) -> anyhow::Result<()>);

inventory::collect!(ModuleInstaller);

/// Runs every `#[module]`-generated installer discovered via `inventory`
/// against the given triad. Call once at process startup, before
/// `Runtime::start`.
pub fn install_all(registry: &Registry, actions: &ActionRegistry, bus: &Bus) -> anyhow::Result<()> {
    for installer in inventory::iter::<ModuleInstaller> {
        (installer.0)(registry, actions, bus)?;
    }
    Ok(())
}

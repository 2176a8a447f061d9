//! Error catalog for the core triad (Registry, Bus, Context).
//!
//! Names and recovery semantics follow the error table in the specification:
//! planning/validation errors push the owning `Context` into `ContextState::Error`,
//! registration errors are fatal at startup, and per-action failures are caught
//! at the bus boundary and converted into `action_error` events rather than
//! propagated.

use std::sync::Arc;

/// Errors raised by the core framework.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid registration for '{key}': {reason}")]
    InvalidRegistration { key: String, reason: String },

    #[error("no registration found for '{key}'")]
    NotRegistered { key: String },

    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("invalid topic pattern '{pattern}': {reason}")]
    InvalidTopic { pattern: String, reason: String },

    #[error("no actions registered for trigger topic '{topic}'")]
    NoHandlers { topic: String },

    #[error("action '{action}' depends on '{dependency}' which is not present in the plan")]
    UnresolvedDependency { action: String, dependency: String },

    #[error(
        "action '{action}' (phase {action_phase}) depends on '{dependency}' (phase {dependency_phase}), \
         which is not in an earlier-or-equal phase"
    )]
    PhaseParadox {
        action: String,
        action_phase: i32,
        dependency: String,
        dependency_phase: i32,
    },

    #[error("action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("context '{context_id}' timed out after {elapsed_ms}ms")]
    Timeout { context_id: String, elapsed_ms: u64 },

    #[error("duplicate action registration for '{fq_id}'")]
    DuplicateAction { fq_id: String },
}

impl Clone for CoreError {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidRegistration { key, reason } => Self::InvalidRegistration {
                key: key.clone(),
                reason: reason.clone(),
            },
            Self::NotRegistered { key } => Self::NotRegistered { key: key.clone() },
            Self::CircularDependency { path } => Self::CircularDependency { path: path.clone() },
            Self::InvalidTopic { pattern, reason } => Self::InvalidTopic {
                pattern: pattern.clone(),
                reason: reason.clone(),
            },
            Self::NoHandlers { topic } => Self::NoHandlers {
                topic: topic.clone(),
            },
            Self::UnresolvedDependency { action, dependency } => Self::UnresolvedDependency {
                action: action.clone(),
                dependency: dependency.clone(),
            },
            Self::PhaseParadox {
                action,
                action_phase,
                dependency,
                dependency_phase,
            } => Self::PhaseParadox {
                action: action.clone(),
                action_phase: *action_phase,
                dependency: dependency.clone(),
                dependency_phase: *dependency_phase,
            },
            // `anyhow::Error` isn't `Clone`; re-wrap its display text so the
            // terminal error can still be handed out to any number of
            // observers (HTTP collaborator, tests, logs).
            Self::ActionFailed { action, source } => Self::ActionFailed {
                action: action.clone(),
                source: anyhow::anyhow!(source.to_string()),
            },
            Self::Timeout {
                context_id,
                elapsed_ms,
            } => Self::Timeout {
                context_id: context_id.clone(),
                elapsed_ms: *elapsed_ms,
            },
            Self::DuplicateAction { fq_id } => Self::DuplicateAction {
                fq_id: fq_id.clone(),
            },
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Shared handle to a terminal error, stashed on a `Context` so any number of
/// waiters can observe the same failure without cloning `anyhow::Error`.
pub type SharedError = Arc<CoreError>;

//! Static action registry (C4): trigger-topic pattern → declared actions.
//!
//! Population is declarative at source-load time via `inventory::submit!`,
//! the same discovery idiom the teacher's `ModuleRegistry` uses for module
//! discovery, generalized here from "modules" to "actions."

use dashmap::DashMap;

use crate::error::{CoreError, CoreResult};

/// A declared unit of work on a module.
#[derive(Clone, Debug)]
pub struct Action {
    pub module_name: String,
    pub action_name: String,
    pub phase: i32,
    pub depends_on: Vec<String>,
}

impl Action {
    pub fn new(module_name: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            action_name: action_name.into(),
            phase: 100,
            depends_on: Vec::new(),
        }
    }

    pub fn phase(mut self, phase: i32) -> Self {
        self.phase = phase;
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// `"{ModuleName}/{ActionName}"`.
    pub fn fq_id(&self) -> String {
        format!("{}/{}", self.module_name, self.action_name)
    }

    /// Resolves a dependency entry against this action's own module: a bare
    /// `"ActionName"` resolves to `"{self.module_name}/ActionName"`; a
    /// `"ModuleName/ActionName"` entry is already fully qualified.
    pub fn resolve_dependency(&self, dep: &str) -> String {
        if dep.contains('/') {
            dep.to_string()
        } else {
            format!("{}/{}", self.module_name, dep)
        }
    }

    pub fn resolved_dependencies(&self) -> Vec<String> {
        self.depends_on
            .iter()
            .map(|d| self.resolve_dependency(d))
            .collect()
    }
}

/// Process-wide map from a trigger topic pattern to the actions declared
/// for it. Exact-string-keyed: `actions_for` looks up by equality, not by
/// pattern match (pattern matching is the Bus's concern, not this table's).
#[derive(Clone, Default)]
pub struct ActionRegistry {
    by_topic: std::sync::Arc<DashMap<String, Vec<Action>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` under `trigger_topic`. Rejects phases ≤ 0 (always
    /// invalid) and phases ≤ 50 for non-framework modules, and rejects a
    /// duplicate `(module_name, action_name)` pair under the same topic.
    pub fn register(
        &self,
        trigger_topic: &str,
        action: Action,
        is_framework_internal: bool,
    ) -> CoreResult<()> {
        if action.phase <= 0 {
            return Err(CoreError::InvalidRegistration {
                key: action.fq_id(),
                reason: "action phase must be > 0".to_string(),
            });
        }
        if action.phase <= 50 && !is_framework_internal {
            return Err(CoreError::InvalidRegistration {
                key: action.fq_id(),
                reason: "phases <= 50 are reserved for framework-internal components".to_string(),
            });
        }

        let mut entry = self.by_topic.entry(trigger_topic.to_string()).or_default();
        if entry
            .iter()
            .any(|a| a.module_name == action.module_name && a.action_name == action.action_name)
        {
            return Err(CoreError::DuplicateAction {
                fq_id: action.fq_id(),
            });
        }
        entry.push(action);
        Ok(())
    }

    /// Returns every action registered under the trigger topic exactly
    /// equal to `topic`.
    pub fn actions_for(&self, topic: &str) -> Vec<Action> {
        self.by_topic
            .get(topic)
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fq_id_and_dependency_resolution() {
        let action = Action::new("Cache", "warm").phase(50);
        assert_eq!(action.fq_id(), "Cache/warm");
        assert_eq!(action.resolve_dependency("warm"), "Cache/warm");
        assert_eq!(action.resolve_dependency("Other/x"), "Other/x");
    }

    #[test]
    fn actions_for_requires_exact_topic_match() {
        let registry = ActionRegistry::new();
        registry
            .register("/init", Action::new("Cache", "warm").phase(50), true)
            .unwrap();

        assert_eq!(registry.actions_for("/init").len(), 1);
        assert!(registry.actions_for("/init/extra").is_empty());
    }

    #[test]
    fn user_module_phase_below_51_is_rejected() {
        let registry = ActionRegistry::new();
        let err = registry
            .register("/init", Action::new("Cache", "warm").phase(10), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRegistration { .. }));
    }

    #[test]
    fn framework_internal_module_may_use_low_phases() {
        let registry = ActionRegistry::new();
        registry
            .register("/init", Action::new("Bootstrap", "load").phase(10), true)
            .unwrap();
        assert_eq!(registry.actions_for("/init").len(), 1);
    }

    #[test]
    fn duplicate_module_action_pair_is_rejected() {
        let registry = ActionRegistry::new();
        registry
            .register("/init", Action::new("Cache", "warm").phase(60), false)
            .unwrap();
        let err = registry
            .register("/init", Action::new("Cache", "warm").phase(70), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateAction { .. }));
    }

    #[test]
    fn zero_or_negative_phase_is_rejected() {
        let registry = ActionRegistry::new();
        let err = registry
            .register("/init", Action::new("Cache", "warm").phase(0), true)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRegistration { .. }));
    }
}

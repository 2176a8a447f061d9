//! `ConfigProvider` (§6.1): the external-interface trait `modkit` depends on
//! the *shape* of, implemented here against [`AppConfig`].

use crate::config::AppConfig;
use std::sync::Arc;

/// `get_namespace`/`get_config` surface a module sees, independent of how
/// the configuration was assembled.
pub trait ConfigProvider: Send + Sync {
    fn get_namespace(&self, namespace: &str) -> serde_json::Value;
}

/// `ConfigProvider` backed by a loaded [`AppConfig`].
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_namespace(&self, namespace: &str) -> serde_json::Value {
        self.0.get_namespace(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_delegates_to_app_config_namespace() {
        let mut config = AppConfig::default();
        config
            .namespaces
            .insert("cache".to_string(), serde_json::json!({ "ttl_sec": 30 }));

        let provider = AppConfigProvider::new(config);
        assert_eq!(provider.get_namespace("cache")["ttl_sec"], 30);
        assert_eq!(provider.get_namespace("missing"), serde_json::json!({}));
    }
}

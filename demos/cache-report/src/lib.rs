//! Worked example module pair exercising the init flow end to end: `Cache`
//! warms a value into the context's scratch `data` map, `Report` depends on
//! `Cache/warm` and renders a line from it. Registered declaratively via
//! `#[module]`/`#[init]`, the same way any other module in the host process
//! is — nothing here is special-cased by the framework.

use std::collections::HashMap;
use std::sync::Arc;

use modkit::{module, Context};
use parking_lot::Mutex;

/// Key under which `Cache::warm` stashes its value in `Context::data`.
pub const CACHE_VALUE_KEY: &str = "cache.value";

#[derive(Default)]
pub struct Cache;

#[module(name = "Cache")]
impl Cache {
    #[init(phase = 60)]
    async fn warm(&self, context: &Context, _params: &HashMap<String, String>) -> anyhow::Result<()> {
        tracing::info!("warming cache");
        context.set_data(CACHE_VALUE_KEY, Arc::new("warmed".to_string()));
        Ok(())
    }
}

/// Holds the last rendered report, so tests can read it back without
/// routing through `Context::data` downcasting themselves.
#[derive(Default)]
pub struct Report {
    rendered: Mutex<Option<String>>,
}

#[module(name = "Report")]
impl Report {
    #[init(phase = 100, depends_on = ["Cache/warm"])]
    async fn gen(&self, context: &Context, _params: &HashMap<String, String>) -> anyhow::Result<()> {
        let value = context
            .get_data(CACHE_VALUE_KEY)
            .and_then(|v| v.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "cold".to_string());
        let report = format!("report: {value}");
        tracing::info!(%report, "generated report");
        *self.rendered.lock() = Some(report);
        Ok(())
    }
}

impl Report {
    pub fn rendered(&self) -> Option<String> {
        self.rendered.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit::{Bus, Context, ContextKind, Module};

    #[tokio::test]
    async fn gen_reads_back_whatever_warm_stashed() {
        let bus = Bus::new();
        let actions = modkit::ActionRegistry::new();
        let ctx = Context::new(ContextKind::Init, "/init", bus, actions);

        let cache = Cache;
        cache
            .call_action("warm", &ctx, &HashMap::new())
            .await
            .unwrap();

        let report = Report::default();
        report.call_action("gen", &ctx, &HashMap::new()).await.unwrap();

        assert_eq!(report.rendered().as_deref(), Some("report: warmed"));
    }

    #[tokio::test]
    async fn gen_falls_back_to_cold_when_cache_never_ran() {
        let bus = Bus::new();
        let actions = modkit::ActionRegistry::new();
        let ctx = Context::new(ContextKind::Init, "/init", bus, actions);

        let report = Report::default();
        report.call_action("gen", &ctx, &HashMap::new()).await.unwrap();

        assert_eq!(report.rendered().as_deref(), Some("report: cold"));
    }
}

//! Module base (C6): the trait every independently-authored module
//! implements, plus the generic per-action execution wrapper so every
//! concrete module gets the wait-for-dependencies → invoke → publish
//! protocol from the same place instead of reimplementing it.
//!
//! Grounded on the teacher's `contracts.rs` trait shapes (`Module`,
//! `StatefulModule`, `async_trait` throughout), generalized from
//! REST/DB/gRPC capability traits down to the single action-hosting trait
//! this specification names.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{Bus, BusMessage};
use crate::context::Context;

/// A named host for actions. Implementors register their actions via
/// `#[module]`/`#[init]`/`#[request]` (see `modkit-macros`); this trait is
/// the runtime counterpart every generated `install` function wires up.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Invokes `action_name` against `context`, with `params` bound from the
    /// trigger topic (e.g. HTTP path segments). Implementations are
    /// generated by `#[request]`/`#[init]` method bodies; a hand-written
    /// `Module` dispatches here itself.
    async fn call_action(
        &self,
        action_name: &str,
        context: &Context,
        params: &std::collections::HashMap<String, String>,
    ) -> anyhow::Result<()>;
}

type ActionFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Subscribes `module` to `/context/execute/{module.name()}/{action_name}`,
/// implementing the five-step protocol from the per-action execution
/// section: skip if the context is already terminal, wait for declared
/// dependencies, skip again if the wait ended in a terminal context,
/// invoke, then report success or failure back onto the context.
pub fn install_action(
    bus: &Bus,
    module: Arc<dyn Module>,
    action_name: &str,
    depends_on: Vec<String>,
) -> crate::error::CoreResult<()> {
    let topic = format!("/context/execute/{}/{}", module.name(), action_name);
    let action_name = action_name.to_string();

    bus.subscribe(
        &topic,
        Arc::new(move |msg: BusMessage| -> ActionFuture<'static> {
            let module = module.clone();
            let action_name = action_name.clone();
            let depends_on = depends_on.clone();
            Box::pin(async move {
                let context = msg
                    .payload
                    .downcast_ref::<Context>()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("execute payload was not a Context"))?;

                if context.state().is_terminal() {
                    return Ok(());
                }

                if context.wait_for(&depends_on).await.is_err() {
                    return Ok(());
                }
                if context.state().is_terminal() {
                    return Ok(());
                }

                match module
                    .call_action(&action_name, &context, &msg.params)
                    .await
                {
                    Ok(()) => context.action_done(module.name(), &action_name),
                    Err(err) => context.action_error(module.name(), &action_name, err),
                }
                Ok(())
            })
        }),
    )?;

    Ok(())
}

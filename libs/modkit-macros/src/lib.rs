//! Proc-macros implementing the decorator-driven registration §9 asks for
//! in a target without decorators: `#[module(name = "...")]` on an `impl`
//! block scans its methods for `#[init]`/`#[request(path = "...")]`
//! markers and emits an `install(&Registry, &ActionRegistry, &Bus)`
//! function submitted via `inventory::submit!`, matching the shape the
//! teacher's own `#[module]`/`#[lifecycle]` macros already produce
//! (`syn`/`quote`, `Meta`/`Punctuated` attribute parsing).

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, Expr, ImplItem, ItemImpl, Lit, Meta, Token,
};

/// `#[module(name = "Cache")]` applied to `impl Cache { ... }`.
///
/// Scans the impl's methods for `#[init(...)]`/`#[request(path = "...")]`
/// markers, strips them, and emits:
/// - the impl block itself, with action markers removed,
/// - an `impl modkit::Module for Cache` dispatching by action name,
/// - an `install` function registering the module singleton and its
///   actions, submitted to the process-wide installer inventory.
#[proc_macro_attribute]
pub fn module(attr: TokenStream, item: TokenStream) -> TokenStream {
    let module_name = match parse_module_name(attr) {
        Ok(name) => name,
        Err(err) => return err.to_compile_error().into(),
    };

    let mut item_impl = parse_macro_input!(item as ItemImpl);
    let self_ty = item_impl.self_ty.clone();

    let mut actions = Vec::new();
    for impl_item in item_impl.items.iter_mut() {
        if let ImplItem::Fn(method) = impl_item {
            match extract_action(method) {
                Ok(Some(action)) => actions.push(ActionInfo {
                    method_ident: method.sig.ident.clone(),
                    ..action
                }),
                Ok(None) => {}
                Err(err) => return err.to_compile_error().into(),
            }
        }
    }

    let dispatch_arms = actions.iter().map(|a| {
        let method = &a.method_ident;
        let action_name = method.to_string();
        quote! {
            #action_name => ::std::result::Result::Ok(self.#method(context, params).await?),
        }
    });

    let register_calls = actions.iter().map(|a| {
        let method = &a.method_ident;
        let action_name = method.to_string();
        let phase = a.phase;
        let depends_on = &a.depends_on;
        let trigger = match &a.path {
            Some(path) => format!("/request/:requestId{path}"),
            None => "/init".to_string(),
        };
        quote! {
            actions.register(
                #trigger,
                ::modkit::Action::new(#module_name, #action_name)
                    .phase(#phase)
                    .depends_on([#(#depends_on),*]),
                false,
            )?;
            ::modkit::install_action(
                bus,
                (instance.clone() as ::std::sync::Arc<dyn ::modkit::Module>),
                #action_name,
                ::std::vec![#(#depends_on.to_string()),*],
            )?;
        }
    });

    let install_fn = format_ident!("__modkit_install_{}", module_name_ident(&module_name));

    let expanded = quote! {
        #item_impl

        #[::modkit::async_trait]
        impl ::modkit::Module for #self_ty {
            fn name(&self) -> &str {
                #module_name
            }

            async fn call_action(
                &self,
                action_name: &str,
                context: &::modkit::Context,
                params: &::std::collections::HashMap<::std::string::String, ::std::string::String>,
            ) -> ::anyhow::Result<()> {
                match action_name {
                    #(#dispatch_arms)*
                    other => ::anyhow::bail!("unknown action '{}' on module '{}'", other, #module_name),
                }
            }
        }

        fn #install_fn(
            registry: &::modkit::Registry,
            actions: &::modkit::ActionRegistry,
            bus: &::modkit::Bus,
        ) -> ::anyhow::Result<()> {
            let instance = ::std::sync::Arc::new(<#self_ty as ::std::default::Default>::default());
            registry.register_instance(
                instance.clone(),
                ::modkit::RegisterOptions::new()
                    .key(#module_name)
                    .tag("Module")
                    .phase(60),
            )?;
            #(#register_calls)*
            ::std::result::Result::Ok(())
        }

        ::modkit::inventory::submit! {
            ::modkit::ModuleInstaller(#install_fn)
        }
    };

    expanded.into()
}

struct ActionInfo {
    method_ident: syn::Ident,
    phase: i32,
    depends_on: Vec<String>,
    /// `Some(path)` for `#[request(path = "...")]`; `None` for `#[init]`.
    path: Option<String>,
}

fn module_name_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn parse_module_name(attr: TokenStream) -> syn::Result<String> {
    struct ModuleArgs {
        name: String,
    }
    impl Parse for ModuleArgs {
        fn parse(input: ParseStream) -> syn::Result<Self> {
            let metas = Punctuated::<Meta, Token![,]>::parse_terminated(input)?;
            let mut name = None;
            for meta in metas {
                if let Meta::NameValue(nv) = &meta {
                    if nv.path.is_ident("name") {
                        if let Expr::Lit(expr_lit) = &nv.value {
                            if let Lit::Str(s) = &expr_lit.lit {
                                name = Some(s.value());
                            }
                        }
                    }
                }
            }
            let name = name.ok_or_else(|| {
                syn::Error::new(input.span(), "#[module(...)] requires `name = \"...\"`")
            })?;
            Ok(ModuleArgs { name })
        }
    }

    let args = syn::parse::<ModuleArgs>(attr)?;
    Ok(args.name)
}

/// Reads `#[init(...)]` or `#[request(path = "...", ...)]` off `method`,
/// removes it, and returns the parsed action descriptor. `Ok(None)` if
/// neither marker is present.
fn extract_action(method: &mut syn::ImplItemFn) -> syn::Result<Option<ActionInfo>> {
    let marker_pos = method
        .attrs
        .iter()
        .position(|a| a.path().is_ident("init") || a.path().is_ident("request"));

    let Some(pos) = marker_pos else {
        return Ok(None);
    };

    let attr = method.attrs.remove(pos);
    let is_request = attr.path().is_ident("request");

    let mut phase: i32 = 100;
    let mut depends_on: Vec<String> = Vec::new();
    let mut path: Option<String> = None;

    if let Meta::List(list) = &attr.meta {
        let args: Punctuated<Meta, Token![,]> =
            list.parse_args_with(Punctuated::parse_terminated)?;
        for meta in args {
            let Meta::NameValue(nv) = &meta else {
                continue;
            };
            if nv.path.is_ident("phase") {
                if let Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Int(i) = &expr_lit.lit {
                        phase = i.base10_parse()?;
                    }
                }
            } else if nv.path.is_ident("path") {
                if let Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        path = Some(s.value());
                    }
                }
            } else if nv.path.is_ident("depends_on") {
                if let Expr::Array(arr) = &nv.value {
                    for elem in &arr.elems {
                        if let Expr::Lit(expr_lit) = elem {
                            if let Lit::Str(s) = &expr_lit.lit {
                                depends_on.push(s.value());
                            }
                        }
                    }
                }
            }
        }
    }

    if is_request && path.is_none() {
        path = Some("/*".to_string());
    }

    Ok(Some(ActionInfo {
        method_ident: method.sig.ident.clone(),
        phase,
        depends_on,
        path,
    }))
}

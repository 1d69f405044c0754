//! Plugin Macros - Attribute surface for agent plugins and actor interfaces
//!
//! - `#[agent_plugin]` on an impl block generates the plugin contract, the
//!   routing table and name-based dispatch from `#[agent_method]` and
//!   `#[event_handler]` markers.
//! - `#[agent_interface]` on a trait generates an interface descriptor and an
//!   adapter type that forwards every method to a `MethodTarget`.
//!
//! Generated code refers to `::plugin_types`, so the annotated crate must
//! depend on it.

use std::collections::HashSet;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    Attribute, Expr, FnArg, ImplItem, ItemImpl, ItemTrait, Lit, LitStr, Meta, Pat, ReturnType,
    Signature, Token, TraitItem, Type,
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
};

// ─────────────────────────────────────────────────────────────────────────────
// Attribute Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed attributes for `#[agent_plugin]`
struct PluginAttrs {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    capabilities: Vec<(String, Lit)>,
}

impl Parse for PluginAttrs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut attrs = PluginAttrs {
            name: None,
            version: None,
            description: None,
            capabilities: Vec::new(),
        };

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;

            match ident.to_string().as_str() {
                "name" => attrs.name = Some(parse_str_value(input)?),
                "version" => attrs.version = Some(parse_str_value(input)?),
                "description" => attrs.description = Some(parse_str_value(input)?),
                "capabilities" => {
                    let content;
                    syn::parenthesized!(content in input);
                    while !content.is_empty() {
                        let key: syn::Ident = content.parse()?;
                        content.parse::<Token![=]>()?;
                        let value: Lit = content.parse()?;
                        attrs.capabilities.push((key.to_string(), value));
                        if content.peek(Token![,]) {
                            content.parse::<Token![,]>()?;
                        }
                    }
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", ident),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(attrs)
    }
}

/// Parsed attributes for `#[agent_method]`
#[derive(Default)]
struct MethodAttrs {
    name: Option<String>,
    read_only: bool,
    always_interleave: bool,
    one_way: bool,
}

impl Parse for MethodAttrs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut attrs = MethodAttrs::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;

            match ident.to_string().as_str() {
                "name" => attrs.name = Some(parse_str_value(input)?),
                "read_only" => attrs.read_only = parse_flag(input)?,
                "always_interleave" => attrs.always_interleave = parse_flag(input)?,
                "one_way" => attrs.one_way = parse_flag(input)?,
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", ident),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(attrs)
    }
}

/// `= "value"`
fn parse_str_value(input: ParseStream) -> syn::Result<String> {
    input.parse::<Token![=]>()?;
    let lit: LitStr = input.parse()?;
    Ok(lit.value())
}

/// Either a bare flag or `= true|false`
fn parse_flag(input: ParseStream) -> syn::Result<bool> {
    if !input.peek(Token![=]) {
        return Ok(true);
    }
    input.parse::<Token![=]>()?;
    let lit: Lit = input.parse()?;
    match lit {
        Lit::Bool(b) => Ok(b.value()),
        other => Err(syn::Error::new(other.span(), "expected `true` or `false`")),
    }
}

fn parse_method_attrs(attr: &Attribute) -> syn::Result<MethodAttrs> {
    match &attr.meta {
        Meta::Path(_) => Ok(MethodAttrs::default()),
        Meta::List(_) => attr.parse_args::<MethodAttrs>(),
        Meta::NameValue(nv) => Err(syn::Error::new(
            nv.span(),
            "expected #[agent_method] or #[agent_method(...)]",
        )),
    }
}

/// `None` for the generic handler, `Some(type)` for a specific event type
fn parse_event_handler(attr: &Attribute) -> syn::Result<Option<String>> {
    match &attr.meta {
        Meta::Path(_) => Ok(None),
        Meta::List(_) => {
            let lit: LitStr = attr.parse_args()?;
            Ok(Some(lit.value()))
        }
        Meta::NameValue(nv) => Err(syn::Error::new(
            nv.span(),
            "expected #[event_handler] or #[event_handler(\"EventType\")]",
        )),
    }
}

/// Extract doc comments from attributes
fn extract_doc_comment(attrs: &[Attribute]) -> Option<String> {
    let docs: Vec<String> = attrs
        .iter()
        .filter_map(|attr| {
            if attr.path().is_ident("doc") {
                if let Meta::NameValue(meta) = &attr.meta {
                    if let Expr::Lit(expr_lit) = &meta.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Some(s.value().trim().to_string());
                        }
                    }
                }
            }
            None
        })
        .collect();

    if docs.is_empty() {
        None
    } else {
        Some(docs.join("\n"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signature Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Map a Rust type to its `ValueKind` and the type name as written
fn rust_type_to_value_kind(ty: &Type) -> (String, TokenStream2) {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    let kind = match type_str.as_str() {
        "()" => "Unit",
        "bool" => "Bool",
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" => "Integer",
        "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => "Unsigned",
        "f32" | "f64" => "Float",
        "String" | "char" => "String",
        s if s.starts_with("Option<") => "Optional",
        s if s.starts_with("Vec<") || s.starts_with('[') => "Sequence",
        _ => "Json",
    };

    let kind = format_ident!("{}", kind);
    (type_str, quote! { ::plugin_types::ValueKind::#kind })
}

fn type_info_tokens(ty: &Type) -> TokenStream2 {
    let (name, kind) = rust_type_to_value_kind(ty);
    quote! { ::plugin_types::TypeInfo::new(#name, #kind) }
}

/// `T` out of `Result<T, E>` / `PluginResult<T>`
fn result_inner_type(output: &ReturnType) -> Option<Type> {
    let ReturnType::Type(_, ty) = output else {
        return None;
    };
    let Type::Path(type_path) = &**ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" && segment.ident != "PluginResult" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner.clone()),
        _ => None,
    }
}

/// Validate an async `&self` method and return its typed parameters and result type
fn inspect_signature(sig: &Signature, what: &str) -> syn::Result<(Vec<(syn::Ident, Type)>, Type)> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span(),
            format!("{} must be `async`", what),
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            format!("{} cannot be generic", what),
        ));
    }

    match sig.inputs.first() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new(
                sig.ident.span(),
                format!("{} must take `&self`", what),
            ));
        }
    }

    let mut params = Vec::new();
    for input in sig.inputs.iter().skip(1) {
        match input {
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(ident) => params.push((ident.ident.clone(), (*pat_type.ty).clone())),
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        "parameters must be plain identifiers",
                    ));
                }
            },
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new(receiver.span(), "unexpected receiver"));
            }
        }
    }

    let output = result_inner_type(&sig.output).ok_or_else(|| {
        syn::Error::new(
            sig.output.span(),
            format!("{} must return `PluginResult<T>`", what),
        )
    })?;

    Ok((params, output))
}

fn is_agent_event(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|s| s.ident == "AgentEvent"),
        _ => false,
    }
}

fn hints_tokens(read_only: bool, always_interleave: bool, one_way: bool) -> TokenStream2 {
    quote! {
        ::plugin_types::SchedulingHints {
            read_only: #read_only,
            always_interleave: #always_interleave,
            one_way: #one_way,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// #[agent_plugin]
// ─────────────────────────────────────────────────────────────────────────────

struct RouteDef {
    name: String,
    handler: syn::Ident,
    params: Vec<(syn::Ident, Type)>,
    output: Type,
    attrs: MethodAttrs,
}

struct EventHandlerDef {
    handler: syn::Ident,
    param: Option<Type>,
}

/// Attribute macro turning an impl block into an agent plugin.
///
/// # Attributes
///
/// - `name` (optional): Plugin name (defaults to the type name)
/// - `version` (optional): Plugin version
/// - `description` (optional): Description (defaults to the impl block's doc comment)
/// - `capabilities(key = literal, ...)` (optional): Capability metadata
///
/// # Method markers
///
/// - `#[agent_method(name = "...", read_only, always_interleave, one_way)]`
/// - `#[event_handler("EventType")]` for a specific event type
/// - `#[event_handler]` for the single generic fallback handler
///
/// Marked methods must be `async`, take `&self` and return `PluginResult<T>`.
/// Parameters are deserialized positionally from JSON. An event handler takes
/// either the `AgentEvent` itself or a type deserialized from its data.
///
/// # Example
///
/// ```ignore
/// /// Weather lookups.
/// #[agent_plugin(name = "Weather", version = "1.0")]
/// impl WeatherPlugin {
///     #[agent_method(read_only)]
///     async fn forecast(&self, city: String) -> PluginResult<String> { ... }
///
///     #[event_handler("CityAdded")]
///     async fn on_city(&self, city: String) -> PluginResult<()> { ... }
/// }
///
/// impl PluginLifecycle for WeatherPlugin {}
/// ```
///
/// This generates `impl PluginType` and `impl AgentPlugin` for the type.
#[proc_macro_attribute]
pub fn agent_plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = parse_macro_input!(attr as PluginAttrs);
    let mut input = parse_macro_input!(item as ItemImpl);

    match expand_agent_plugin(attrs, &mut input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_agent_plugin(attrs: PluginAttrs, input: &mut ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[agent_plugin] must be applied to an inherent impl block",
        ));
    }
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "generic plugin types are not supported",
        ));
    }

    let type_ident = match &*input.self_ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map(|s| s.ident.clone())
            .ok_or_else(|| syn::Error::new(type_path.span(), "expected a type name"))?,
        other => return Err(syn::Error::new(other.span(), "expected a type name")),
    };

    let mut routes: Vec<RouteDef> = Vec::new();
    let mut route_keys: HashSet<String> = HashSet::new();
    let mut specific_handlers: Vec<(String, EventHandlerDef)> = Vec::new();
    let mut generic_handler: Option<EventHandlerDef> = None;

    for item in input.items.iter_mut() {
        let ImplItem::Fn(method) = item else {
            continue;
        };

        let mut method_attrs = None;
        let mut event_types = Vec::new();
        let mut is_generic_handler = false;
        let mut kept = Vec::new();

        for attr in std::mem::take(&mut method.attrs) {
            if attr.path().is_ident("agent_method") {
                method_attrs = Some(parse_method_attrs(&attr)?);
            } else if attr.path().is_ident("event_handler") {
                match parse_event_handler(&attr)? {
                    Some(event_type) => event_types.push((event_type, attr.span())),
                    None => is_generic_handler = true,
                }
            } else {
                kept.push(attr);
            }
        }
        method.attrs = kept;

        if let Some(method_attrs) = method_attrs {
            let (params, output) = inspect_signature(&method.sig, "an #[agent_method]")?;
            let handler = method.sig.ident.clone();
            let name = method_attrs
                .name
                .clone()
                .unwrap_or_else(|| handler.to_string());

            let mut keys = vec![name.clone()];
            if handler != name {
                keys.push(handler.to_string());
            }
            for key in keys {
                if !route_keys.insert(key.clone()) {
                    return Err(syn::Error::new(
                        method.sig.ident.span(),
                        format!("routing name `{}` is already used", key),
                    ));
                }
            }

            routes.push(RouteDef {
                name,
                handler,
                params,
                output,
                attrs: method_attrs,
            });
        }

        if is_generic_handler || !event_types.is_empty() {
            let (params, _) = inspect_signature(&method.sig, "an #[event_handler]")?;
            if params.len() > 1 {
                return Err(syn::Error::new(
                    method.sig.inputs.span(),
                    "an #[event_handler] takes at most one parameter",
                ));
            }
            let param = params.into_iter().next().map(|(_, ty)| ty);

            for (event_type, span) in event_types {
                if specific_handlers.iter().any(|(t, _)| *t == event_type) {
                    return Err(syn::Error::new(
                        span,
                        format!("duplicate handler for event type `{}`", event_type),
                    ));
                }
                specific_handlers.push((
                    event_type,
                    EventHandlerDef {
                        handler: method.sig.ident.clone(),
                        param: param.clone(),
                    },
                ));
            }

            if is_generic_handler {
                if generic_handler.is_some() {
                    return Err(syn::Error::new(
                        method.sig.ident.span(),
                        "only one generic #[event_handler] is allowed",
                    ));
                }
                generic_handler = Some(EventHandlerDef {
                    handler: method.sig.ident.clone(),
                    param,
                });
            }
        }
    }

    // Descriptor
    let plugin_name = attrs.name.unwrap_or_else(|| type_ident.to_string());
    let description = attrs
        .description
        .or_else(|| extract_doc_comment(&input.attrs))
        .unwrap_or_default();
    let version_call = match &attrs.version {
        Some(v) => quote! { .with_version(#v) },
        None => quote! {},
    };
    let capability_calls = attrs.capabilities.iter().map(|(key, value)| {
        quote! { .with_capability(#key, ::plugin_types::serde_json::Value::from(#value)) }
    });
    let type_name_str = type_ident.to_string();

    // Routing table
    let route_infos = routes.iter().map(|route| {
        let name = &route.name;
        let handler = route.handler.to_string();
        let return_type = type_info_tokens(&route.output);
        let parameter_types = route.params.iter().map(|(_, ty)| type_info_tokens(ty));
        let read_only = route.attrs.read_only;
        let always_interleave = route.attrs.always_interleave;
        let one_way = route.attrs.one_way;
        quote! {
            ::plugin_types::MethodRoutingInfo {
                method_name: #name.to_string(),
                handler_name: #handler.to_string(),
                return_type: #return_type,
                parameter_types: ::std::vec![#(#parameter_types),*],
                is_read_only: #read_only,
                always_interleave: #always_interleave,
                one_way: #one_way,
            }
        }
    });

    // Method dispatch
    let dispatch_arms = routes.iter().map(|route| {
        let name = &route.name;
        let handler = &route.handler;
        let handler_str = handler.to_string();
        let pattern = if handler_str == *name {
            quote! { #name }
        } else {
            quote! { #name | #handler_str }
        };
        let count = route.params.len();
        let bindings = route.params.iter().map(|(ident, ty)| {
            quote! {
                let #ident: #ty =
                    ::plugin_types::coerce_value(__params.next().unwrap_or_default())?;
            }
        });
        let args = route.params.iter().map(|(ident, _)| ident);

        quote! {
            #pattern => {
                if params.len() != #count {
                    return Err(::plugin_types::PluginError::ParameterMismatch {
                        method: method_name.to_string(),
                        expected: #count,
                        actual: params.len(),
                    });
                }
                #[allow(unused_mut, unused_variables)]
                let mut __params = params.into_iter();
                #(#bindings)*
                let __result = self.#handler(#(#args),*).await?;
                ::plugin_types::to_value(&__result)
            }
        }
    });

    // Event dispatch
    let event_call = |def: &EventHandlerDef| {
        let handler = &def.handler;
        match &def.param {
            None => quote! { self.#handler().await },
            Some(ty) if is_agent_event(ty) => quote! { self.#handler(event).await },
            Some(ty) => quote! {
                self.#handler(::plugin_types::coerce_value::<#ty>(event.data)?).await
            },
        }
    };
    let event_arms = specific_handlers.iter().map(|(event_type, def)| {
        let call = event_call(def);
        quote! { #event_type => #call, }
    });
    let fallback = match &generic_handler {
        Some(def) => event_call(def),
        None => quote! {
            <Self as ::plugin_types::PluginLifecycle>::on_unhandled_event(self, event).await
        },
    };

    let self_ty = &input.self_ty;

    Ok(quote! {
        #input

        impl ::plugin_types::PluginType for #self_ty {
            const TYPE_NAME: &'static str = concat!(module_path!(), "::", #type_name_str);

            fn plugin_descriptor() -> ::plugin_types::PluginDescriptor {
                ::plugin_types::PluginDescriptor::new(#plugin_name)
                    #version_call
                    .with_description(#description)
                    #(#capability_calls)*
            }
        }

        #[::plugin_types::async_trait]
        impl ::plugin_types::AgentPlugin for #self_ty {
            fn descriptor(&self) -> ::plugin_types::PluginDescriptor {
                <Self as ::plugin_types::PluginType>::plugin_descriptor()
            }

            fn type_name(&self) -> &'static str {
                <Self as ::plugin_types::PluginType>::TYPE_NAME
            }

            fn routes(&self) -> ::std::vec::Vec<::plugin_types::MethodRoutingInfo> {
                ::std::vec![#(#route_infos),*]
            }

            async fn initialize(
                &self,
                context: ::std::sync::Arc<dyn ::plugin_types::AgentContext>,
            ) -> ::plugin_types::PluginResult<()> {
                <Self as ::plugin_types::PluginLifecycle>::on_initialize(self, context).await
            }

            async fn execute_method(
                &self,
                method_name: &str,
                params: ::std::vec::Vec<::plugin_types::serde_json::Value>,
            ) -> ::plugin_types::PluginResult<::plugin_types::serde_json::Value> {
                match method_name {
                    #(#dispatch_arms)*
                    _ => Err(::plugin_types::PluginError::MethodNotFound(method_name.to_string())),
                }
            }

            async fn handle_event(
                &self,
                event: ::plugin_types::AgentEvent,
            ) -> ::plugin_types::PluginResult<()> {
                let __event_type = event.event_type.clone();
                match __event_type.as_str() {
                    #(#event_arms)*
                    _ => #fallback,
                }
            }

            async fn get_state(
                &self,
            ) -> ::plugin_types::PluginResult<
                ::std::option::Option<::plugin_types::serde_json::Value>,
            > {
                <Self as ::plugin_types::PluginLifecycle>::state(self).await
            }

            async fn set_state(
                &self,
                state: ::std::option::Option<::plugin_types::serde_json::Value>,
            ) -> ::plugin_types::PluginResult<()> {
                <Self as ::plugin_types::PluginLifecycle>::restore_state(self, state).await
            }

            async fn dispose(&self) -> ::plugin_types::PluginResult<()> {
                <Self as ::plugin_types::PluginLifecycle>::on_dispose(self).await
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// #[agent_interface]
// ─────────────────────────────────────────────────────────────────────────────

struct InterfaceMethodDef {
    ident: syn::Ident,
    routing_name: String,
    params: Vec<(syn::Ident, Type)>,
    output: Type,
    sig: Signature,
    read_only: bool,
    always_interleave: bool,
    one_way: bool,
}

/// Attribute macro describing a target actor interface.
///
/// Place it above the trait (and above `#[async_trait]` when present; it is
/// added automatically otherwise). Methods must be `async`, take `&self` and
/// return `PluginResult<T>`.
///
/// # Method markers
///
/// - `#[read_only]`, `#[always_interleave]`, `#[one_way]`
/// - `#[method(name = "...")]` to forward under a different routing name
///
/// This generates:
/// - `<Trait>Adapter`, implementing the trait by forwarding to a `MethodTarget`
/// - `impl ActorInterface for dyn <Trait>`
#[proc_macro_attribute]
pub fn agent_interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            Span::call_site(),
            "#[agent_interface] takes no arguments",
        )
        .to_compile_error()
        .into();
    }
    let mut input = parse_macro_input!(item as ItemTrait);

    match expand_agent_interface(&mut input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn parse_method_name(attr: &Attribute) -> syn::Result<String> {
    attr.parse_args_with(|input: ParseStream| {
        let ident: syn::Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(ident.span(), "expected `name = \"...\"`"));
        }
        parse_str_value(input)
    })
}

fn expand_agent_interface(input: &mut ItemTrait) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "generic interfaces are not supported",
        ));
    }

    let mut methods = Vec::new();

    for item in input.items.iter_mut() {
        let TraitItem::Fn(method) = item else {
            return Err(syn::Error::new(
                item.span(),
                "#[agent_interface] traits may only contain methods",
            ));
        };

        let mut routing_name = None;
        let mut read_only = false;
        let mut always_interleave = false;
        let mut one_way = false;
        let mut kept = Vec::new();

        for attr in std::mem::take(&mut method.attrs) {
            if attr.path().is_ident("read_only") {
                read_only = true;
            } else if attr.path().is_ident("always_interleave") {
                always_interleave = true;
            } else if attr.path().is_ident("one_way") {
                one_way = true;
            } else if attr.path().is_ident("method") {
                routing_name = Some(parse_method_name(&attr)?);
            } else {
                kept.push(attr);
            }
        }
        method.attrs = kept;

        let (params, output) = inspect_signature(&method.sig, "an interface method")
            .map_err(|e| {
                if method.sig.asyncness.is_none() {
                    syn::Error::new(
                        method.sig.ident.span(),
                        "interface methods must be `async`; \
                         place #[agent_interface] above #[async_trait]",
                    )
                } else {
                    e
                }
            })?;

        methods.push(InterfaceMethodDef {
            ident: method.sig.ident.clone(),
            routing_name: routing_name.unwrap_or_else(|| method.sig.ident.to_string()),
            params,
            output,
            sig: method.sig.clone(),
            read_only,
            always_interleave,
            one_way,
        });
    }

    let has_async_trait = input.attrs.iter().any(|attr| {
        attr.path()
            .segments
            .last()
            .is_some_and(|s| s.ident == "async_trait")
    });
    let async_trait_attr = if has_async_trait {
        quote! {}
    } else {
        quote! { #[::plugin_types::async_trait] }
    };

    let trait_ident = &input.ident;
    let trait_name = trait_ident.to_string();
    let vis = &input.vis;
    let adapter_ident = format_ident!("{}Adapter", trait_ident);

    let method_descriptors = methods.iter().map(|m| {
        let name = &m.routing_name;
        let rust_name = m.ident.to_string();
        let hints = hints_tokens(m.read_only, m.always_interleave, m.one_way);
        let parameter_types = m.params.iter().map(|(_, ty)| type_info_tokens(ty));
        let return_type = type_info_tokens(&m.output);
        quote! {
            ::plugin_types::InterfaceMethod {
                name: #name.to_string(),
                rust_name: #rust_name.to_string(),
                hints: #hints,
                parameter_types: ::std::vec![#(#parameter_types),*],
                return_type: #return_type,
            }
        }
    });

    let adapter_methods = methods.iter().map(|m| {
        let sig = &m.sig;
        let routing_name = &m.routing_name;
        let args = m.params.iter().map(|(ident, _)| {
            quote! { ::plugin_types::to_value(&#ident)? }
        });
        quote! {
            #sig {
                let __args: ::std::vec::Vec<::plugin_types::serde_json::Value> =
                    ::std::vec![#(#args),*];
                let __value = ::plugin_types::MethodTarget::invoke(
                    &*self.target,
                    #routing_name,
                    __args,
                )
                .await?;
                ::plugin_types::coerce_value(__value).map_err(::core::convert::Into::into)
            }
        }
    });

    Ok(quote! {
        #async_trait_attr
        #input

        /// Adapter forwarding every interface method to a method target
        #vis struct #adapter_ident {
            target: ::std::sync::Arc<dyn ::plugin_types::MethodTarget>,
        }

        impl #adapter_ident {
            pub fn new(target: ::std::sync::Arc<dyn ::plugin_types::MethodTarget>) -> Self {
                Self { target }
            }

            pub fn target(&self) -> &::std::sync::Arc<dyn ::plugin_types::MethodTarget> {
                &self.target
            }
        }

        #[::plugin_types::async_trait]
        impl #trait_ident for #adapter_ident {
            #(#adapter_methods)*
        }

        impl ::plugin_types::ActorInterface for dyn #trait_ident {
            fn descriptor() -> ::plugin_types::InterfaceDescriptor {
                ::plugin_types::InterfaceDescriptor {
                    name: #trait_name.to_string(),
                    methods: ::std::vec![#(#method_descriptors),*],
                }
            }

            fn bind(
                target: ::std::sync::Arc<dyn ::plugin_types::MethodTarget>,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new(#adapter_ident { target })
            }
        }
    })
}

//! Procedural macros shared by the `keel` crate.
//!
//! Two attributes are provided: [`macro@keel_error`] for operation error enums
//! and [`macro@keel_export`] for UniFFI-exported impl blocks with automatic
//! logging context.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, ImplItem, ImplItemFn, ItemImpl, Stmt,
    Variant, Visibility,
};

/// Attribute macro for keel's operation error enums.
///
/// Applied to an enum, it:
/// 1. Derives `Debug`, `thiserror::Error` and `uniffi::Error`, marking the enum
///    as a `flat_error` so foreign bindings receive the display string.
/// 2. Appends a `Generic { message: String }` variant when the enum does not
///    already declare one.
/// 3. Implements `From<anyhow::Error>`, flattening the whole error chain into
///    the `Generic` variant's message.
///
/// # Usage
///
/// ```rust,ignore
/// #[keel_error]
/// pub enum RotationError {
///     #[error("no account is set")]
///     NoAccount,
/// }
/// ```
#[proc_macro_attribute]
pub fn keel_error(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(
            &input,
            "keel_error can only be applied to enums",
        )
        .to_compile_error()
        .into();
    };

    let enum_name = &input.ident;
    let visibility = &input.vis;
    let generics = &input.generics;

    // Drop pre-existing derive/uniffi attributes so the ones added below do
    // not conflict with them.
    let attrs: Vec<_> = input
        .attrs
        .iter()
        .filter(|attr| {
            !attr.path().is_ident("derive") && !attr.path().is_ident("uniffi")
        })
        .collect();

    let mut variants = data_enum.variants.clone();

    let has_generic = variants.iter().any(|variant| variant.ident == "Generic");
    if !has_generic {
        let generic_variant: Variant = syn::parse_quote! {
            /// Catch-all variant wrapping an `anyhow` error chain.
            #[error("Generic error: {message}")]
            Generic {
                /// The flattened message of the wrapped error chain.
                message: String
            }
        };
        variants.push(generic_variant);
    }

    let expanded = quote! {
        #[derive(Debug, thiserror::Error, uniffi::Error)]
        #[uniffi(flat_error)]
        #(#attrs)*
        #visibility enum #enum_name #generics {
            #variants
        }

        impl #generics From<anyhow::Error> for #enum_name #generics {
            fn from(err: anyhow::Error) -> Self {
                let mut message = err.to_string();
                let chain: Vec<String> =
                    err.chain().skip(1).map(|cause| cause.to_string()).collect();
                if !chain.is_empty() {
                    message.push_str(" (caused by: ");
                    message.push_str(&chain.join(" -> "));
                    message.push(')');
                }
                Self::Generic { message }
            }
        }
    };

    TokenStream::from(expanded)
}

/// Attribute macro wrapping `#[uniffi::export]` for keel impl blocks.
///
/// Every public method in the impl block gets a
/// `crate::logger::LogContext` scope guard injected as its first statement, so
/// log lines emitted through keel's logging macros are prefixed with the type
/// name. When the block contains at least one public async method,
/// `async_runtime = "tokio"` is added to the generated `uniffi::export`
/// attribute.
#[proc_macro_attribute]
pub fn keel_export(args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);

    let type_name = match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map_or_else(|| "Unknown".to_string(), |seg| seg.ident.to_string()),
        _ => "Unknown".to_string(),
    };

    let has_public_async = impl_has_public_async(&input_impl.items);

    let items: Vec<ImplItem> = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method) if matches!(method.vis, Visibility::Public(_)) => {
                let mut method = method.clone();
                inject_log_context(&mut method, &type_name);
                ImplItem::Fn(method)
            }
            other => other.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items,
        ..input_impl
    };

    let mut args = proc_macro2::TokenStream::from(args);
    if has_public_async {
        args = if args.is_empty() {
            quote! { async_runtime = "tokio" }
        } else {
            quote! { #args, async_runtime = "tokio" }
        };
    }

    quote! {
        #[uniffi::export(#args)]
        #new_impl
    }
    .into()
}

fn impl_has_public_async(items: &[ImplItem]) -> bool {
    items.iter().any(|item| {
        matches!(
            item,
            ImplItem::Fn(method)
                if matches!(method.vis, Visibility::Public(_))
                    && method.sig.asyncness.is_some()
        )
    })
}

fn inject_log_context(method: &mut ImplItemFn, type_name: &str) {
    let guard: Stmt = syn::parse_quote! {
        let _keel_log_ctx = crate::logger::LogContext::new(#type_name);
    };
    method.block.stmts.insert(0, guard);
}

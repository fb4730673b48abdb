//! Proc macro entry point for the broker's command handlers.
//!
//! # Why
//! - Sinks the boilerplate of wrapping an `async fn` into a
//!   [`pimd_dispatch::HandlerFn`]-shaped function pointer down to compile
//!   time, so a handler reads like ordinary async code;
//! - Keeps every generated wrapper assembled the same way, so the
//!   `VerbTable` registration in `pimd-server` never needs a hand-written
//!   boxing shim per verb.
//!
//! # How
//! - Write the handler as `async fn name(ctx: &mut Ctx, cmd: CommandLine)
//!   -> Result<Resp, Err>` and attach `#[handler]`;
//! - The macro renames the original function to a hidden logic function
//!   and emits a public function of the original name and signature
//!   `fn(&mut Ctx, CommandLine) -> BoxedHandlerFuture<'_, Resp, Err>`,
//!   which is exactly the shape `pimd_dispatch::VerbTable::register`
//!   expects.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    Error, FnArg, GenericArgument, ItemFn, PatType, PathArguments, ReturnType, Type,
    parse_macro_input, parse_quote, spanned::Spanned,
};

/// Converts `async fn(ctx: &mut Ctx, cmd: CommandLine) -> Result<Resp, Err>`
/// into a plain function matching `pimd_dispatch::HandlerFn<Ctx, Resp, Err>`.
///
/// # What
/// - **Input**: a non-generic `async fn` taking exactly two arguments, a
///   mutable context reference and a command value.
/// - **Output**: the original body under a hidden name, plus a public
///   wrapper of the original name that boxes the call into a
///   `Pin<Box<dyn Future<...> + Send + '_>>`.
/// - **Precondition**: the return type must be `Result<Response, Error>`.
#[proc_macro_attribute]
pub fn handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return Error::new(proc_macro2::Span::call_site(), "#[handler] takes no arguments")
            .to_compile_error()
            .into();
    }

    let func = parse_macro_input!(item as ItemFn);
    expand_handler(func)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_handler(func: ItemFn) -> Result<proc_macro2::TokenStream, Error> {
    if func.sig.asyncness.is_none() {
        return Err(Error::new(func.sig.span(), "#[handler] only supports async fn"));
    }

    if !func.sig.generics.params.is_empty() {
        return Err(Error::new(
            func.sig.generics.span(),
            "#[handler] does not support generic functions",
        ));
    }

    let mut inputs = func.sig.inputs.iter();
    let ctx_arg = match inputs.next() {
        Some(FnArg::Typed(pat)) => pat,
        _ => {
            return Err(Error::new(
                func.sig.inputs.span(),
                "#[handler] expects its first argument to be the connection context",
            ));
        }
    };
    let cmd_arg = match inputs.next() {
        Some(FnArg::Typed(pat)) => pat,
        _ => {
            return Err(Error::new(
                func.sig.inputs.span(),
                "#[handler] expects its second argument to be the command line",
            ));
        }
    };

    if inputs.next().is_some() {
        return Err(Error::new(
            func.sig.inputs.span(),
            "#[handler] only supports two arguments: context and command line",
        ));
    }

    let ctx_ty = extract_context_type(ctx_arg)?;
    let cmd_ty = extract_type(cmd_arg)?;
    let (response_ty, error_ty) = extract_result_types(&func.sig)?;

    let fn_ident = func.sig.ident.clone();
    let logic_ident = format_ident!("__pimd_handler_logic_{}", fn_ident);
    let audit_ident = format_ident!("__pimd_handler_audit_{}", fn_ident);
    let attrs = func.attrs.clone();
    let vis = func.vis.clone();

    let mut logic_fn = func.clone();
    logic_fn.attrs.clear();
    logic_fn.attrs.push(parse_quote!(#[doc(hidden)]));
    logic_fn.sig.ident = logic_ident.clone();

    let expanded = quote! {
        #logic_fn

        #(#attrs)*
        #vis fn #fn_ident<'a>(
            ctx: &'a mut #ctx_ty,
            cmd: #cmd_ty,
        ) -> ::pimd_dispatch::BoxedHandlerFuture<'a, #response_ty, #error_ty> {
            ::std::boxed::Box::pin(#logic_ident(ctx, cmd))
        }

        #[cfg(test)]
        #[allow(dead_code)]
        fn #audit_ident() {
            fn assert_logic_contract<F, Fut>(_: &F)
            where
                F: Fn(&mut #ctx_ty, #cmd_ty) -> Fut + Send + Sync + 'static,
                Fut: core::future::Future<Output = core::result::Result<#response_ty, #error_ty>> + Send,
            {
            }

            fn assert_handler_contract<Ctx, Resp, Err>(_: ::pimd_dispatch::HandlerFn<Ctx, Resp, Err>) {}

            let logic = #logic_ident;
            assert_logic_contract(&logic);
            assert_handler_contract::<#ctx_ty, #response_ty, #error_ty>(#fn_ident);
        }
    };

    Ok(expanded)
}

fn extract_type(arg: &PatType) -> Result<&Type, Error> {
    Ok(&arg.ty)
}

/// The context argument is declared as `&mut Ctx`; the generated wrapper
/// needs the bare `Ctx` to restate the reference with its own lifetime.
fn extract_context_type(arg: &PatType) -> Result<&Type, Error> {
    match arg.ty.as_ref() {
        Type::Reference(reference) if reference.mutability.is_some() => Ok(reference.elem.as_ref()),
        _ => Err(Error::new(
            arg.ty.span(),
            "#[handler] expects the context argument to be taken as `&mut Ctx`",
        )),
    }
}

fn extract_result_types(sig: &syn::Signature) -> Result<(&Type, &Type), Error> {
    match &sig.output {
        ReturnType::Type(_, ty) => match ty.as_ref() {
            Type::Path(type_path) => {
                let segment = type_path
                    .path
                    .segments
                    .last()
                    .ok_or_else(|| Error::new(type_path.span(), "missing return type"))?;
                if segment.ident != "Result" {
                    return Err(Error::new(segment.ident.span(), "#[handler] requires a Result<_, _> return type"));
                }
                match &segment.arguments {
                    PathArguments::AngleBracketed(args) => {
                        let mut generics = args.args.iter();
                        let response_ty = match generics.next() {
                            Some(GenericArgument::Type(ty)) => ty,
                            _ => return Err(Error::new(args.span(), "Result must supply a response type")),
                        };
                        let error_ty = match generics.next() {
                            Some(GenericArgument::Type(ty)) => ty,
                            _ => return Err(Error::new(args.span(), "Result must supply an error type")),
                        };
                        Ok((response_ty, error_ty))
                    }
                    _ => Err(Error::new(segment.arguments.span(), "could not parse Result's generic arguments")),
                }
            }
            _ => Err(Error::new(ty.span(), "return type must be Result<_, _>")),
        },
        ReturnType::Default => Err(Error::new(sig.span(), "#[handler] requires a Result<_, _> return type")),
    }
}

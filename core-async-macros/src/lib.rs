use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ItemFn, Lit, Meta, Token};

const DEFAULT_WORKER_THREADS: usize = 4;

/// Runs an `async fn` test on a fresh runtime.
///
/// `#[core_async::test]` uses a current-thread runtime.
/// `#[core_async::test(multi_thread)]` and
/// `#[core_async::test(multi_thread, worker_threads = 8)]` use a
/// multi-threaded runtime.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

enum Flavor {
    CurrentThread,
    MultiThread { worker_threads: usize },
}

fn parse_flavor(attr: TokenStream) -> syn::Result<Flavor> {
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;

    let mut multi_thread = false;
    let mut worker_threads = None;

    for meta in metas {
        match &meta {
            Meta::Path(path) if path.is_ident("multi_thread") => multi_thread = true,
            Meta::Path(path) if path.is_ident("current_thread") => multi_thread = false,
            Meta::NameValue(nv) if nv.path.is_ident("worker_threads") => {
                let Expr::Lit(expr) = &nv.value else {
                    return Err(syn::Error::new_spanned(&nv.value, "expected an integer"));
                };
                let Lit::Int(value) = &expr.lit else {
                    return Err(syn::Error::new_spanned(&expr.lit, "expected an integer"));
                };
                worker_threads = Some(value.base10_parse::<usize>()?);
                multi_thread = true;
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "unknown argument; expected `multi_thread`, `current_thread` \
                     or `worker_threads = N`",
                ))
            }
        }
    }

    Ok(if multi_thread {
        Flavor::MultiThread {
            worker_threads: worker_threads.unwrap_or(DEFAULT_WORKER_THREADS),
        }
    } else {
        Flavor::CurrentThread
    })
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let flavor = match parse_flavor(attr) {
        Ok(flavor) => flavor,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;

    let runner: TokenStream2 = match flavor {
        Flavor::CurrentThread => quote! {
            core_async::runtime::block_on(async move #block)
        },
        Flavor::MultiThread { worker_threads } => quote! {
            core_async::runtime::block_on_multi_thread(#worker_threads, async move #block)
        },
    };

    let test_attr = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => quote!(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #runner
        }
    }
    .into()
}

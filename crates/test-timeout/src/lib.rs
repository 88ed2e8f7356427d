//! `#[timeout]` and `#[tokio_timeout_test]`: test attributes that run the
//! body on a watchdog thread and fail the test once the limit passes.
//!
//! Both take an optional limit in seconds (`#[timeout(5)]`); the default is
//! [`DEFAULT_SECS`]. Setting `TEST_TIMEOUT_SCALE` multiplies every limit,
//! which helps on slow CI machines.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Block, ItemFn, LitInt};

const DEFAULT_SECS: u64 = 60;

fn parse_limit(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn is_path(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<String> = attr.path().segments.iter().map(|s| s.ident.to_string()).collect();
    segments.iter().map(String::as_str).eq(expected.iter().copied())
}

/// Wraps `run` (an expression producing the test's result) in a thread
/// whose outcome is awaited for at most `secs` seconds.
fn watchdog(attrs: Vec<Attribute>, item: &ItemFn, secs: u64, run: TokenStream2) -> TokenStream2 {
    let vis = &item.vis;
    let mut sig = item.sig.clone();
    sig.asyncness = None;
    let ident = &item.sig.ident;
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let scale = std::env::var("TEST_TIMEOUT_SCALE")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(1);
            let limit = std::time::Duration::from_secs(#secs * scale);
            let name = concat!(module_path!(), "::", stringify!(#ident));
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name("test-watchdog".into())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #run));
                    let _ = done_tx.send(outcome);
                })
                .expect("failed to spawn test thread");
            match done_rx.recv_timeout(limit) {
                Ok(Ok(value)) => value,
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("{} exceeded {:?}", name, limit)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("{} exited without reporting a result", name)
                }
            }
        }
    }
}

/// Synchronous test with a watchdog. Replaces `#[test]`.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_limit(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    if item.sig.asyncness.is_some() {
        return syn::Error::new_spanned(&item.sig.ident, "use #[tokio_timeout_test] for async tests")
            .to_compile_error()
            .into();
    }
    let attrs: Vec<Attribute> = item.attrs.iter().filter(|a| !is_path(a, &["test"])).cloned().collect();
    let block: &Block = &item.block;
    watchdog(attrs, &item, secs, quote! { #block }).into()
}

/// Async test on a current-thread Tokio runtime with a watchdog. Replaces
/// `#[tokio::test]`.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_limit(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    if item.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&item.sig.ident, "#[tokio_timeout_test] needs an async fn")
            .to_compile_error()
            .into();
    }
    let attrs: Vec<Attribute> = item
        .attrs
        .iter()
        .filter(|a| !is_path(a, &["tokio", "test"]) && !is_path(a, &["test"]))
        .cloned()
        .collect();
    let block = &item.block;
    let run = quote! {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime")
            .block_on(async move #block)
    };
    watchdog(attrs, &item, secs, run).into()
}

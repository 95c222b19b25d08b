//! `#[tokio_timeout_test]`: runs an async test on its own Tokio runtime,
//! on a separate thread, and fails it once the deadline passes.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test]
//! async fn default_deadline() {}
//!
//! #[test_timeout::tokio_timeout_test(10)]
//! async fn ten_seconds() {}
//!
//! #[test_timeout::tokio_timeout_test(secs = 30, workers = 2)]
//! async fn multi_threaded() {}
//! ```

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::Parser;
use syn::{Attribute, ItemFn, LitInt, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct Options {
    secs: u64,
    workers: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            secs: DEFAULT_TIMEOUT_SECS,
            workers: None,
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let secs = options.secs;
    let runtime = match options.workers {
        Some(workers) => quote! {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#workers)
                .enable_all()
                .build()
        },
        None => quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
        },
    };

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (report, outcome) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = #runtime.expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        if tokio::time::timeout(deadline, async move #block).await.is_err() {
                            panic!("test exceeded {}s deadline", #secs);
                        }
                    });
                }));
                let _ = report.send(result);
            });
            match outcome.recv_timeout(deadline + std::time::Duration::from_secs(1)) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s deadline and did not unwind", #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}

/// Accepts either a bare number of seconds or `secs = N, workers = M`.
fn parse_options(attr: TokenStream) -> syn::Result<Options> {
    let mut options = Options::default();
    if attr.is_empty() {
        return Ok(options);
    }

    if let Ok(lit) = syn::parse::<LitInt>(attr.clone()) {
        options.secs = lit.base10_parse()?;
    } else {
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("secs") {
                let lit: LitInt = meta.value()?.parse()?;
                options.secs = lit.base10_parse()?;
                Ok(())
            } else if meta.path.is_ident("workers") {
                let lit: LitInt = meta.value()?.parse()?;
                options.workers = Some(lit.base10_parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `secs = <u64>` or `workers = <usize>`"))
            }
        });
        parser.parse(attr)?;
    }

    if options.secs == 0 {
        return Err(syn::Error::new(
            Span::call_site(),
            "timeout must be greater than zero",
        ));
    }
    if options.workers == Some(0) {
        return Err(syn::Error::new(
            Span::call_site(),
            "workers must be greater than zero",
        ));
    }
    Ok(options)
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

//! `#[traced]` attribute for job and worker lifecycle functions.
//!
//! The attributed function logs `OnEnter`/`OnExit` at TRACE level. Options:
//!
//! - `instrument(...)`: forwarded to `#[tracing::instrument(...)]`
//! - `timing(precision = "ns" | "us" | "ms" | "s")`: adds an `elapsed`
//!   field to the exit event
//! - `slow(ms = N)`: logs a WARN when a call takes at least `N` milliseconds
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"), slow(ms = 20000))]
//! async fn compose(&self, request: &CampaignRequest) -> Result<EmailContent, ContentError> { ... }
//! ```
//!
//! The generated code refers to `tracing::...`, so the calling crate needs
//! `tracing` in scope.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemFn, LitInt, LitStr, Stmt, Token, parse::Parse, parse_macro_input, parse_quote};

mod keywords {
    syn::custom_keyword!(instrument);
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(slow);
    syn::custom_keyword!(ms);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Precision {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ns" | "nanos" | "nanoseconds" => Self::Nanos,
            "us" | "micros" | "microseconds" => Self::Micros,
            "ms" | "millis" | "milliseconds" => Self::Millis,
            "s" | "secs" | "seconds" => Self::Seconds,
            _ => return None,
        })
    }

    /// Expression rendering the local `elapsed: Duration` at this precision
    fn render(self) -> TokenStream {
        match self {
            Self::Nanos => quote!(format!("{}ns", elapsed.as_nanos())),
            Self::Micros => quote!(format!("{}us", elapsed.as_micros())),
            Self::Millis => quote!(format!("{}ms", elapsed.as_millis())),
            Self::Seconds => quote!(format!("{:.3}s", elapsed.as_secs_f64())),
        }
    }
}

/// Parse `(name = <value>)` after an option keyword
fn parenthesised<K: Parse, V: Parse>(input: syn::parse::ParseStream) -> syn::Result<V> {
    let content;
    let _ = syn::parenthesized!(content in input);
    let _ = content.parse::<K>()?;
    let _ = content.parse::<Token![=]>()?;
    content.parse()
}

#[derive(Default)]
struct Options {
    instrument: Option<TokenStream>,
    timing: Option<Precision>,
    slow_ms: Option<u64>,
}

impl Parse for Options {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut options = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(keywords::instrument) {
                let keyword = input.parse::<keywords::instrument>()?;
                if options.instrument.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `instrument` option"));
                }

                options.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    let _ = syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else if lookahead.peek(keywords::timing) {
                let keyword = input.parse::<keywords::timing>()?;
                if options.timing.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `timing` option"));
                }

                let precision = if input.peek(syn::token::Paren) {
                    let name: LitStr = parenthesised::<keywords::precision, _>(input)?;
                    Precision::from_name(&name.value()).ok_or_else(|| {
                        syn::Error::new(name.span(), "expected one of \"ns\", \"us\", \"ms\", \"s\"")
                    })?
                } else {
                    Precision::Millis
                };
                options.timing = Some(precision);
            } else if lookahead.peek(keywords::slow) {
                let keyword = input.parse::<keywords::slow>()?;
                if options.slow_ms.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `slow` option"));
                }

                let threshold: LitInt = parenthesised::<keywords::ms, _>(input)?;
                options.slow_ms = Some(threshold.base10_parse()?);
            } else if lookahead.peek(Token![,]) {
                let _ = input.parse::<Token![,]>()?;
            } else {
                return Err(lookahead.error());
            }
        }

        Ok(options)
    }
}

impl Options {
    /// Statements run when the guard drops, with `elapsed` in scope when
    /// anything needs it
    fn on_exit(&self, name: &str) -> TokenStream {
        let exit = match self.timing {
            Some(precision) => {
                let rendered = precision.render();
                quote!(tracing::trace!(elapsed = %#rendered, "OnExit: {}", #name);)
            }
            None => quote!(tracing::trace!("OnExit: {}", #name);),
        };

        let slow = self.slow_ms.map(|threshold| {
            quote! {
                if elapsed >= std::time::Duration::from_millis(#threshold) {
                    tracing::warn!(
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        threshold_ms = #threshold,
                        "{} was slow",
                        #name
                    );
                }
            }
        });

        if self.timing.is_some() || slow.is_some() {
            quote! {
                let elapsed = self.start.elapsed();
                #exit
                #slow
            }
        } else {
            quote! {
                let _ = self.start;
                #exit
            }
        }
    }
}

/// Log entry to and exit from the attributed function.
///
/// The exit event is emitted from a drop guard, so it fires on early
/// returns, `?` and cancellation of an `async fn` alike.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let options = parse_macro_input!(args as Options);
    let mut item_fn = parse_macro_input!(item as ItemFn);

    if let Some(args) = &options.instrument {
        item_fn
            .attrs
            .push(parse_quote!(#[tracing::instrument(#args)]));
    }

    let name = item_fn.sig.ident.to_string();
    let on_exit = options.on_exit(&name);

    let guard: Stmt = parse_quote! {
        let __traced_guard = {
            struct TracedGuard {
                start: std::time::Instant,
            }

            impl std::ops::Drop for TracedGuard {
                fn drop(&mut self) {
                    #on_exit
                }
            }

            tracing::trace!("OnEnter: {}", #name);
            TracedGuard {
                start: std::time::Instant::now(),
            }
        };
    };

    item_fn.block.stmts.insert(0, guard);

    quote!(#item_fn).into()
}

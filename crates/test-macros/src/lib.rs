use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, LitInt, parse_macro_input};

/// A drop-in replacement for `#[test]` that reports elapsed wall time and
/// fails any test exceeding a time budget (default: 2 seconds).
///
/// # Usage
/// ```ignore
/// use test_macros::timed_test;
///
/// #[timed_test]
/// fn fast_test() {
///     assert_eq!(1 + 1, 2);
/// }
///
/// #[timed_test(60)]
/// fn slow_test() {
///     // This test gets a 60-second budget
/// }
/// ```
#[proc_macro_attribute]
pub fn timed_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget_secs: u64 = if attr.is_empty() {
        2
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        lit.base10_parse::<u64>()
            .expect("timed_test expects an integer budget in seconds")
    };

    let input_fn = parse_macro_input!(item as ItemFn);
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_attrs = &input_fn.attrs;
    let fn_vis = &input_fn.vis;

    let expanded = quote! {
        #(#fn_attrs)*
        #[test]
        #fn_vis fn #fn_name() {
            let __start = ::std::time::Instant::now();
            let __outcome = ::std::panic::catch_unwind(
                ::std::panic::AssertUnwindSafe(|| #fn_block)
            );
            let __elapsed_ms = __start.elapsed().as_millis();

            eprintln!("[timer] {}: {}ms", stringify!(#fn_name), __elapsed_ms);

            if let ::std::result::Result::Err(__payload) = __outcome {
                ::std::panic::resume_unwind(__payload);
            }

            assert!(
                __elapsed_ms < u128::from(#budget_secs) * 1000,
                "[timer] {} blew its {}s budget ({}ms)",
                stringify!(#fn_name),
                #budget_secs,
                __elapsed_ms
            );
        }
    };

    expanded.into()
}

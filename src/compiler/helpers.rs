//! Scalar ownership helpers
//!
//! Optional exports appended to every artifact when
//! `[exports] ownership_helpers` is set. They let a host park a scalar
//! behind an opaque pointer owned by Rust:
//!
//! | family        | functions (per scalar `T`)                         |
//! |---------------|----------------------------------------------------|
//! | `nc_box_*_T`  | `new`, `get`, `drop`                               |
//! | `nc_rc_*_T`   | `new`, `clone`, `get`, `count`, `drop`             |
//! | `nc_arc_*_T`  | `new`, `clone`, `get`, `count`, `drop`             |
//!
//! Every pointer crosses the boundary as `*mut c_void` / `*const c_void`.
//! A null pointer reads as the default value and drops as a no-op.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::lowering::no_mangle_tokens_for;
use crate::signature::{FunctionSignature, Param};

/// Scalar types that get a helper family
pub const HELPER_TYPES: &[&str] = &["i32", "i64", "f32", "f64", "bool"];

const VOID_MUT: &str = "*mut c_void";
const VOID_CONST: &str = "*const c_void";

/// Source text of the helpers, ready to append to a lowered file
pub fn ownership_helpers(edition: &str) -> String {
    let no_mangle = no_mangle_tokens_for(edition);
    let mut out = TokenStream::new();

    for ty in HELPER_TYPES {
        let t = format_ident!("{}", ty);
        let new = format_ident!("nc_box_new_{}", ty);
        let get = format_ident!("nc_box_get_{}", ty);
        let drop_fn = format_ident!("nc_box_drop_{}", ty);
        out.extend(quote! {
            #no_mangle
            pub extern "C" fn #new(value: #t) -> *mut ::core::ffi::c_void {
                Box::into_raw(Box::new(value)) as *mut ::core::ffi::c_void
            }

            #no_mangle
            pub unsafe extern "C" fn #get(ptr: *const ::core::ffi::c_void) -> #t {
                if ptr.is_null() {
                    return Default::default();
                }
                unsafe { *(ptr as *const #t) }
            }

            #no_mangle
            pub unsafe extern "C" fn #drop_fn(ptr: *mut ::core::ffi::c_void) {
                if !ptr.is_null() {
                    drop(unsafe { Box::from_raw(ptr as *mut #t) });
                }
            }
        });

        for (family, rc) in [
            ("rc", quote! { ::std::rc::Rc }),
            ("arc", quote! { ::std::sync::Arc }),
        ] {
            let new = format_ident!("nc_{}_new_{}", family, ty);
            let clone = format_ident!("nc_{}_clone_{}", family, ty);
            let get = format_ident!("nc_{}_get_{}", family, ty);
            let count = format_ident!("nc_{}_count_{}", family, ty);
            let drop_fn = format_ident!("nc_{}_drop_{}", family, ty);
            out.extend(quote! {
                #no_mangle
                pub extern "C" fn #new(value: #t) -> *mut ::core::ffi::c_void {
                    #rc::into_raw(#rc::new(value)) as *mut ::core::ffi::c_void
                }

                #no_mangle
                pub unsafe extern "C" fn #clone(
                    ptr: *const ::core::ffi::c_void,
                ) -> *mut ::core::ffi::c_void {
                    if !ptr.is_null() {
                        unsafe { #rc::increment_strong_count(ptr as *const #t) };
                    }
                    ptr as *mut ::core::ffi::c_void
                }

                #no_mangle
                pub unsafe extern "C" fn #get(ptr: *const ::core::ffi::c_void) -> #t {
                    if ptr.is_null() {
                        return Default::default();
                    }
                    unsafe { *(ptr as *const #t) }
                }

                #no_mangle
                pub unsafe extern "C" fn #count(ptr: *const ::core::ffi::c_void) -> usize {
                    if ptr.is_null() {
                        return 0;
                    }
                    let shared =
                        ::core::mem::ManuallyDrop::new(unsafe { #rc::from_raw(ptr as *const #t) });
                    #rc::strong_count(&shared)
                }

                #no_mangle
                pub unsafe extern "C" fn #drop_fn(ptr: *const ::core::ffi::c_void) {
                    if !ptr.is_null() {
                        drop(unsafe { #rc::from_raw(ptr as *const #t) });
                    }
                }
            });
        }
    }

    format!("\n\n// generated ownership helpers\n{}\n", out)
}

/// Signatures of everything [`ownership_helpers`] exports
pub fn helper_signatures() -> Vec<FunctionSignature> {
    let sig = |name: String, params: Vec<Param>, ret: &str| FunctionSignature {
        name,
        params,
        return_type: ret.to_string(),
        is_generic: false,
        generic_params: Vec::new(),
    };
    let value = |ty: &str| vec![Param::new("value", ty)];
    let ptr = |ty: &str| vec![Param::new("ptr", ty)];

    let mut out = Vec::new();
    for ty in HELPER_TYPES {
        out.push(sig(format!("nc_box_new_{}", ty), value(ty), VOID_MUT));
        out.push(sig(format!("nc_box_get_{}", ty), ptr(VOID_CONST), ty));
        out.push(sig(format!("nc_box_drop_{}", ty), ptr(VOID_MUT), "()"));
        for family in ["rc", "arc"] {
            out.push(sig(format!("nc_{}_new_{}", family, ty), value(ty), VOID_MUT));
            out.push(sig(format!("nc_{}_clone_{}", family, ty), ptr(VOID_CONST), VOID_MUT));
            out.push(sig(format!("nc_{}_get_{}", family, ty), ptr(VOID_CONST), ty));
            out.push(sig(format!("nc_{}_count_{}", family, ty), ptr(VOID_CONST), "usize"));
            out.push(sig(format!("nc_{}_drop_{}", family, ty), ptr(VOID_CONST), "()"));
        }
    }
    out
}

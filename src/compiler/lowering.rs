//! Export Lowering
//!
//! Rewrites marked items so they are reachable through the C ABI:
//!
//! - a marked function becomes `pub extern "C"` with an unmangled symbol
//! - a function returning `Result<T, E>` or `Option<T>` over scalars keeps
//!   its body under `<name>_inner`, and a generated `extern "C"` wrapper
//!   named `<name>` returns a `#[repr(C)]` tagged struct instead
//! - a marked struct gets `#[repr(C)]` plus `<S>_new`, `<S>_free` and
//!   per-field accessors
//! - a marked method of a non-generic `impl` gets an `<S>_<method>` wrapper
//!   taking the receiver as a `this` pointer; a method returning `Self`
//!   hands back a boxed `*mut S`
//!
//! Rewrites are text edits at span positions, so every original line keeps
//! its line number and toolchain diagnostics still point into the user's
//! source. Generated items are appended after the original text.

use std::cmp::Reverse;
use std::collections::HashSet;

use log::debug;
use proc_macro2::{Ident, LineColumn, Span, TokenStream};
use quote::{format_ident, quote};
use syn::{
    parse_file, Attribute, Fields, FnArg, GenericArgument, GenericParam, ImplItem, ImplItemFn,
    Item, ItemFn, ItemImpl, ItemStruct, Pat, PathArguments, ReturnType, Signature, Type,
    Visibility,
};
use thiserror::Error;

use crate::types::{HostType, TypeDesc};

#[derive(Debug, Error)]
pub enum LoweringError {
    #[error("Syn parse error: {0}")]
    Syn(#[from] syn::Error),
}

/// Lowered source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lowered {
    pub source: String,
    /// Number of marked items that were rewritten
    pub exports: usize,
}

/// Lower every top-level item carrying one of `markers`
pub fn lower_exports(
    source: &str,
    markers: &[String],
    edition: &str,
) -> Result<Lowered, LoweringError> {
    let file = parse_file(source)?;
    let mut lowering = Lowering {
        source,
        lines: line_starts(source),
        markers,
        no_mangle: no_mangle_attr(edition),
        edits: Vec::new(),
        generated: TokenStream::new(),
        exports: 0,
        method_symbols: HashSet::new(),
    };
    lowering.method_symbols = lowering.marked_method_symbols(&file.items);

    for item in &file.items {
        match item {
            Item::Fn(f) => lowering.lower_fn(f),
            Item::Struct(s) => lowering.lower_struct(s),
            Item::Impl(i) => lowering.lower_impl(i),
            _ => {}
        }
    }

    let exports = lowering.exports;
    let generated = std::mem::take(&mut lowering.generated);
    let mut out = lowering.apply();
    if !generated.is_empty() {
        out.push_str("\n\n// generated C ABI exports\n");
        out.push_str(&generated.to_string());
        out.push('\n');
    }
    Ok(Lowered {
        source: out,
        exports,
    })
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

struct Lowering<'a> {
    source: &'a str,
    lines: Vec<usize>,
    markers: &'a [String],
    no_mangle: &'static str,
    edits: Vec<Edit>,
    generated: TokenStream,
    exports: usize,
    /// `Type_method` symbols of marked methods; struct accessors of the
    /// same name give way to them
    method_symbols: HashSet<String>,
}

impl Lowering<'_> {
    fn offset(&self, at: LineColumn) -> usize {
        let Some(&start) = self.lines.get(at.line.saturating_sub(1)) else {
            return self.source.len();
        };
        self.source[start..]
            .char_indices()
            .nth(at.column)
            .map(|(i, _)| start + i)
            .unwrap_or(self.source.len())
    }

    fn replace(&mut self, start: Span, end: Span, text: impl Into<String>) {
        let start = self.offset(start.start());
        let end = self.offset(end.end());
        self.edits.push(Edit {
            start,
            end,
            text: text.into(),
        });
    }

    fn insert(&mut self, at: Span, text: impl Into<String>) {
        let at = self.offset(at.start());
        self.edits.push(Edit {
            start: at,
            end: at,
            text: text.into(),
        });
    }

    fn remove_attr(&mut self, attr: &Attribute, replacement: &str) {
        self.replace(attr.pound_token.spans[0], attr.bracket_token.span.close(), replacement);
    }

    /// Edits applied back to front; same-offset inserts keep their order
    fn apply(self) -> String {
        let mut edits: Vec<(usize, Edit)> = self.edits.into_iter().enumerate().collect();
        edits.sort_by_key(|(seq, e)| (Reverse(e.start), Reverse(*seq)));

        let mut out = self.source.to_string();
        for (_, edit) in edits {
            out.replace_range(edit.start..edit.end, &edit.text);
        }
        out
    }

    fn marked_method_symbols(&self, items: &[Item]) -> HashSet<String> {
        items
            .iter()
            .filter_map(|item| match item {
                Item::Impl(imp) => Some((ImplOwner::of(imp)?, imp)),
                _ => None,
            })
            .flat_map(|(owner, imp)| {
                imp.items
                    .iter()
                    .filter_map(|item| match item {
                        ImplItem::Fn(method) if !self.marks(&method.attrs).is_empty() => {
                            Some(format!("{}_{}", owner.name, method.sig.ident))
                        }
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn marks<'b>(&self, attrs: &'b [Attribute]) -> Vec<&'b Attribute> {
        attrs
            .iter()
            .filter(|a| attr_name(a).map_or(false, |n| self.markers.contains(&n)))
            .collect()
    }

    fn lower_fn(&mut self, f: &ItemFn) {
        let marks = self.marks(&f.attrs);
        if marks.is_empty() {
            return;
        }
        let custom: Vec<&Attribute> = marks
            .iter()
            .copied()
            .filter(|a| attr_name(a).as_deref() != Some("no_mangle"))
            .collect();

        if has_type_generics(&f.sig) {
            debug!("skipping generic export {}", f.sig.ident);
            for attr in custom {
                self.remove_attr(attr, "");
            }
            return;
        }

        let ret = match &f.sig.output {
            ReturnType::Type(_, ty) => Some(ty.as_ref()),
            ReturnType::Default => None,
        };
        let desc = ret.map(|ty| TypeDesc::resolve(&type_text(ty)));
        self.exports += 1;

        match (desc, ret) {
            (Some(desc @ (TypeDesc::Result(..) | TypeDesc::Option(_))), Some(ty)) => {
                for attr in f
                    .attrs
                    .iter()
                    .filter(|a| is_no_mangle(a) || marks.iter().any(|m| std::ptr::eq(*m, *a)))
                {
                    self.remove_attr(attr, "");
                }
                let inner = format_ident!("{}_inner", f.sig.ident);
                let ident = f.sig.ident.span();
                self.replace(ident, ident, inner.to_string());

                let (params, args) = wrapper_params(&f.sig);
                let call = if f.sig.unsafety.is_some() {
                    quote! { unsafe { #inner(#(#args),*) } }
                } else {
                    quote! { #inner(#(#args),*) }
                };
                let wrapper = self.sum_wrapper(
                    &f.sig.ident,
                    &params,
                    call,
                    f.sig.unsafety.is_some(),
                    ty,
                    &desc,
                );
                self.generated.extend(wrapper);
            }
            _ => {
                let keeps_no_mangle = f.attrs.iter().any(is_no_mangle);
                for (i, attr) in custom.iter().enumerate() {
                    let text = if i == 0 && !keeps_no_mangle { self.no_mangle } else { "" };
                    self.remove_attr(attr, text);
                }
                if matches!(f.vis, Visibility::Inherited) {
                    self.insert(sig_start(&f.sig), "pub ");
                }
                if f.sig.abi.is_none() {
                    self.insert(f.sig.fn_token.span, "extern \"C\" ");
                }
            }
        }
    }

    /// `extern "C"` function `name` evaluating `call` and returning the
    /// tagged struct for a `Result` or `Option` return
    fn sum_wrapper(
        &self,
        name: &Ident,
        params: &[TokenStream],
        call: TokenStream,
        unsafety: bool,
        ret: &Type,
        desc: &TypeDesc,
    ) -> TokenStream {
        let no_mangle = self.no_mangle_tokens();
        let payloads = generic_type_args(ret);
        let unsafety = unsafety.then(|| quote! { unsafe });

        match (desc, payloads.as_slice()) {
            (TypeDesc::Result(..), [ok, err]) => {
                let wire = format_ident!("CResult_{}", name);
                quote! {
                    #[repr(C)]
                    #[allow(non_camel_case_types)]
                    pub struct #wire {
                        pub is_ok: u8,
                        pub ok_value: #ok,
                        pub err_value: #err,
                    }

                    #no_mangle
                    pub #unsafety extern "C" fn #name(#(#params),*) -> #wire {
                        let result = #call;
                        match result {
                            Ok(value) => #wire {
                                is_ok: 1,
                                ok_value: value,
                                err_value: unsafe { ::core::mem::zeroed() },
                            },
                            Err(error) => #wire {
                                is_ok: 0,
                                ok_value: unsafe { ::core::mem::zeroed() },
                                err_value: error,
                            },
                        }
                    }
                }
            }
            (TypeDesc::Option(_), [value_ty]) => {
                let wire = format_ident!("COption_{}", name);
                quote! {
                    #[repr(C)]
                    #[allow(non_camel_case_types)]
                    pub struct #wire {
                        pub is_some: u8,
                        pub value: #value_ty,
                    }

                    #no_mangle
                    pub #unsafety extern "C" fn #name(#(#params),*) -> #wire {
                        let result = #call;
                        match result {
                            Some(value) => #wire { is_some: 1, value },
                            None => #wire {
                                is_some: 0,
                                value: unsafe { ::core::mem::zeroed() },
                            },
                        }
                    }
                }
            }
            _ => TokenStream::new(),
        }
    }

    fn lower_impl(&mut self, imp: &ItemImpl) {
        let methods: Vec<(&ImplItemFn, Vec<&Attribute>)> = imp
            .items
            .iter()
            .filter_map(|item| match item {
                ImplItem::Fn(method) => Some((method, self.marks(&method.attrs))),
                _ => None,
            })
            .filter(|(_, marks)| !marks.is_empty())
            .collect();
        if methods.is_empty() {
            return;
        }

        let owner = ImplOwner::of(imp);
        for (method, marks) in methods {
            for attr in marks {
                self.remove_attr(attr, "");
            }
            let Some(owner) = &owner else {
                debug!("skipping export {} of a generic impl", method.sig.ident);
                continue;
            };
            match self.method_wrapper(owner, &method.sig) {
                Some(wrapper) => {
                    self.generated.extend(wrapper);
                    self.exports += 1;
                }
                None => debug!("{}::{} has no C ABI form", owner.name, method.sig.ident),
            }
        }
    }

    fn method_wrapper(&self, owner: &ImplOwner, sig: &Signature) -> Option<TokenStream> {
        if has_type_generics(sig) {
            return None;
        }
        let mentions_owner = sig.inputs.iter().any(|input| match input {
            FnArg::Typed(pat) => mentions_self(&type_text(&pat.ty)),
            FnArg::Receiver(_) => false,
        });
        if mentions_owner {
            return None;
        }

        let ty = &owner.ty;
        let method = &sig.ident;
        let name = format_ident!("{}_{}", owner.name, method);
        let (mut params, args) = wrapper_params(sig);

        let call = match sig.receiver() {
            Some(r) if r.colon_token.is_some() || r.reference.is_none() => return None,
            Some(r) => {
                params.insert(
                    0,
                    if r.mutability.is_some() {
                        quote! { this: *mut #ty }
                    } else {
                        quote! { this: *const #ty }
                    },
                );
                quote! { unsafe { (*this).#method(#(#args),*) } }
            }
            None if sig.unsafety.is_some() => quote! { unsafe { #ty::#method(#(#args),*) } },
            None => quote! { #ty::#method(#(#args),*) },
        };
        let is_unsafe = sig.receiver().is_some() || sig.unsafety.is_some();
        let unsafety = is_unsafe.then(|| quote! { unsafe });
        let no_mangle = self.no_mangle_tokens();

        let ret = match &sig.output {
            ReturnType::Default => {
                return Some(quote! {
                    #no_mangle
                    pub #unsafety extern "C" fn #name(#(#params),*) {
                        #call;
                    }
                })
            }
            ReturnType::Type(_, ret) => ret.as_ref(),
        };

        let text = type_text(ret);
        if text == "Self" || text == owner.text {
            return Some(quote! {
                #no_mangle
                pub #unsafety extern "C" fn #name(#(#params),*) -> *mut #ty {
                    Box::into_raw(Box::new(#call))
                }
            });
        }
        if mentions_self(&text) {
            return None;
        }

        match TypeDesc::resolve(&text) {
            desc @ (TypeDesc::Result(..) | TypeDesc::Option(_)) => {
                Some(self.sum_wrapper(&name, &params, call, is_unsafe, ret, &desc))
            }
            _ => Some(quote! {
                #no_mangle
                pub #unsafety extern "C" fn #name(#(#params),*) -> #ret {
                    #call
                }
            }),
        }
    }

    fn lower_struct(&mut self, s: &ItemStruct) {
        let marks = self.marks(&s.attrs);
        if marks.is_empty() {
            return;
        }
        let has_repr = s.attrs.iter().any(|a| a.path().is_ident("repr"));
        for (i, attr) in marks.iter().enumerate() {
            let text = if i == 0 && !has_repr { "#[repr(C)]" } else { "" };
            self.remove_attr(attr, text);
        }
        self.exports += 1;

        if !s.generics.params.is_empty() {
            debug!("generic struct {} gets no constructors", s.ident);
            return;
        }
        let accessors = self.struct_accessors(s);
        self.generated.extend(accessors);
    }

    fn struct_accessors(&self, s: &ItemStruct) -> TokenStream {
        let name = &s.ident;
        let no_mangle = self.no_mangle_tokens();
        let taken = |symbol: &Ident| {
            let hit = self.method_symbols.contains(&symbol.to_string());
            if hit {
                debug!("{} is exported by a method, skipping the accessor", symbol);
            }
            hit
        };
        let mut out = TokenStream::new();

        let free = format_ident!("{}_free", name);
        if !taken(&free) {
            out.extend(quote! {
                #no_mangle
                pub unsafe extern "C" fn #free(ptr: *mut #name) {
                    if !ptr.is_null() {
                        drop(unsafe { Box::from_raw(ptr) });
                    }
                }
            });
        }

        let Fields::Named(named) = &s.fields else {
            return out;
        };
        let scalar: Vec<_> = named
            .named
            .iter()
            .filter(|field| is_ffi_scalar(&field.ty))
            .filter_map(|field| field.ident.as_ref().map(|ident| (ident, &field.ty)))
            .collect();

        let new = format_ident!("{}_new", name);
        if scalar.len() == named.named.len() && !taken(&new) {
            let idents = scalar.iter().map(|(ident, _)| *ident);
            let params = scalar.iter().map(|(ident, ty)| quote! { #ident: #ty });
            out.extend(quote! {
                #no_mangle
                pub extern "C" fn #new(#(#params),*) -> *mut #name {
                    Box::into_raw(Box::new(#name { #(#idents),* }))
                }
            });
        }

        for (ident, ty) in scalar {
            let get = format_ident!("{}_get_{}", name, ident);
            let set = format_ident!("{}_set_{}", name, ident);
            if !taken(&get) {
                out.extend(quote! {
                    #no_mangle
                    pub unsafe extern "C" fn #get(ptr: *const #name) -> #ty {
                        unsafe { (*ptr).#ident }
                    }
                });
            }
            if !taken(&set) {
                out.extend(quote! {
                    #no_mangle
                    pub unsafe extern "C" fn #set(ptr: *mut #name, value: #ty) {
                        unsafe { (*ptr).#ident = value; }
                    }
                });
            }
        }
        out
    }

    fn no_mangle_tokens(&self) -> TokenStream {
        if self.no_mangle.contains("unsafe") {
            quote! { #[unsafe(no_mangle)] }
        } else {
            quote! { #[no_mangle] }
        }
    }
}

/// Unmangled-symbol attribute for `edition`
pub(crate) fn no_mangle_attr(edition: &str) -> &'static str {
    if edition.parse::<u32>().map_or(false, |e| e >= 2024) {
        "#[unsafe(no_mangle)]"
    } else {
        "#[no_mangle]"
    }
}

pub(crate) fn no_mangle_tokens_for(edition: &str) -> TokenStream {
    if no_mangle_attr(edition).contains("unsafe") {
        quote! { #[unsafe(no_mangle)] }
    } else {
        quote! { #[no_mangle] }
    }
}

/// Self type of an `impl` whose methods can be wrapped
struct ImplOwner {
    ty: Type,
    /// Last path segment, the wrapper name prefix
    name: Ident,
    text: String,
}

impl ImplOwner {
    /// `None` for generic impls and self types that are not a plain path
    fn of(imp: &ItemImpl) -> Option<Self> {
        if !imp.generics.params.is_empty() {
            return None;
        }
        let Type::Path(path) = imp.self_ty.as_ref() else {
            return None;
        };
        if path.qself.is_some()
            || path.path.leading_colon.is_some()
            || path.path.segments.iter().any(|s| !s.arguments.is_none())
        {
            return None;
        }
        Some(ImplOwner {
            name: path.path.segments.last()?.ident.clone(),
            text: type_text(&imp.self_ty),
            ty: imp.self_ty.as_ref().clone(),
        })
    }
}

fn mentions_self(text: &str) -> bool {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word == "Self")
}

fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Attribute name; `#[unsafe(no_mangle)]` counts as `no_mangle`
fn attr_name(attr: &Attribute) -> Option<String> {
    let path = attr.path();
    if path.is_ident("unsafe") {
        let inner = attr.meta.require_list().ok()?.tokens.to_string();
        return (inner.trim() == "no_mangle").then(|| "no_mangle".to_string());
    }
    path.segments.last().map(|s| s.ident.to_string())
}

fn is_no_mangle(attr: &Attribute) -> bool {
    attr_name(attr).as_deref() == Some("no_mangle")
}

fn has_type_generics(sig: &Signature) -> bool {
    sig.generics
        .params
        .iter()
        .any(|p| !matches!(p, GenericParam::Lifetime(_)))
}

fn sig_start(sig: &Signature) -> Span {
    sig.constness
        .map(|t| t.span)
        .or(sig.asyncness.map(|t| t.span))
        .or(sig.unsafety.map(|t| t.span))
        .or(sig.abi.as_ref().map(|a| a.extern_token.span))
        .unwrap_or(sig.fn_token.span)
}

/// Type text in the compact form the type translator reads
fn type_text(ty: &Type) -> String {
    quote!(#ty)
        .to_string()
        .replace(" :: ", "::")
        .replace(":: ", "::")
        .replace(" < ", "<")
        .replace("< ", "<")
        .replace(" >", ">")
        .replace(" , ", ", ")
}

fn is_ffi_scalar(ty: &Type) -> bool {
    TypeDesc::resolve(&type_text(ty))
        .scalar()
        .map_or(false, |t| t != HostType::Nothing)
}

/// `T, E` out of `Result<T, E>`
fn generic_type_args(ty: &Type) -> Vec<&Type> {
    let Type::Path(path) = ty else {
        return Vec::new();
    };
    let Some(last) = path.path.segments.last() else {
        return Vec::new();
    };
    let PathArguments::AngleBracketed(args) = &last.arguments else {
        return Vec::new();
    };
    args.args
        .iter()
        .filter_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        })
        .collect()
}

/// Wrapper parameter list and the matching call arguments
fn wrapper_params(sig: &Signature) -> (Vec<TokenStream>, Vec<TokenStream>) {
    sig.inputs
        .iter()
        .enumerate()
        .filter_map(|(i, input)| match input {
            FnArg::Typed(pat) => {
                let ident = match pat.pat.as_ref() {
                    Pat::Ident(p) => p.ident.clone(),
                    _ => format_ident!("arg{}", i),
                };
                let ty = &pat.ty;
                Some((quote! { #ident: #ty }, quote! { #ident }))
            }
            FnArg::Receiver(_) => None,
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["export".to_string(), "no_mangle".to_string()]
    }

    fn lower(source: &str) -> Lowered {
        lower_exports(source, &markers(), "2021").unwrap()
    }

    #[test]
    fn test_plain_fn() {
        let out = lower("#[export]\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n");
        assert_eq!(out.exports, 1);
        assert!(out
            .source
            .starts_with("#[no_mangle]\npub extern \"C\" fn add(a: i32, b: i32) -> i32 {"));
        parse_file(&out.source).unwrap();
    }

    #[test]
    fn test_already_exported_untouched() {
        let source = "#[no_mangle]\npub extern \"C\" fn id(x: u64) -> u64 { x }\n";
        assert_eq!(lower(source).source, source);
    }

    #[test]
    fn test_marker_beside_no_mangle() {
        let out = lower("#[export]\n#[no_mangle]\npub unsafe fn f() {}\n");
        assert_eq!(out.source, "\n#[no_mangle]\npub unsafe extern \"C\" fn f() {}\n");
    }

    #[test]
    fn test_line_numbers_preserved() {
        let source = "// header\n\n#[export]\nfn a() -> u8 { 1 }\n\nfn helper() {}\n\n#[export]\nfn b() -> u8 { 2 }\n";
        let out = lower(source);
        let lines: Vec<&str> = out.source.lines().collect();
        assert!(lines[3].contains("fn a()"));
        assert!(lines[5].contains("fn helper()"));
        assert!(lines[8].contains("extern \"C\" fn b()"));
    }

    #[test]
    fn test_result_wrapper() {
        let source = "#[export]\npub fn div(a: i32, b: i32) -> Result<i32, u8> {\n    if b == 0 { Err(1) } else { Ok(a / b) }\n}\n";
        let out = lower(source);
        assert!(out.source.lines().nth(1).unwrap().contains("fn div_inner("));
        assert!(out.source.contains("CResult_div"));
        assert!(out.source.contains("is_ok"));

        let file = parse_file(&out.source).unwrap();
        let names: Vec<String> = file
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Fn(f) => Some(f.sig.ident.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["div_inner", "div"]);
    }

    #[test]
    fn test_option_wrapper_qualified_path() {
        let out = lower("#[export]\nfn half(x: u32) -> std::option::Option<f64> { None }\n");
        assert!(out.source.contains("COption_half"));
        assert!(out.source.contains("is_some"));
        parse_file(&out.source).unwrap();
    }

    #[test]
    fn test_opaque_result_is_plain() {
        let out = lower("#[export]\nfn f() -> Result<String, ()> { Ok(String::new()) }\n");
        assert!(out.source.contains("extern \"C\" fn f()"));
        assert!(!out.source.contains("CResult_f"));
    }

    #[test]
    fn test_struct_accessors() {
        let out = lower("#[export]\npub struct Point {\n    pub x: f64,\n    pub y: f64,\n}\n");
        assert!(out.source.starts_with("#[repr(C)]\npub struct Point"));
        for symbol in ["Point_new", "Point_free", "Point_get_x", "Point_set_y"] {
            assert!(out.source.contains(symbol), "missing {}", symbol);
        }
        parse_file(&out.source).unwrap();
    }

    #[test]
    fn test_struct_with_opaque_field() {
        let out = lower(
            "#[export]\n#[repr(C)]\npub struct Named {\n    pub id: u32,\n    pub label: String,\n}\n",
        );
        assert!(out.source.starts_with("\n#[repr(C)]"));
        assert!(out.source.contains("Named_get_id"));
        assert!(!out.source.contains("Named_new"));
        assert!(!out.source.contains("Named_get_label"));
    }

    #[test]
    fn test_impl_method_wrappers() {
        let source = "pub struct Counter { n: u32 }\n\nimpl Counter {\n    #[export]\n    pub fn new(start: u32) -> Self {\n        Counter { n: start }\n    }\n\n    #[export]\n    pub fn bump(&mut self, by: u32) -> u32 {\n        self.n += by;\n        self.n\n    }\n\n    #[export]\n    pub fn get(&self) -> u32 {\n        self.n\n    }\n\n    #[export]\n    fn halve(&self) -> Option<u32> {\n        (self.n > 0).then(|| self.n / 2)\n    }\n\n    #[export]\n    fn consume(self) -> u32 {\n        self.n\n    }\n}\n";
        let out = lower(source);
        assert_eq!(out.exports, 4);
        assert!(!out.source.contains("#[export]"));
        assert!(out.source.lines().nth(9).unwrap().contains("pub fn bump(&mut self"));

        let file = parse_file(&out.source).unwrap();
        let wrappers: Vec<String> = file
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Fn(f) => Some(quote!(#f).to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(wrappers.len(), 4);
        assert!(wrappers[0].contains("Counter_new"));
        assert!(wrappers[0].contains("Box :: into_raw"));
        assert!(wrappers[1].contains("Counter_bump"));
        assert!(wrappers[1].contains("this : * mut Counter"));
        assert!(wrappers[2].contains("this : * const Counter"));
        assert!(wrappers[3].contains("COption_Counter_halve"));
        assert!(!out.source.contains("Counter_consume"));
    }

    #[test]
    fn test_method_wins_over_struct_accessor() {
        let source = "#[export]\npub struct Cell {\n    pub v: i32,\n}\n\nimpl Cell {\n    #[export]\n    pub fn new() -> Self {\n        Cell { v: 1 }\n    }\n}\n";
        let out = lower(source);
        assert_eq!(out.exports, 2);

        let file = parse_file(&out.source).unwrap();
        let names: Vec<String> = file
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Fn(f) => Some(f.sig.ident.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names.iter().filter(|n| *n == "Cell_new").count(), 1);
        assert!(names.contains(&"Cell_free".to_string()));
        assert!(names.contains(&"Cell_get_v".to_string()));
    }

    #[test]
    fn test_generic_impl_markers_removed() {
        let out = lower("struct W<T>(T);\nimpl<T> W<T> {\n    #[export]\n    fn size(&self) -> usize { 0 }\n}\n");
        assert_eq!(out.exports, 0);
        assert!(!out.source.contains("#[export]"));
        assert!(!out.source.contains("W_size"));
        parse_file(&out.source).unwrap();
    }

    #[test]
    fn test_impl_wrappers_match_extracted_signatures() {
        let source = "pub struct P { x: f64 }\nimpl P {\n    #[export]\n    pub fn scaled(&self, by: f64) -> f64 { self.x * by }\n    #[export]\n    pub fn origin() -> Self { P { x: 0.0 } }\n}\n";
        let out = lower(source);
        let names: Vec<String> = crate::signature::extract(source)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["P_scaled", "P_origin"]);
        assert_eq!(out.exports, names.len());
        for name in &names {
            assert!(out.source.contains(&format!("fn {}(", name)) || out.source.contains(&format!("fn {} (", name)));
        }
    }

    #[test]
    fn test_generic_fn_skipped() {
        let out = lower("#[export]\nfn id<T>(x: T) -> T { x }\n");
        assert_eq!(out.exports, 0);
        assert_eq!(out.source, "\nfn id<T>(x: T) -> T { x }\n");
    }

    #[test]
    fn test_edition_2024_attribute() {
        let out = lower_exports("#[export]\nfn f() {}\n", &markers(), "2024").unwrap();
        assert!(out.source.starts_with("#[unsafe(no_mangle)]\npub extern \"C\" fn f()"));
    }

    #[test]
    fn test_unmarked_source_unchanged() {
        let source = "fn a() {}\nstruct S;\n";
        let out = lower(source);
        assert_eq!(out.source, source);
        assert_eq!(out.exports, 0);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            lower_exports("fn broken( {", &markers(), "2021"),
            Err(LoweringError::Syn(_))
        ));
    }
}

//! FFI Module Tests

use super::*;
use crate::error::Error;
use crate::signature::{FunctionSignature, Param};
use crate::types::{HostType, TypeDesc, Value};

fn signature(name: &str, params: &[(&str, &str)], ret: &str) -> FunctionSignature {
    FunctionSignature {
        name: name.to_string(),
        params: params.iter().map(|(n, t)| Param::new(*n, *t)).collect(),
        return_type: ret.to_string(),
        is_generic: false,
        generic_params: Vec::new(),
    }
}

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn test_descriptor_from_signature() {
    let sig = signature("add", &[("a", "i32"), ("b", "i32")], "i32");
    let desc = FunctionDescriptor::from_signature(&sig, 0x1000, 3).unwrap();
    assert_eq!(desc.params, vec![HostType::Int32, HostType::Int32]);
    assert_eq!(desc.ret, TypeDesc::Scalar(HostType::Int32));
    assert_eq!(desc.fast_path, Some(FastPath::IntBinary));
    assert_eq!(desc.library, 3);
    assert_eq!(desc.arity(), 2);
}

#[test]
fn test_descriptor_fast_paths() {
    let fast = |params: &[(&str, &str)], ret: &str| {
        FunctionDescriptor::from_signature(&signature("f", params, ret), 1, 1)
            .unwrap()
            .fast_path
    };
    assert_eq!(fast(&[("x", "u8")], "bool"), Some(FastPath::IntUnary));
    assert_eq!(fast(&[("x", "f64")], "f64"), Some(FastPath::F64Unary));
    assert_eq!(fast(&[("x", "f64"), ("y", "f64")], "f64"), Some(FastPath::F64Binary));
    assert_eq!(fast(&[("x", "f32")], "f32"), None);
    assert_eq!(fast(&[("x", "i32"), ("y", "f64")], "f64"), None);
    assert_eq!(fast(&[], "()"), None);
    assert_eq!(fast(&[("x", "i32")], "Option<i32>"), None);
}

#[test]
fn test_descriptor_rejections() {
    let reject = |sig: FunctionSignature| FunctionDescriptor::from_signature(&sig, 1, 1).unwrap_err();

    assert!(reject(signature("f", &[("s", "String")], "()")).contains("`s`"));
    assert!(reject(signature("f", &[], "Vec<u8>")).contains("Vec<u8>"));
    assert!(reject(signature("f", &[("u", "()")], "()")).contains("`u`"));

    let five: Vec<(&str, &str)> = vec![("a", "u8"); 5];
    assert!(reject(signature("f", &five, "u8")).contains("limit of 4"));
    let three: Vec<(&str, &str)> = vec![("a", "u8"); 3];
    assert!(reject(signature("f", &three, "Result<u8, u8>")).contains("limit of 2"));

    let mut generic = signature("g", &[("x", "T")], "T");
    generic.is_generic = true;
    generic.generic_params = vec!["T".to_string()];
    assert!(reject(generic).contains("generic"));
}

// ============================================================================
// Dispatch table without libraries
// ============================================================================

#[test]
fn test_unknown_function() {
    let table = DispatchTable::new();
    let registry = LibraryRegistry::new();
    assert!(matches!(
        table.call(&registry, "missing", &[]),
        Err(Error::FunctionNotFound(name)) if name == "missing"
    ));
    assert!(table.is_empty());
}

#[test]
fn test_stale_descriptor() {
    let mut table = DispatchTable::new();
    let desc =
        FunctionDescriptor::from_signature(&signature("f", &[], "u8"), 0x1000, 42).unwrap();
    table.insert(desc);
    assert_eq!(table.names(), vec!["f"]);

    let registry = LibraryRegistry::new();
    assert!(matches!(
        table.call(&registry, "f", &[]),
        Err(Error::StaleHandle(42))
    ));
    assert_eq!(table.remove_library(42), 1);
    assert!(table.get("f").is_none());
}

#[test]
fn test_unloading_shadowing_library_restores_previous() {
    let descriptor = |library: u64, address: usize| {
        FunctionDescriptor::from_signature(&signature("f", &[], "u8"), address, library).unwrap()
    };
    let mut table = DispatchTable::new();
    table.insert(descriptor(1, 0x1000));
    table.insert(descriptor(2, 0x2000));
    table.insert(descriptor(3, 0x3000));
    assert_eq!(table.get("f").unwrap().library, 3);
    assert_eq!(table.owner("f"), Some(3));

    // dropping a hidden registration leaves the active one alone
    assert_eq!(table.remove_library(2), 0);
    assert_eq!(table.get("f").unwrap().library, 3);

    assert_eq!(table.remove_library(3), 1);
    let restored = table.get("f").unwrap();
    assert_eq!(restored.library, 1);
    assert_eq!(restored.address, 0x1000);

    assert_eq!(table.remove_library(1), 1);
    assert!(table.is_empty());
    assert_eq!(table.owner("f"), None);
}

#[test]
fn test_reregistering_same_library_does_not_shadow() {
    let mut table = DispatchTable::new();
    for address in [0x1000, 0x2000] {
        let desc = FunctionDescriptor::from_signature(&signature("f", &[], "u8"), address, 7)
            .unwrap();
        table.insert(desc);
    }
    assert_eq!(table.get("f").unwrap().address, 0x2000);
    assert_eq!(table.remove_library(7), 1);
    assert!(table.get("f").is_none());
}

#[test]
fn test_registry_missing_file() {
    let mut registry = LibraryRegistry::new();
    let result = registry.load(std::path::Path::new("/nonexistent/libnothing.so"));
    assert!(matches!(result, Err(Error::LibraryLoad { .. })));
    assert!(registry.is_empty());
}

#[test]
fn test_library_filename() {
    let name = library_filename("demo");
    assert!(name.contains("demo"));
    assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
    assert!(name.starts_with(std::env::consts::DLL_PREFIX));
}

// ============================================================================
// Real library: the C runtime already mapped into the test process
// ============================================================================

#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod libc_backed {
    use std::path::PathBuf;

    use super::*;

    fn libc_path() -> Option<PathBuf> {
        let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
        maps.lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .find(|path| path.contains("/libc.so") || path.contains("/libc-"))
            .map(PathBuf::from)
    }

    fn libc_signatures() -> Vec<FunctionSignature> {
        vec![
            signature("abs", &[("x", "c_int")], "c_int"),
            signature("labs", &[("x", "i64")], "i64"),
            signature("toupper", &[("c", "i32")], "i32"),
            signature("copysign", &[("x", "f64"), ("y", "f64")], "f64"),
            signature("ldexp", &[("x", "f64"), ("e", "i32")], "f64"),
            signature("strlen", &[("s", "&str")], "usize"),
            signature("nativecall_surely_absent", &[], "()"),
        ]
    }

    #[test]
    fn test_load_is_idempotent() {
        let Some(path) = libc_path() else { return };
        let mut registry = LibraryRegistry::new();
        let first = registry.load(&path).unwrap();
        let second = registry.load(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        let addr = registry.resolve(&first, "abs").unwrap();
        assert_ne!(addr, 0);
        assert_eq!(registry.resolve(&first, "abs").unwrap(), addr);
        assert_eq!(registry.get(&first).unwrap().cached_symbols(), 1);
        assert!(matches!(
            registry.resolve(&first, "nativecall_surely_absent"),
            Err(Error::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn test_dispatch_calls() {
        let Some(path) = libc_path() else { return };
        let mut registry = LibraryRegistry::new();
        let handle = registry.load(&path).unwrap();

        let mut table = DispatchTable::new();
        let registered = table
            .register_library(&registry, &handle, &libc_signatures())
            .unwrap();
        assert_eq!(registered, 5);
        assert!(table.get("nativecall_surely_absent").is_none());
        assert!(table.rejected("strlen").is_some());

        assert_eq!(table.call(&registry, "abs", &[Value::I32(-17)]).unwrap(), Value::I32(17));
        assert_eq!(
            table.call(&registry, "labs", &[Value::I64(-1 << 40)]).unwrap(),
            Value::I64(1 << 40)
        );
        assert_eq!(
            table.call(&registry, "toupper", &[Value::I32('q' as i32)]).unwrap(),
            Value::I32('Q' as i32)
        );
        assert_eq!(
            table
                .call(&registry, "copysign", &[Value::F64(2.5), Value::F64(-0.0)])
                .unwrap(),
            Value::F64(-2.5)
        );
        // mixed classes take the generic chain
        assert_eq!(table.get("ldexp").unwrap().fast_path, None);
        assert_eq!(
            table
                .call(&registry, "ldexp", &[Value::F64(1.5), Value::I32(4)])
                .unwrap(),
            Value::F64(24.0)
        );
    }

    #[test]
    fn test_dispatch_checks_before_calling() {
        let Some(path) = libc_path() else { return };
        let mut registry = LibraryRegistry::new();
        let handle = registry.load(&path).unwrap();
        let mut table = DispatchTable::new();
        table
            .register_library(&registry, &handle, &libc_signatures())
            .unwrap();

        assert!(matches!(
            table.call(&registry, "abs", &[]),
            Err(Error::ArityMismatch { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            table.call(&registry, "abs", &[Value::I64(1)]),
            Err(Error::ArgumentType { index: 0, .. })
        ));
        assert!(matches!(
            table.call(&registry, "strlen", &[Value::Ptr(0)]),
            Err(Error::UnsupportedSignature { .. })
        ));
    }

    #[test]
    fn test_remove_library_clears_rejections_and_restores() {
        let Some(path) = libc_path() else { return };
        let mut registry = LibraryRegistry::new();
        let handle = registry.load(&path).unwrap();

        let mut table = DispatchTable::new();
        let earlier =
            FunctionDescriptor::from_signature(&signature("strlen", &[], "usize"), 0x1000, 9999)
                .unwrap();
        table.insert(earlier);
        table
            .register_library(&registry, &handle, &libc_signatures())
            .unwrap();
        assert!(table.get("strlen").is_none());
        assert_eq!(table.owner("strlen"), Some(handle.id()));

        table.remove_library(handle.id());
        assert!(table.rejected("strlen").is_none());
        assert_eq!(table.get("strlen").unwrap().library, 9999);
        assert!(matches!(
            table.call(&registry, "abs", &[Value::I32(1)]),
            Err(Error::FunctionNotFound(_))
        ));

        table.remove_library(9999);
        assert!(matches!(
            table.call(&registry, "strlen", &[]),
            Err(Error::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_unload_makes_handles_stale() {
        let Some(path) = libc_path() else { return };
        let mut registry = LibraryRegistry::new();
        let handle = registry.load(&path).unwrap();
        let copy = handle.clone();

        let mut table = DispatchTable::new();
        table
            .register_library(&registry, &handle, &libc_signatures())
            .unwrap();

        let id = handle.id();
        registry.unload(handle).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.resolve(&copy, "abs"), Err(Error::StaleHandle(i)) if i == id));
        assert!(matches!(
            table.call(&registry, "abs", &[Value::I32(1)]),
            Err(Error::StaleHandle(_))
        ));
        assert!(matches!(registry.unload(copy), Err(Error::StaleHandle(_))));

        // a fresh load gets a new id
        let again = registry.load(&path).unwrap();
        assert_ne!(again.id(), id);
    }
}

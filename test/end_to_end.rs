//! End-to-end tests: source text through rustc, the cache and a native call
//!
//! Every test returns early when no `rustc` is on PATH.

use std::path::Path;

use nativecall::{Error, NativecallConfig, Session, Value};

const ARITHMETIC: &str = r#"
#[export]
fn add(a: i32, b: i32) -> i32 {
    a + b
}

#[export]
pub fn scale(x: f64, factor: f64) -> f64 {
    x * factor
}

#[export]
fn is_even(n: u64) -> bool {
    n % 2 == 0
}

#[export]
fn checked_div(a: u32, b: u32) -> Result<u32, u8> {
    if b == 0 {
        Err(7)
    } else {
        Ok(a / b)
    }
}

#[export]
fn first_digit(n: u64) -> Option<u8> {
    if n == 0 {
        None
    } else {
        let mut n = n;
        while n >= 10 {
            n /= 10;
        }
        Some(n as u8)
    }
}

fn helper_not_exported() -> i32 {
    1
}
"#;

const COUNTER: &str = r#"
pub struct Counter {
    n: u32,
}

impl Counter {
    #[export]
    pub fn new(start: u32) -> Self {
        Counter { n: start }
    }

    #[export]
    pub fn bump(&mut self, by: u32) -> u32 {
        self.n += by;
        self.n
    }

    #[export]
    pub fn get(&self) -> u32 {
        self.n
    }
}
"#;

fn have_rustc() -> bool {
    which::which("rustc").is_ok()
}

fn session(cache: &Path) -> Session {
    let mut config = NativecallConfig::default();
    config.cache.dir = Some(cache.to_path_buf());
    Session::new(config)
}

// ============================================================================
// Successful builds
// ============================================================================

#[test]
fn test_add_and_rebuild_free_second_compile() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();

    let first = session(cache.path());
    let unit = first.compile(ARITHMETIC).unwrap();
    assert!(!unit.from_cache);
    assert!(unit.artifact.exists());
    assert_eq!(
        first.call("add", &[Value::I32(10), Value::I32(20)]).unwrap(),
        Value::I32(30)
    );
    assert_eq!(first.stats().builds, 1);
    assert_eq!(first.stats().cache_misses, 1);

    let second = session(cache.path());
    let unit = second.compile(ARITHMETIC).unwrap();
    assert!(unit.from_cache);
    assert_eq!(second.stats().builds, 0);
    assert_eq!(second.stats().cache_hits, 1);
    assert_eq!(
        second.call("add", &[Value::I32(10), Value::I32(20)]).unwrap(),
        Value::I32(30)
    );

    let entries = second.cache().entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].metadata.functions.contains(&"add".to_string()));
}

#[test]
fn test_scalar_calls() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    session.compile(ARITHMETIC).unwrap();

    assert_eq!(
        session.call("scale", &[Value::F64(1.5), Value::F64(4.0)]).unwrap(),
        Value::F64(6.0)
    );
    assert_eq!(session.call("is_even", &[Value::U64(10)]).unwrap(), Value::Bool(true));
    assert_eq!(session.call("is_even", &[Value::U64(7)]).unwrap(), Value::Bool(false));
    assert_eq!(
        session
            .call_with_strings("add", &["-5".to_string(), "12".to_string()])
            .unwrap(),
        Value::I32(7)
    );

    assert!(session.functions().iter().all(|f| f != "helper_not_exported"));
    assert!(matches!(
        session.call("helper_not_exported", &[]),
        Err(Error::FunctionNotFound(_))
    ));
}

#[test]
fn test_sum_type_returns() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    session.compile(ARITHMETIC).unwrap();

    assert_eq!(
        session.call("checked_div", &[Value::U32(84), Value::U32(2)]).unwrap(),
        Value::ok(Value::U32(42))
    );
    assert_eq!(
        session.call("checked_div", &[Value::U32(1), Value::U32(0)]).unwrap(),
        Value::err(Value::U8(7))
    );
    assert_eq!(
        session.call("first_digit", &[Value::U64(9071)]).unwrap(),
        Value::some(Value::U8(9))
    );
    assert_eq!(
        session.call("first_digit", &[Value::U64(0)]).unwrap(),
        Value::none()
    );
}

#[test]
fn test_argument_checks_before_native_call() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    session.compile(ARITHMETIC).unwrap();

    assert!(matches!(
        session.call("add", &[Value::I32(1)]),
        Err(Error::ArityMismatch { expected: 2, got: 1, .. })
    ));
    assert!(matches!(
        session.call("add", &[Value::I32(1), Value::F64(2.0)]),
        Err(Error::ArgumentType { index: 1, .. })
    ));
}

#[test]
fn test_unload_forgets_functions() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    let unit = session.compile(ARITHMETIC).unwrap();
    assert_eq!(session.stats().loaded_libraries, 1);

    session.unload(unit).unwrap();
    assert_eq!(session.stats().loaded_libraries, 0);
    assert!(session.functions().is_empty());
    assert!(session.call("add", &[Value::I32(1), Value::I32(2)]).is_err());

    // the artifact stays cached
    let unit = session.compile(ARITHMETIC).unwrap();
    assert!(unit.from_cache);
}

#[test]
fn test_impl_methods_through_this_pointer() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    let unit = session.compile(COUNTER).unwrap();
    assert_eq!(
        unit.function_names(),
        vec!["Counter_new", "Counter_bump", "Counter_get"]
    );

    let counter = session.call("Counter_new", &[Value::U32(5)]).unwrap();
    assert!(matches!(counter, Value::Ptr(p) if p != 0));
    assert_eq!(
        session
            .call("Counter_bump", &[counter.clone(), Value::U32(3)])
            .unwrap(),
        Value::U32(8)
    );
    assert_eq!(session.call("Counter_get", &[counter]).unwrap(), Value::U32(8));
}

#[test]
fn test_ownership_helpers() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut config = NativecallConfig::default();
    config.cache.dir = Some(cache.path().to_path_buf());
    config.exports.ownership_helpers = true;
    let session = Session::new(config);
    session.compile("#[export]\nfn one() -> i32 { 1 }\n").unwrap();

    let boxed = session.call("nc_box_new_f64", &[Value::F64(2.5)]).unwrap();
    assert_eq!(
        session.call("nc_box_get_f64", &[boxed.clone()]).unwrap(),
        Value::F64(2.5)
    );
    assert_eq!(session.call("nc_box_drop_f64", &[boxed]).unwrap(), Value::Unit);

    let shared = session.call("nc_rc_new_i64", &[Value::I64(7)]).unwrap();
    let again = session.call("nc_rc_clone_i64", &[shared.clone()]).unwrap();
    assert_eq!(again, shared);
    assert_eq!(
        session.call("nc_rc_count_i64", &[shared.clone()]).unwrap(),
        Value::Usize(2)
    );
    session.call("nc_rc_drop_i64", &[again]).unwrap();
    assert_eq!(
        session.call("nc_rc_count_i64", &[shared.clone()]).unwrap(),
        Value::Usize(1)
    );
    assert_eq!(session.call("nc_rc_get_i64", &[shared.clone()]).unwrap(), Value::I64(7));
    session.call("nc_rc_drop_i64", &[shared]).unwrap();

    assert_eq!(session.call("one", &[]).unwrap(), Value::I32(1));
}

// ============================================================================
// Failed builds
// ============================================================================

#[test]
fn test_unbalanced_brace_reports_hint_and_line() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    // the stray brace on line 5 is where rustc reports the error
    let source = "#[export]\nfn broken(a: i32) -> i32 {\n    a\n}\n}\n";

    let err = session.compile(source).unwrap_err();
    let failure = err.compile_failure().expect("compile failure");
    assert!(failure
        .hints()
        .iter()
        .any(|h| h.starts_with("unbalanced delimiter")));

    assert_eq!(failure.line(), Some(5));
    assert_eq!(failure.location().map(|l| l.column), Some(1));
    assert_eq!(failure.source, source);
    assert!(failure.render().contains("unbalanced delimiter"));

    assert!(session.cache().entries().is_empty());
    assert_eq!(session.stats().cache_misses, 1);
}

#[test]
fn test_warning_before_error_does_not_move_line() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    let source = "#[export]\nfn noisy(a: i32) -> i32 {\n    let unused = 1;\n    a\n}\n\n#[export]\nfn wrong(_a: i32) -> i32 {\n    \"text\"\n}\n";

    let err = session.compile(source).unwrap_err();
    let failure = err.compile_failure().expect("compile failure");
    assert_eq!(failure.line(), Some(9));
}

#[test]
fn test_type_error_is_not_cached() {
    if !have_rustc() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let session = session(cache.path());
    let source = "#[export]\nfn wrong(_a: i32) -> i32 {\n    \"text\"\n}\n";

    let err = session.compile(source).unwrap_err();
    let failure = err.compile_failure().expect("compile failure");
    assert_eq!(failure.line(), Some(3));
    assert!(failure.hints().iter().any(|h| h.starts_with("mismatched types")));

    // a second attempt rebuilds rather than hitting a poisoned entry
    assert!(session.compile(source).is_err());
    assert_eq!(session.stats().builds, 2);
}

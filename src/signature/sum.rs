//! Result / Option introspection on type text

use serde::Serialize;

use super::scanner::{matching_close, split_top_level};

/// A recognised sum-type instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SumType {
    Result { ok: String, err: String },
    Option { inner: String },
}

/// Decide whether `ty` is `Result<T, E>` or `Option<T>`
///
/// Accepts bare names and `std::` / `core::` paths. Single-argument
/// `Result` aliases such as `io::Result<T>` are not sum types here: their
/// error type is not visible in the text.
pub fn sum_type(ty: &str) -> Option<SumType> {
    let ty = ty.trim();
    let open = ty.find('<')?;
    let close = matching_close(ty, open)?;
    if close != ty.len() - 1 {
        return None;
    }

    let base = ty[..open].trim();
    let base = base
        .strip_prefix("::")
        .unwrap_or(base)
        .trim_start_matches("std::")
        .trim_start_matches("core::");
    let args = split_top_level(&ty[open + 1..close], ',');

    match (base, args.as_slice()) {
        ("Result" | "result::Result", [ok, err]) => Some(SumType::Result {
            ok: (*ok).to_string(),
            err: (*err).to_string(),
        }),
        ("Option" | "option::Option", [inner]) => Some(SumType::Option {
            inner: (*inner).to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_type_result() {
        assert_eq!(
            sum_type("Result<i32, String>"),
            Some(SumType::Result {
                ok: "i32".into(),
                err: "String".into()
            })
        );
    }

    #[test]
    fn test_sum_type_paths() {
        assert!(matches!(
            sum_type("std::result::Result<u8, u8>"),
            Some(SumType::Result { .. })
        ));
        assert_eq!(
            sum_type("core::option::Option<f64>"),
            Some(SumType::Option {
                inner: "f64".into()
            })
        );
    }

    #[test]
    fn test_sum_type_nested_args() {
        assert_eq!(
            sum_type("Result<HashMap<String, Vec<i32>>, (u8, u8)>"),
            Some(SumType::Result {
                ok: "HashMap<String, Vec<i32>>".into(),
                err: "(u8, u8)".into()
            })
        );
    }

    #[test]
    fn test_sum_type_rejects_others() {
        assert_eq!(sum_type("i32"), None);
        assert_eq!(sum_type("Vec<i32>"), None);
        assert_eq!(sum_type("io::Result<i32>"), None);
        assert_eq!(sum_type("Option<i32> extra"), None);
        assert_eq!(sum_type("Result<i32>"), None);
    }
}

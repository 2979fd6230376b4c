//! Signature Extractor
//!
//! Scans Rust source text for marker-annotated declarations and reports their
//! signatures without parsing the full grammar.
//!
//! # Recognised forms
//!
//! ```text
//! #[export]
//! pub fn add(a: i32, b: i32) -> i32 { a + b }
//!
//! #[no_mangle]
//! pub extern "C" fn scale<T: Copy>(x: T, factor: f64) -> f64 { ... }
//!
//! #[export]
//! pub struct Point { pub x: f64, pub y: f64 }
//!
//! impl Point {
//!     #[export]
//!     pub fn norm(&self) -> f64 { ... }   // reported as Point_norm(this: *const Point)
//! }
//! ```
//!
//! Other attributes, doc comments, visibility and `unsafe` / `extern "C"` /
//! `const` qualifiers may sit between the marker and the item. Markers inside
//! comments and string or character literals do not count. Declarations
//! that cannot be read are skipped and logged at debug level; extraction
//! never fails.

mod extract;
mod scanner;
mod sum;

pub use extract::{ExtractedItems, SignatureExtractor, DEFAULT_MARKERS};
pub use scanner::{matching_close, split_top_level};
pub use sum::{sum_type, SumType};

use serde::{Deserialize, Serialize};

/// A named parameter or field with its type text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Native type text, whitespace-normalized
    #[serde(rename = "type")]
    pub ty: String,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Signature of an exported function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<Param>,
    /// Return type text, `()` when the declaration has none
    pub return_type: String,
    pub is_generic: bool,
    /// Type and const generic names; lifetimes are excluded
    pub generic_params: Vec<String>,
}

impl FunctionSignature {
    /// Number of declared parameters (receivers excluded)
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Parameter type texts in declaration order
    pub fn param_types(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.ty.as_str())
    }

    /// Sum-type shape of the return type, if any
    pub fn return_sum_type(&self) -> Option<SumType> {
        sum_type(&self.return_type)
    }
}

impl std::fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn {}", self.name)?;
        if self.is_generic {
            write!(f, "<{}>", self.generic_params.join(", "))?;
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        write!(f, "({})", params.join(", "))?;
        if self.return_type != "()" {
            write!(f, " -> {}", self.return_type)?;
        }
        Ok(())
    }
}

/// Signature of an exported struct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructSignature {
    pub name: String,
    /// Named fields; tuple structs use `0`, `1`, ...
    pub fields: Vec<Param>,
    pub generic_params: Vec<String>,
}

impl StructSignature {
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

/// Extract function signatures with the default markers
pub fn extract(source: &str) -> Vec<FunctionSignature> {
    SignatureExtractor::new().extract(source)
}

//! Native ↔ host type table

use std::fmt;
use std::mem::{align_of, size_of};

use serde::{Deserialize, Serialize};

/// Host-side scalar types a native value can be translated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    /// Pointer-sized signed integer (`isize`)
    Int,
    /// Pointer-sized unsigned integer (`usize`)
    UInt,
    /// Raw pointer
    Ptr,
    /// The unit type
    Nothing,
}

/// How a value travels through the C calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiClass {
    Integer,
    Float32,
    Float64,
    Void,
}

impl HostType {
    pub fn size(self) -> usize {
        match self {
            HostType::Int8 | HostType::UInt8 | HostType::Bool => 1,
            HostType::Int16 | HostType::UInt16 => 2,
            HostType::Int32 | HostType::UInt32 | HostType::Float32 => 4,
            HostType::Int64 | HostType::UInt64 | HostType::Float64 => 8,
            HostType::Int | HostType::UInt | HostType::Ptr => size_of::<usize>(),
            HostType::Nothing => 0,
        }
    }

    /// Alignment inside a `#[repr(C)]` struct on this target
    pub fn align(self) -> usize {
        match self {
            HostType::Int8 | HostType::UInt8 | HostType::Bool | HostType::Nothing => 1,
            HostType::Int16 | HostType::UInt16 => align_of::<u16>(),
            HostType::Int32 | HostType::UInt32 => align_of::<u32>(),
            HostType::Float32 => align_of::<f32>(),
            HostType::Int64 | HostType::UInt64 => align_of::<u64>(),
            HostType::Float64 => align_of::<f64>(),
            HostType::Int | HostType::UInt | HostType::Ptr => align_of::<usize>(),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            HostType::Int8
                | HostType::Int16
                | HostType::Int32
                | HostType::Int64
                | HostType::UInt8
                | HostType::UInt16
                | HostType::UInt32
                | HostType::UInt64
                | HostType::Int
                | HostType::UInt
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            HostType::Int8 | HostType::Int16 | HostType::Int32 | HostType::Int64 | HostType::Int
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, HostType::Float32 | HostType::Float64)
    }

    pub fn abi_class(self) -> AbiClass {
        match self {
            HostType::Float32 => AbiClass::Float32,
            HostType::Float64 => AbiClass::Float64,
            HostType::Nothing => AbiClass::Void,
            _ => AbiClass::Integer,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(host_to_native(*self))
    }
}

/// Closed table of native type names; the first name per host type is the
/// canonical one returned by [`host_to_native`].
const NATIVE_TABLE: &[(&str, HostType)] = &[
    ("i8", HostType::Int8),
    ("i16", HostType::Int16),
    ("i32", HostType::Int32),
    ("i64", HostType::Int64),
    ("u8", HostType::UInt8),
    ("u16", HostType::UInt16),
    ("u32", HostType::UInt32),
    ("u64", HostType::UInt64),
    ("f32", HostType::Float32),
    ("f64", HostType::Float64),
    ("bool", HostType::Bool),
    ("isize", HostType::Int),
    ("usize", HostType::UInt),
    ("*mut core::ffi::c_void", HostType::Ptr),
    ("()", HostType::Nothing),
];

/// C type aliases, accepted on input only
const C_ALIASES: &[(&str, HostType)] = &[
    ("c_char", HostType::Int8),
    ("c_schar", HostType::Int8),
    ("c_uchar", HostType::UInt8),
    ("c_short", HostType::Int16),
    ("c_ushort", HostType::UInt16),
    ("c_int", HostType::Int32),
    ("c_uint", HostType::UInt32),
    ("c_longlong", HostType::Int64),
    ("c_ulonglong", HostType::UInt64),
    ("c_float", HostType::Float32),
    ("c_double", HostType::Float64),
    ("size_t", HostType::UInt),
    ("ssize_t", HostType::Int),
];

/// Host type for a native type name; `None` means the type is not in the
/// table and passes through untranslated.
pub fn native_to_host(name: &str) -> Option<HostType> {
    let name = name.trim();

    if let Some(pointee) = name.strip_prefix('*') {
        let pointee = pointee.trim_start();
        return (pointee.starts_with("const") || pointee.starts_with("mut"))
            .then_some(HostType::Ptr);
    }

    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(&(_, ty)) = NATIVE_TABLE.iter().find(|(n, _)| *n == compact) {
        return Some(ty);
    }

    let last = compact.rsplit("::").next().unwrap_or(&compact);
    C_ALIASES
        .iter()
        .find(|(n, _)| *n == last)
        .map(|&(_, ty)| ty)
}

/// Canonical native name for a host type
pub fn host_to_native(ty: HostType) -> &'static str {
    NATIVE_TABLE
        .iter()
        .find(|(_, t)| *t == ty)
        .map(|(n, _)| *n)
        .unwrap_or("()")
}

#[cfg(test)]
pub(crate) fn native_table() -> &'static [(&'static str, HostType)] {
    NATIVE_TABLE
}

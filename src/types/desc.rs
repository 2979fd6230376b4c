//! Resolved type descriptors

use std::fmt;

use serde::Serialize;

use super::host::{host_to_native, native_to_host, HostType};
use crate::signature::{sum_type, SumType};

/// A native type text resolved against the translation table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeDesc {
    Scalar(HostType),
    Result(HostType, HostType),
    Option(HostType),
    /// Not translatable; carried by name only
    Opaque(String),
}

impl TypeDesc {
    /// Resolve native type text
    ///
    /// Sum types translate only when every payload is a non-unit scalar.
    pub fn resolve(native: &str) -> TypeDesc {
        let native = native.trim();
        let payload = |ty: &str| native_to_host(ty).filter(|t| *t != HostType::Nothing);

        match sum_type(native) {
            Some(SumType::Result { ok, err }) => match (payload(&ok), payload(&err)) {
                (Some(ok), Some(err)) => TypeDesc::Result(ok, err),
                _ => TypeDesc::Opaque(native.to_string()),
            },
            Some(SumType::Option { inner }) => match payload(&inner) {
                Some(inner) => TypeDesc::Option(inner),
                None => TypeDesc::Opaque(native.to_string()),
            },
            None => native_to_host(native)
                .map(TypeDesc::Scalar)
                .unwrap_or_else(|| TypeDesc::Opaque(native.to_string())),
        }
    }

    pub fn is_translatable(&self) -> bool {
        !matches!(self, TypeDesc::Opaque(_))
    }

    pub fn is_sum(&self) -> bool {
        matches!(self, TypeDesc::Result(..) | TypeDesc::Option(_))
    }

    pub fn scalar(&self) -> Option<HostType> {
        match self {
            TypeDesc::Scalar(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Scalar(t) => f.write_str(host_to_native(*t)),
            TypeDesc::Result(ok, err) => {
                write!(f, "Result<{}, {}>", host_to_native(*ok), host_to_native(*err))
            }
            TypeDesc::Option(t) => write!(f, "Option<{}>", host_to_native(*t)),
            TypeDesc::Opaque(name) => f.write_str(name),
        }
    }
}

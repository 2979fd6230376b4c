//! Host value model

use std::fmt;

use super::host::HostType;

/// A value that can be passed to or returned from a native function
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Isize(isize),
    Usize(usize),
    /// Raw pointer value
    Ptr(usize),
    Unit,
    Result(Result<Box<Value>, Box<Value>>),
    Option(Option<Box<Value>>),
}

impl Value {
    pub fn ok(value: Value) -> Self {
        Value::Result(Ok(Box::new(value)))
    }

    pub fn err(value: Value) -> Self {
        Value::Result(Err(Box::new(value)))
    }

    pub fn some(value: Value) -> Self {
        Value::Option(Some(Box::new(value)))
    }

    pub fn none() -> Self {
        Value::Option(None)
    }

    /// Scalar host type; `None` for Result and Option values
    pub fn host_type(&self) -> Option<HostType> {
        Some(match self {
            Value::I8(_) => HostType::Int8,
            Value::I16(_) => HostType::Int16,
            Value::I32(_) => HostType::Int32,
            Value::I64(_) => HostType::Int64,
            Value::U8(_) => HostType::UInt8,
            Value::U16(_) => HostType::UInt16,
            Value::U32(_) => HostType::UInt32,
            Value::U64(_) => HostType::UInt64,
            Value::F32(_) => HostType::Float32,
            Value::F64(_) => HostType::Float64,
            Value::Bool(_) => HostType::Bool,
            Value::Isize(_) => HostType::Int,
            Value::Usize(_) => HostType::UInt,
            Value::Ptr(_) => HostType::Ptr,
            Value::Unit => HostType::Nothing,
            Value::Result(_) | Value::Option(_) => return None,
        })
    }

    /// Short kind name used in error messages
    pub fn kind(&self) -> String {
        match self {
            Value::Result(_) => "Result".to_string(),
            Value::Option(_) => "Option".to_string(),
            other => other
                .host_type()
                .map(|t| t.to_string())
                .unwrap_or_default(),
        }
    }

    /// Integer-register image: signed values sign-extend, floats use
    /// their bit pattern.
    pub fn to_bits(&self) -> Option<u64> {
        Some(match *self {
            Value::I8(v) => v as i64 as u64,
            Value::I16(v) => v as i64 as u64,
            Value::I32(v) => v as i64 as u64,
            Value::I64(v) => v as u64,
            Value::U8(v) => v as u64,
            Value::U16(v) => v as u64,
            Value::U32(v) => v as u64,
            Value::U64(v) => v,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
            Value::Bool(v) => v as u64,
            Value::Isize(v) => v as i64 as u64,
            Value::Usize(v) | Value::Ptr(v) => v as u64,
            Value::Unit => 0,
            Value::Result(_) | Value::Option(_) => return None,
        })
    }

    /// Rebuild a scalar from a register image, truncating to the width of `ty`
    pub fn from_bits(ty: HostType, bits: u64) -> Value {
        match ty {
            HostType::Int8 => Value::I8(bits as i8),
            HostType::Int16 => Value::I16(bits as i16),
            HostType::Int32 => Value::I32(bits as i32),
            HostType::Int64 => Value::I64(bits as i64),
            HostType::UInt8 => Value::U8(bits as u8),
            HostType::UInt16 => Value::U16(bits as u16),
            HostType::UInt32 => Value::U32(bits as u32),
            HostType::UInt64 => Value::U64(bits),
            HostType::Float32 => Value::F32(f32::from_bits(bits as u32)),
            HostType::Float64 => Value::F64(f64::from_bits(bits)),
            HostType::Bool => Value::Bool(bits as u8 != 0),
            HostType::Int => Value::Isize(bits as i64 as isize),
            HostType::UInt => Value::Usize(bits as usize),
            HostType::Ptr => Value::Ptr(bits as usize),
            HostType::Nothing => Value::Unit,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::Isize(v) => Some(v as i64),
            Value::Usize(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Parse command-line text as a value of the given type
    pub fn parse(text: &str, ty: HostType) -> Result<Value, String> {
        let text = text.trim();
        let bad = |e: &dyn fmt::Display| format!("cannot parse `{}` as {}: {}", text, ty, e);
        Ok(match ty {
            HostType::Int8 => Value::I8(text.parse().map_err(|e| bad(&e))?),
            HostType::Int16 => Value::I16(text.parse().map_err(|e| bad(&e))?),
            HostType::Int32 => Value::I32(text.parse().map_err(|e| bad(&e))?),
            HostType::Int64 => Value::I64(text.parse().map_err(|e| bad(&e))?),
            HostType::UInt8 => Value::U8(text.parse().map_err(|e| bad(&e))?),
            HostType::UInt16 => Value::U16(text.parse().map_err(|e| bad(&e))?),
            HostType::UInt32 => Value::U32(text.parse().map_err(|e| bad(&e))?),
            HostType::UInt64 => Value::U64(text.parse().map_err(|e| bad(&e))?),
            HostType::Float32 => Value::F32(text.parse().map_err(|e| bad(&e))?),
            HostType::Float64 => Value::F64(text.parse().map_err(|e| bad(&e))?),
            HostType::Bool => Value::Bool(text.parse().map_err(|e| bad(&e))?),
            HostType::Int => Value::Isize(text.parse().map_err(|e| bad(&e))?),
            HostType::UInt => Value::Usize(text.parse().map_err(|e| bad(&e))?),
            HostType::Ptr => {
                let digits = text.trim_start_matches("0x");
                let radix = if digits.len() == text.len() { 10 } else { 16 };
                Value::Ptr(usize::from_str_radix(digits, radix).map_err(|e| bad(&e))?)
            }
            HostType::Nothing => Value::Unit,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Isize(v) => write!(f, "{}", v),
            Value::Usize(v) => write!(f, "{}", v),
            Value::Ptr(v) => write!(f, "{:#x}", v),
            Value::Unit => write!(f, "()"),
            Value::Result(Ok(v)) => write!(f, "Ok({})", v),
            Value::Result(Err(v)) => write!(f, "Err({})", v),
            Value::Option(Some(v)) => write!(f, "Some({})", v),
            Value::Option(None) => write!(f, "None"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
    isize => Isize,
    usize => Usize,
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

//! Sum-type wire encoding
//!
//! Result and Option values cross the native boundary as `#[repr(C)]`
//! tagged structs:
//!
//! ```text
//! Result<T, E>  =>  { is_ok: u8, ok_value: T, err_value: E }
//! Option<T>     =>  { is_some: u8, value: T }
//! ```
//!
//! The tag is 1 for `Ok`/`Some` and 0 for `Err`/`None`. The inactive
//! payload is zeroed. Payloads use native byte order.

use thiserror::Error;

use super::desc::TypeDesc;
use super::host::HostType;
use super::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("invalid tag byte {0:#04x}, expected 0 or 1")]
    InvalidTag(u8),

    #[error("wire buffer too short: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("value of kind {got} does not fit wire type {expected}")]
    TypeMismatch { expected: String, got: String },

    #[error("`{0}` has no wire representation")]
    NotWireType(String),
}

/// Byte layout of a wire struct, matching `#[repr(C)]` on this target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLayout {
    pub size: usize,
    pub align: usize,
    /// Offset of the `ok_value` / `value` field
    pub ok_offset: usize,
    /// Offset of the `err_value` field (Result only)
    pub err_offset: Option<usize>,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

impl WireLayout {
    pub const TAG_OFFSET: usize = 0;

    /// Layout for a resolved type; scalars are laid out bare
    pub fn of(desc: &TypeDesc) -> Option<WireLayout> {
        match desc {
            TypeDesc::Scalar(t) => Some(WireLayout {
                size: t.size(),
                align: t.align(),
                ok_offset: 0,
                err_offset: None,
            }),
            TypeDesc::Result(ok, err) => {
                let ok_offset = align_up(1, ok.align());
                let err_offset = align_up(ok_offset + ok.size(), err.align());
                let align = ok.align().max(err.align());
                Some(WireLayout {
                    size: align_up(err_offset + err.size(), align),
                    align,
                    ok_offset,
                    err_offset: Some(err_offset),
                })
            }
            TypeDesc::Option(inner) => {
                let ok_offset = align_up(1, inner.align());
                let align = inner.align();
                Some(WireLayout {
                    size: align_up(ok_offset + inner.size(), align),
                    align,
                    ok_offset,
                    err_offset: None,
                })
            }
            TypeDesc::Opaque(_) => None,
        }
    }
}

/// Encode a value into its wire bytes
pub fn encode(value: &Value, desc: &TypeDesc) -> Result<Vec<u8>, WireError> {
    let layout = WireLayout::of(desc).ok_or_else(|| WireError::NotWireType(desc.to_string()))?;
    let mut buf = vec![0u8; layout.size];

    match (desc, value) {
        (TypeDesc::Scalar(t), v) => write_scalar(&mut buf, 0, *t, v, desc)?,
        (TypeDesc::Result(ok_ty, err_ty), Value::Result(result)) => match result {
            Ok(v) => {
                buf[WireLayout::TAG_OFFSET] = 1;
                write_scalar(&mut buf, layout.ok_offset, *ok_ty, v, desc)?;
            }
            Err(e) => {
                let offset = layout.err_offset.unwrap_or(layout.ok_offset);
                write_scalar(&mut buf, offset, *err_ty, e, desc)?;
            }
        },
        (TypeDesc::Option(inner), Value::Option(option)) => {
            if let Some(v) = option {
                buf[WireLayout::TAG_OFFSET] = 1;
                write_scalar(&mut buf, layout.ok_offset, *inner, v, desc)?;
            }
        }
        (_, v) => {
            return Err(WireError::TypeMismatch {
                expected: desc.to_string(),
                got: v.kind(),
            })
        }
    }

    Ok(buf)
}

/// Decode wire bytes into a value
pub fn decode(bytes: &[u8], desc: &TypeDesc) -> Result<Value, WireError> {
    let layout = WireLayout::of(desc).ok_or_else(|| WireError::NotWireType(desc.to_string()))?;
    if bytes.len() < layout.size {
        return Err(WireError::Truncated {
            expected: layout.size,
            got: bytes.len(),
        });
    }

    match desc {
        TypeDesc::Scalar(t) => Ok(read_scalar(bytes, 0, *t)),
        TypeDesc::Result(ok_ty, err_ty) => match bytes[WireLayout::TAG_OFFSET] {
            1 => Ok(Value::ok(read_scalar(bytes, layout.ok_offset, *ok_ty))),
            0 => {
                let offset = layout.err_offset.unwrap_or(layout.ok_offset);
                Ok(Value::err(read_scalar(bytes, offset, *err_ty)))
            }
            tag => Err(WireError::InvalidTag(tag)),
        },
        TypeDesc::Option(inner) => match bytes[WireLayout::TAG_OFFSET] {
            1 => Ok(Value::some(read_scalar(bytes, layout.ok_offset, *inner))),
            0 => Ok(Value::none()),
            tag => Err(WireError::InvalidTag(tag)),
        },
        TypeDesc::Opaque(name) => Err(WireError::NotWireType(name.clone())),
    }
}

fn write_scalar(
    buf: &mut [u8],
    offset: usize,
    ty: HostType,
    value: &Value,
    desc: &TypeDesc,
) -> Result<(), WireError> {
    if value.host_type() != Some(ty) {
        return Err(WireError::TypeMismatch {
            expected: desc.to_string(),
            got: value.kind(),
        });
    }

    let size = ty.size();
    let dst = &mut buf[offset..offset + size];
    match *value {
        Value::F32(v) => dst.copy_from_slice(&v.to_ne_bytes()),
        Value::F64(v) => dst.copy_from_slice(&v.to_ne_bytes()),
        Value::Unit => {}
        ref v => {
            // integers: the low `size` bytes of the register image
            let bits = v.to_bits().unwrap_or_default();
            let bytes = bits.to_ne_bytes();
            if cfg!(target_endian = "little") {
                dst.copy_from_slice(&bytes[..size]);
            } else {
                dst.copy_from_slice(&bytes[8 - size..]);
            }
        }
    }
    Ok(())
}

fn read_scalar(bytes: &[u8], offset: usize, ty: HostType) -> Value {
    let size = ty.size();
    let src = &bytes[offset..offset + size];
    let mut image = [0u8; 8];
    if cfg!(target_endian = "little") {
        image[..size].copy_from_slice(src);
    } else {
        image[8 - size..].copy_from_slice(src);
    }
    let raw = u64::from_ne_bytes(image);

    // sign-extend narrow signed integers before widening
    let bits = if ty.is_signed() && size < 8 {
        let shift = 64 - size as u32 * 8;
        (((raw << shift) as i64) >> shift) as u64
    } else {
        raw
    };
    Value::from_bits(ty, bits)
}

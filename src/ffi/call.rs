//! Typed native calls
//!
//! Rust needs the exact function pointer type at compile time, so calls are
//! routed through a chain of generic steps. Each step inspects the next
//! argument's ABI class and recurses with that concrete type added, until
//! the final step transmutes the address to `extern "C" fn(A, B, ..) -> R`.
//!
//! Integer-class arguments travel as `u64` register images (sign- or
//! zero-extended), floats as `f32`/`f64`. Scalar integer returns are read
//! as `u64` and truncated to the declared width. Result/Option returns use
//! a `#[repr(C)]` stand-in struct with the same size and field classes as
//! the generated wrapper struct.

use std::mem::{size_of, transmute_copy};

use crate::error::{Error, Result};
use crate::types::{decode, AbiClass, HostType, TypeDesc, Value, WireLayout};

/// Most arguments a scalar-returning call may take
pub const MAX_ARITY: usize = 4;

/// Most arguments a Result/Option-returning call may take
pub const MAX_SUM_ARITY: usize = 2;

/// One argument after classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Slot {
    I(u64),
    F32(f32),
    F64(f64),
}

impl Slot {
    /// Classify `value` for a parameter of type `ty`
    pub(crate) fn of(value: &Value, ty: HostType) -> Option<Slot> {
        match (ty.abi_class(), value) {
            (AbiClass::Float32, Value::F32(v)) => Some(Slot::F32(*v)),
            (AbiClass::Float64, Value::F64(v)) => Some(Slot::F64(*v)),
            (AbiClass::Integer, v) => v.to_bits().map(Slot::I),
            _ => None,
        }
    }
}

macro_rules! with_slot {
    ($slot:expr, |$v:ident| $body:expr) => {
        match $slot {
            Slot::I($v) => $body,
            Slot::F32($v) => $body,
            Slot::F64($v) => $body,
        }
    };
}

unsafe fn step0<R: Copy>(addr: usize, slots: &[Slot]) -> R {
    match slots.split_first() {
        None => transmute_copy::<usize, extern "C" fn() -> R>(&addr)(),
        Some((&s, rest)) => with_slot!(s, |a| step1::<R, _>(addr, rest, a)),
    }
}

unsafe fn step1<R: Copy, A: Copy>(addr: usize, slots: &[Slot], a: A) -> R {
    match slots.split_first() {
        None => transmute_copy::<usize, extern "C" fn(A) -> R>(&addr)(a),
        Some((&s, rest)) => with_slot!(s, |b| step2::<R, A, _>(addr, rest, a, b)),
    }
}

unsafe fn step2<R: Copy, A: Copy, B: Copy>(addr: usize, slots: &[Slot], a: A, b: B) -> R {
    match slots.split_first() {
        None => transmute_copy::<usize, extern "C" fn(A, B) -> R>(&addr)(a, b),
        Some((&s, rest)) => with_slot!(s, |c| step3::<R, A, B, _>(addr, rest, a, b, c)),
    }
}

unsafe fn step3<R: Copy, A: Copy, B: Copy, C: Copy>(
    addr: usize,
    slots: &[Slot],
    a: A,
    b: B,
    c: C,
) -> R {
    match slots.first() {
        None => transmute_copy::<usize, extern "C" fn(A, B, C) -> R>(&addr)(a, b, c),
        Some(&s) => with_slot!(s, |d| step4::<R, A, B, C, _>(addr, a, b, c, d)),
    }
}

unsafe fn step4<R: Copy, A: Copy, B: Copy, C: Copy, D: Copy>(
    addr: usize,
    a: A,
    b: B,
    c: C,
    d: D,
) -> R {
    transmute_copy::<usize, extern "C" fn(A, B, C, D) -> R>(&addr)(a, b, c, d)
}

// Sum returns multiply the instantiations by every payload pairing, so
// they get a shorter chain.

unsafe fn sum_step0<R: Copy>(addr: usize, slots: &[Slot]) -> R {
    match slots.split_first() {
        None => transmute_copy::<usize, extern "C" fn() -> R>(&addr)(),
        Some((&s, rest)) => with_slot!(s, |a| sum_step1::<R, _>(addr, rest, a)),
    }
}

unsafe fn sum_step1<R: Copy, A: Copy>(addr: usize, slots: &[Slot], a: A) -> R {
    match slots.first() {
        None => transmute_copy::<usize, extern "C" fn(A) -> R>(&addr)(a),
        Some(&s) => with_slot!(s, |b| sum_step2::<R, A, _>(addr, a, b)),
    }
}

unsafe fn sum_step2<R: Copy, A: Copy, B: Copy>(addr: usize, a: A, b: B) -> R {
    transmute_copy::<usize, extern "C" fn(A, B) -> R>(&addr)(a, b)
}

/// Stand-in for a generated `CResult_<name>` struct
#[repr(C)]
#[derive(Clone, Copy)]
struct WireResult<T, E> {
    tag: u8,
    ok: T,
    err: E,
}

/// Stand-in for a generated `COption_<name>` struct
#[repr(C)]
#[derive(Clone, Copy)]
struct WireOption<T> {
    tag: u8,
    value: T,
}

/// Fixed-width payload that can be written into a wire buffer
trait Payload: Copy {
    fn put(self, dst: &mut [u8]);
}

macro_rules! impl_payload {
    ($($t:ty),*) => {
        $(impl Payload for $t {
            fn put(self, dst: &mut [u8]) {
                dst[..size_of::<$t>()].copy_from_slice(&self.to_ne_bytes());
            }
        })*
    };
}

impl_payload!(u8, u16, u32, u64, f32, f64);

impl<T: Payload, E: Payload> WireResult<T, E> {
    fn to_wire(self, layout: &WireLayout) -> Vec<u8> {
        let mut buf = vec![0u8; layout.size];
        buf[WireLayout::TAG_OFFSET] = self.tag;
        self.ok.put(&mut buf[layout.ok_offset..]);
        self.err
            .put(&mut buf[layout.err_offset.unwrap_or(layout.ok_offset)..]);
        buf
    }
}

impl<T: Payload> WireOption<T> {
    fn to_wire(self, layout: &WireLayout) -> Vec<u8> {
        let mut buf = vec![0u8; layout.size];
        buf[WireLayout::TAG_OFFSET] = self.tag;
        self.value.put(&mut buf[layout.ok_offset..]);
        buf
    }
}

/// Bind `$T` to the representative type sharing `ty`'s size and class
macro_rules! with_repr {
    ($ty:expr, $T:ident => $body:expr) => {
        match ($ty.is_float(), $ty.size()) {
            (true, 4) => {
                type $T = f32;
                $body
            }
            (true, _) => {
                type $T = f64;
                $body
            }
            (false, 1) => {
                type $T = u8;
                $body
            }
            (false, 2) => {
                type $T = u16;
                $body
            }
            (false, 4) => {
                type $T = u32;
                $body
            }
            _ => {
                type $T = u64;
                $body
            }
        }
    };
}

/// Classify `args` against `params`
pub(crate) fn classify(function: &str, params: &[HostType], args: &[Value]) -> Result<Vec<Slot>> {
    if params.len() != args.len() {
        return Err(Error::ArityMismatch {
            function: function.to_string(),
            expected: params.len(),
            got: args.len(),
        });
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (ty, value))| {
            if value.host_type() != Some(*ty) {
                return Err(Error::ArgumentType {
                    function: function.to_string(),
                    index,
                    expected: ty.to_string(),
                    got: value.kind(),
                });
            }
            Slot::of(value, *ty).ok_or_else(|| Error::ArgumentType {
                function: function.to_string(),
                index,
                expected: ty.to_string(),
                got: value.kind(),
            })
        })
        .collect()
}

/// Invoke the native function at `address`
///
/// # Safety
///
/// `address` must point to a live `extern "C"` function whose parameters
/// match `slots` and whose return type matches `ret`.
pub(crate) unsafe fn invoke(address: usize, ret: &TypeDesc, slots: &[Slot]) -> Result<Value> {
    match ret {
        TypeDesc::Scalar(ty) => {
            if slots.len() > MAX_ARITY {
                return Err(Error::TooManyArgs(slots.len()));
            }
            Ok(match ty.abi_class() {
                AbiClass::Void => {
                    step0::<()>(address, slots);
                    Value::Unit
                }
                AbiClass::Integer => Value::from_bits(*ty, step0::<u64>(address, slots)),
                AbiClass::Float32 => Value::F32(step0::<f32>(address, slots)),
                AbiClass::Float64 => Value::F64(step0::<f64>(address, slots)),
            })
        }
        TypeDesc::Result(ok, err) => {
            if slots.len() > MAX_SUM_ARITY {
                return Err(Error::TooManyArgs(slots.len()));
            }
            let layout = wire_layout(ret)?;
            let bytes = with_repr!(ok, T => with_repr!(err, E => {
                sum_step0::<WireResult<T, E>>(address, slots).to_wire(&layout)
            }));
            Ok(decode(&bytes, ret)?)
        }
        TypeDesc::Option(inner) => {
            if slots.len() > MAX_SUM_ARITY {
                return Err(Error::TooManyArgs(slots.len()));
            }
            let layout = wire_layout(ret)?;
            let bytes = with_repr!(inner, T => {
                sum_step0::<WireOption<T>>(address, slots).to_wire(&layout)
            });
            Ok(decode(&bytes, ret)?)
        }
        TypeDesc::Opaque(name) => Err(Error::UnsupportedSignature {
            function: format!("{:#x}", address),
            reason: format!("return type `{}` has no C representation", name),
        }),
    }
}

fn wire_layout(desc: &TypeDesc) -> Result<WireLayout> {
    WireLayout::of(desc).ok_or_else(|| crate::types::WireError::NotWireType(desc.to_string()).into())
}

/// Classify and invoke in one step
///
/// # Safety
///
/// `address` must point to a live `extern "C"` function taking exactly
/// `params` and returning `ret`.
pub unsafe fn call(
    address: usize,
    params: &[HostType],
    ret: &TypeDesc,
    args: &[Value],
) -> Result<Value> {
    let slots = classify(&format!("{:#x}", address), params, args)?;
    invoke(address, ret, &slots)
}

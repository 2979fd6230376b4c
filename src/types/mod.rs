//! Type Translator
//!
//! Maps native primitive type names to host types and back, models host
//! values, and encodes the Result/Option wire structs that carry sum types
//! across the C boundary.
//!
//! # Translation table
//!
//! ```text
//! i8 i16 i32 i64      <->  Int8  Int16  Int32  Int64
//! u8 u16 u32 u64      <->  UInt8 UInt16 UInt32 UInt64
//! f32 f64             <->  Float32 Float64
//! bool isize usize    <->  Bool Int UInt
//! *const T / *mut T    ->  Ptr
//! ()                  <->  Nothing
//! c_int, c_double...   ->  (one-way aliases)
//! ```
//!
//! Anything else is Unknown and passes through untranslated.

mod desc;
mod host;
mod value;
mod wire;

pub use desc::TypeDesc;
pub use host::{host_to_native, native_to_host, AbiClass, HostType};
pub use value::Value;
pub use wire::{decode, encode, WireError, WireLayout};

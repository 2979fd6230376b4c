//! Dispatch table
//!
//! Function descriptors are built once, when a library is registered. A
//! call looks its descriptor up by name, checks arity and argument kinds,
//! and only then touches native code.

use std::collections::HashMap;
use std::mem::transmute_copy;

use log::{debug, info};

use super::call::{classify, invoke, Slot, MAX_ARITY, MAX_SUM_ARITY};
use super::registry::{LibraryHandle, LibraryRegistry};
use crate::error::{Error, Result};
use crate::signature::FunctionSignature;
use crate::types::{AbiClass, HostType, TypeDesc, Value};

/// Direct call shapes that skip the generic step chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPath {
    /// `fn(int) -> int`
    IntUnary,
    /// `fn(int, int) -> int`
    IntBinary,
    /// `fn(f64) -> f64`
    F64Unary,
    /// `fn(f64, f64) -> f64`
    F64Binary,
}

impl FastPath {
    pub fn select(params: &[HostType], ret: &TypeDesc) -> Option<FastPath> {
        let ret = ret.scalar()?.abi_class();
        let all = |class: AbiClass| params.iter().all(|p| p.abi_class() == class);
        match (ret, params.len()) {
            (AbiClass::Integer, 1) if all(AbiClass::Integer) => Some(FastPath::IntUnary),
            (AbiClass::Integer, 2) if all(AbiClass::Integer) => Some(FastPath::IntBinary),
            (AbiClass::Float64, 1) if all(AbiClass::Float64) => Some(FastPath::F64Unary),
            (AbiClass::Float64, 2) if all(AbiClass::Float64) => Some(FastPath::F64Binary),
            _ => None,
        }
    }

    /// `None` when `slots` do not have this shape
    ///
    /// # Safety
    ///
    /// `address` must be a live function of this shape.
    unsafe fn call(self, address: usize, ret: HostType, slots: &[Slot]) -> Option<Value> {
        let value = match (self, slots) {
            (FastPath::IntUnary, [Slot::I(a)]) => {
                let f = transmute_copy::<usize, extern "C" fn(u64) -> u64>(&address);
                Value::from_bits(ret, f(*a))
            }
            (FastPath::IntBinary, [Slot::I(a), Slot::I(b)]) => {
                let f = transmute_copy::<usize, extern "C" fn(u64, u64) -> u64>(&address);
                Value::from_bits(ret, f(*a, *b))
            }
            (FastPath::F64Unary, [Slot::F64(a)]) => {
                let f = transmute_copy::<usize, extern "C" fn(f64) -> f64>(&address);
                Value::F64(f(*a))
            }
            (FastPath::F64Binary, [Slot::F64(a), Slot::F64(b)]) => {
                let f = transmute_copy::<usize, extern "C" fn(f64, f64) -> f64>(&address);
                Value::F64(f(*a, *b))
            }
            _ => return None,
        };
        Some(value)
    }
}

/// Everything needed to call one exported function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub params: Vec<HostType>,
    pub ret: TypeDesc,
    pub address: usize,
    /// Id of the owning library
    pub library: u64,
    pub fast_path: Option<FastPath>,
}

impl FunctionDescriptor {
    /// Build a descriptor, or say why the signature cannot be called
    pub fn from_signature(
        signature: &FunctionSignature,
        address: usize,
        library: u64,
    ) -> std::result::Result<Self, String> {
        if signature.is_generic {
            return Err("generic functions have no single native symbol".to_string());
        }

        let params = signature
            .params
            .iter()
            .map(|p| {
                TypeDesc::resolve(&p.ty)
                    .scalar()
                    .filter(|t| *t != HostType::Nothing)
                    .ok_or_else(|| {
                        format!("parameter `{}` has type `{}` with no C representation", p.name, p.ty)
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ret = TypeDesc::resolve(&signature.return_type);
        if !ret.is_translatable() {
            return Err(format!(
                "return type `{}` has no C representation",
                signature.return_type
            ));
        }

        let limit = if ret.is_sum() { MAX_SUM_ARITY } else { MAX_ARITY };
        if params.len() > limit {
            return Err(format!(
                "{} parameters exceed the limit of {} for a `{}` return",
                params.len(),
                limit,
                ret
            ));
        }

        Ok(Self {
            name: signature.name.clone(),
            fast_path: FastPath::select(&params, &ret),
            params,
            ret,
            address,
            library,
        })
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Name-indexed descriptors for every registered function
///
/// When a later library exports a name that is already registered, the
/// newer descriptor answers calls and the older one is kept underneath.
/// Removing the newer library brings the older one back.
#[derive(Debug, Default)]
pub struct DispatchTable {
    functions: HashMap<String, FunctionDescriptor>,
    /// Older descriptors hidden by a newer registration, oldest first
    shadowed: HashMap<String, Vec<FunctionDescriptor>>,
    /// Exported but not callable: owning library and reason
    rejected: HashMap<String, (u64, String)>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signatures found in a library; returns how many are callable
    pub fn register_library(
        &mut self,
        registry: &LibraryRegistry,
        handle: &LibraryHandle,
        signatures: &[FunctionSignature],
    ) -> Result<usize> {
        let library = registry.get(handle)?;
        let mut registered = 0;

        for signature in signatures {
            let address = match library.symbol(&signature.name) {
                Ok(address) => address,
                Err(e) => {
                    debug!("skipping {}: {}", signature.name, e);
                    continue;
                }
            };
            match FunctionDescriptor::from_signature(signature, address, handle.id()) {
                Ok(descriptor) => {
                    self.insert(descriptor);
                    registered += 1;
                }
                Err(reason) => {
                    debug!("{} is not callable: {}", signature.name, reason);
                    if let Some(previous) = self.functions.remove(&signature.name) {
                        self.shadow(previous);
                    }
                    self.rejected
                        .insert(signature.name.clone(), (handle.id(), reason));
                }
            }
        }

        info!(
            "registered {} of {} functions from library #{}",
            registered,
            signatures.len(),
            handle.id()
        );
        Ok(registered)
    }

    pub fn insert(&mut self, descriptor: FunctionDescriptor) {
        self.rejected.remove(&descriptor.name);
        let library = descriptor.library;
        if let Some(previous) = self.functions.insert(descriptor.name.clone(), descriptor) {
            if previous.library != library {
                debug!("{} now shadows library #{}", previous.name, previous.library);
                self.shadow(previous);
            }
        }
    }

    fn shadow(&mut self, descriptor: FunctionDescriptor) {
        self.shadowed
            .entry(descriptor.name.clone())
            .or_default()
            .push(descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(name)
    }

    /// Call `name` with `args`
    ///
    /// The registry must be the one the library was registered from, and the
    /// caller must keep it borrowed for the duration of the call.
    pub fn call(&self, registry: &LibraryRegistry, name: &str, args: &[Value]) -> Result<Value> {
        let descriptor = match self.functions.get(name) {
            Some(descriptor) => descriptor,
            None => {
                return Err(match self.rejected.get(name) {
                    Some((_, reason)) => Error::UnsupportedSignature {
                        function: name.to_string(),
                        reason: reason.clone(),
                    },
                    None => Error::FunctionNotFound(name.to_string()),
                })
            }
        };
        if !registry.is_loaded(descriptor.library) {
            return Err(Error::StaleHandle(descriptor.library));
        }

        let slots = classify(name, &descriptor.params, args)?;

        // Safety: the address came from the live library, and `classify`
        // matched every argument to the declared parameter types.
        unsafe {
            if let (Some(fast), TypeDesc::Scalar(ret)) = (descriptor.fast_path, &descriptor.ret) {
                if let Some(value) = fast.call(descriptor.address, *ret, &slots) {
                    return Ok(value);
                }
            }
            invoke(descriptor.address, &descriptor.ret, &slots)
        }
    }

    /// Drop every descriptor and rejection owned by library `id`; names it
    /// shadowed fall back to the newest remaining registration
    pub fn remove_library(&mut self, id: u64) -> usize {
        let before = self.functions.len();
        self.functions.retain(|_, d| d.library != id);
        let removed = before - self.functions.len();
        self.rejected.retain(|_, (library, _)| *library != id);

        self.shadowed.retain(|_, older| {
            older.retain(|d| d.library != id);
            !older.is_empty()
        });
        let uncovered: Vec<String> = self
            .shadowed
            .keys()
            .filter(|name| {
                !self.functions.contains_key(*name) && !self.rejected.contains_key(*name)
            })
            .cloned()
            .collect();
        for name in uncovered {
            let Some(older) = self.shadowed.get_mut(&name) else {
                continue;
            };
            if let Some(restored) = older.pop() {
                debug!("{} falls back to library #{}", name, restored.library);
                self.functions.insert(name.clone(), restored);
            }
            if older.is_empty() {
                self.shadowed.remove(&name);
            }
        }
        removed
    }

    /// Library answering to `name`, whether callable or rejected
    pub fn owner(&self, name: &str) -> Option<u64> {
        self.functions
            .get(name)
            .map(|d| d.library)
            .or_else(|| self.rejected.get(name).map(|(library, _)| *library))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn rejected(&self, name: &str) -> Option<&str> {
        self.rejected.get(name).map(|(_, reason)| reason.as_str())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

//! Callee identities and best-effort symbol names
//!
//! A `CalleeId` is an opaque token stored in each ledger frame. It is only
//! ever used to tell a human which guarded call a frame belongs to.

use std::fmt;

/// Identity of a guarded callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalleeId {
    address: usize,
    type_name: Option<&'static str>,
}

impl CalleeId {
    /// Identity from a raw code address (function pointers, C callers)
    pub const fn from_addr(address: usize) -> Self {
        Self {
            address,
            type_name: None,
        }
    }

    /// Identity of a callable value, derived from its type
    ///
    /// Function items and closures each have a unique type, so the type name
    /// (`my_crate::parse`, `my_crate::main::{{closure}}`) identifies them
    /// without needing a code address. The address is a per-type anchor.
    pub fn of<F>(_callee: &F) -> Self {
        Self {
            address: type_anchor::<F> as fn() as usize,
            type_name: Some(std::any::type_name::<F>()),
        }
    }

    /// Identity of a function pointer
    pub fn of_fn_ptr(ptr: *const ()) -> Self {
        Self::from_addr(ptr as usize)
    }

    pub const fn address(&self) -> usize {
        self.address
    }

    pub const fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    /// Human-readable name: the type name when known, else the resolved
    /// symbol of the address
    pub fn name(&self) -> String {
        match self.type_name {
            Some(name) => name.to_string(),
            None => resolve_name(self.address),
        }
    }
}

impl fmt::Display for CalleeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x} = {}", self.address, self.name())
    }
}

#[inline(never)]
fn type_anchor<F>() {
    std::hint::black_box(std::any::type_name::<F>());
}

/// Resolve a code address to a symbol name, falling back to hex
pub fn resolve_name(address: usize) -> String {
    resolve_symbol(address).unwrap_or_else(|| format!("{address:#x}"))
}

/// Resolve a code address to a symbol name, if the symbolizer knows it
pub fn resolve_symbol(address: usize) -> Option<String> {
    if address == 0 {
        return None;
    }
    let mut name = None;
    backtrace::resolve(address as *mut std::ffi::c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name
}

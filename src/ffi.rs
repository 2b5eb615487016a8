//! C entry points
//!
//! Built into the `cdylib`, these let C and C++ code guard calls without a
//! Rust toolchain. A C caller wraps the invocation with a macro along the
//! lines of:
//!
//! ```c
//! typedef void* (*shst_f)(void*, void*, void*, void*, void*, void*, void*, void*);
//! #define shst_invoke(f, ...) \
//!     (typeof(f(__VA_ARGS__)))shst_invoke_impl((void*)f, ##__VA_ARGS__)
//! ```
//!
//! Callees take up to eight pointer-sized integer arguments and return one.

use std::ffi::c_void;

use crate::context;
use crate::error::ShadowError;
use crate::guard::{self, Guard};
use crate::stack_range::current_stack_pointer;
use crate::symbols::CalleeId;

/// Signature every guarded C callee is called through
pub type ShstFn = unsafe extern "C" fn(
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *mut c_void,
) -> *mut c_void;

/// Call `callee(x0, .., x7)` as a monitored call and return its result
///
/// A null `callee` is a fatal usage error.
///
/// # Safety
///
/// `callee` must point to a function that is ABI compatible with `ShstFn`
/// for the arguments it actually reads.
#[no_mangle]
#[inline(never)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn shst_invoke_impl(
    callee: *mut c_void,
    x0: *mut c_void,
    x1: *mut c_void,
    x2: *mut c_void,
    x3: *mut c_void,
    x4: *mut c_void,
    x5: *mut c_void,
    x6: *mut c_void,
    x7: *mut c_void,
) -> *mut c_void {
    if callee.is_null() {
        context::fatal(ShadowError::NullCallee.to_string());
    }
    // SAFETY: non-null, and the caller guarantees the signature.
    let function = unsafe { std::mem::transmute::<*mut c_void, ShstFn>(callee) };

    let _guard = Guard::enter(CalleeId::of_fn_ptr(callee as *const ()), current_stack_pointer());
    // SAFETY: forwarded from the caller's contract.
    unsafe { function(x0, x1, x2, x3, x4, x5, x6, x7) }
}

/// Stop checking stack bytes at or above `stack_pointer` on this thread
#[no_mangle]
pub extern "C" fn shst_ignore_above(stack_pointer: *const c_void) {
    guard::ignore_above(stack_pointer as usize);
}

/// Live ledger entries on the calling thread
#[no_mangle]
pub extern "C" fn shst_ledger_depth() -> usize {
    guard::ledger_depth()
}

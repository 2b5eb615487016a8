//! Scope guard around a monitored call
//!
//! Entering pushes the current frame onto the thread's ledger and checks the
//! stack; dropping checks again and pops. Because the exit half lives in
//! `Drop`, it also runs while a panic unwinds through the guarded call.
//!
//! # Example
//! ```
//! use shadowstack::config::{ReactionMode, ShadowConfig};
//!
//! let mut config = ShadowConfig::default();
//! config.reaction = ReactionMode::Ignore;
//! ShadowConfig::install(config);
//!
//! let sum = shadowstack::invoke(|| (1..=10).sum::<u32>());
//! assert_eq!(sum, 55);
//! assert_eq!(shadowstack::ledger_depth(), 0);
//! # ShadowConfig::clear_override();
//! ```
//!
//! # Precision
//!
//! The guarded region is everything between the stack pointer of a
//! dedicated, never-inlined frame and the previous checkpoint. Arguments
//! and results of the guarded callable travel through a heap cell, so the
//! caller's own frame is not written while the call is in flight. The
//! compiler may still spill registers of that dedicated frame after the
//! stack pointer was read; such spills are written before the pre-call
//! check and stay constant until the post-return check, so in practice they
//! do not show up as corruption, but nothing guarantees it.

use std::marker::PhantomData;

use crate::context;
use crate::mirror::Phase;
use crate::stack_range::current_stack_pointer;
use crate::symbols::CalleeId;

/// Live guarded call on the current thread
///
/// Zero sized, so holding it writes nothing into the monitored region.
/// Not `Send`: it must be dropped on the thread that created it.
#[must_use = "dropping the guard immediately ends the guarded section"]
pub struct Guard {
    _thread_bound: PhantomData<*const ()>,
}

impl Guard {
    /// Push the frame above `stack_pointer` and run the pre-call check
    #[inline(never)]
    pub fn enter(callee: CalleeId, stack_pointer: usize) -> Self {
        if context::push(callee, stack_pointer) {
            context::check(Phase::PreCall);
        }
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for Guard {
    #[inline(never)]
    fn drop(&mut self) {
        context::check(Phase::PostReturn);
        context::pop();
    }
}

struct Pending<F, R> {
    callee: Option<F>,
    result: Option<R>,
}

impl<F, R> Pending<F, R>
where
    F: FnOnce() -> R,
{
    #[inline(never)]
    fn run(&mut self) {
        if let Some(callee) = self.callee.take() {
            self.result = Some(callee());
        }
    }
}

#[inline(never)]
fn run_guarded<F, R>(callee: CalleeId, pending: &mut Pending<F, R>)
where
    F: FnOnce() -> R,
{
    let _guard = Guard::enter(callee, current_stack_pointer());
    pending.run();
}

/// Run `f` as a monitored call, identified by its type
pub fn invoke<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    invoke_as(CalleeId::of(&f), f)
}

/// Run `f` as a monitored call with an explicit identity
pub fn invoke_as<F, R>(callee: CalleeId, f: F) -> R
where
    F: FnOnce() -> R,
{
    let mut pending = Box::new(Pending {
        callee: Some(f),
        result: None,
    });
    run_guarded(callee, &mut pending);
    match pending.result.take() {
        Some(result) => result,
        None => unreachable!("guarded call returned without a result"),
    }
}

/// Stop checking stack bytes at or above `stack_pointer` on this thread
///
/// Returns whether the threshold moved. Addresses outside the thread stack
/// are ignored.
pub fn ignore_above(stack_pointer: usize) -> bool {
    context::ignore_above(stack_pointer)
}

/// Stop checking the caller's frame and everything above it
#[inline(always)]
pub fn ignore_above_here() -> bool {
    ignore_above(current_stack_pointer())
}

/// Live ledger entries on this thread, 0 before the first guarded call
pub fn ledger_depth() -> usize {
    context::ledger_depth()
}

//! Per-thread shadow context
//!
//! Each thread owns exactly one `ShadowMirror` over its native stack,
//! created the first time the thread enters a guarded call. Nothing is
//! shared between threads, so no locking is involved.

use std::cell::RefCell;

use crate::error::ShadowError;
use crate::logging;
use crate::mirror::{CheckOutcome, Frame, Phase, ShadowMirror};
use crate::stack_memory::{NativeStack, StackMemory};
use crate::symbols::CalleeId;

/// Shadow state of one thread
#[derive(Debug)]
pub struct ThreadContext {
    mirror: ShadowMirror<NativeStack>,
}

impl ThreadContext {
    fn new() -> Result<Self, ShadowError> {
        logging::init_from_env();
        let stack = NativeStack::current()?;
        let range = stack.range();
        let thread = std::thread::current();
        tracing::debug!(
            base = format_args!("{:#x}", range.base()),
            size = range.size(),
            thread = ?thread.name(),
            "shadow context created"
        );
        Ok(Self {
            mirror: ShadowMirror::new(stack),
        })
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Run `f` on this thread's context, creating it on first use
///
/// Returns `None` once the thread's locals have been torn down.
fn with_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> Option<R> {
    let result = CONTEXT.try_with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            fatal("shadow context re-entered while busy".to_string());
        };
        if slot.is_none() {
            match ThreadContext::new() {
                Ok(context) => *slot = Some(context),
                Err(err) => fatal(err.to_string()),
            }
        }
        slot.as_mut().map(f)
    });
    match result {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("shadow context unavailable during thread teardown");
            None
        }
    }
}

/// Capture the frame of a guarded call; `false` when the thread has no context
pub fn push(callee: CalleeId, stack_pointer: usize) -> bool {
    with_context(|context| context.mirror.push(callee, stack_pointer))
        .map(|result| result.unwrap_or_else(|err| fatal(err.to_string())))
        .is_some()
}

/// Check this thread's live stack against its mirror
pub fn check(phase: Phase) -> CheckOutcome {
    with_context(|context| context.mirror.check(phase)).unwrap_or(CheckOutcome::Unmonitored)
}

/// Drop the innermost frame of this thread's ledger
pub fn pop() -> Option<Frame> {
    with_context(|context| context.mirror.pop())
        .map(|result| result.unwrap_or_else(|err| fatal(err.to_string())))
}

/// Move this thread's ignore threshold to `stack_pointer`
pub fn ignore_above(stack_pointer: usize) -> bool {
    with_context(|context| context.mirror.ignore_above(stack_pointer)).unwrap_or(false)
}

/// Live ledger entries on this thread, 0 before the context exists
pub fn ledger_depth() -> usize {
    CONTEXT
        .try_with(|cell| {
            cell.try_borrow()
                .ok()
                .and_then(|slot| slot.as_ref().map(|context| context.mirror.depth()))
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

/// Whether this thread has created its context yet
pub fn is_initialized() -> bool {
    CONTEXT
        .try_with(|cell| cell.try_borrow().map(|slot| slot.is_some()).unwrap_or(true))
        .unwrap_or(false)
}

/// Report a broken instrumentation invariant and terminate the process
pub(crate) fn fatal(message: String) -> ! {
    tracing::error!("shadow stack usage error: {}", message);
    eprintln!("shadowstack: fatal usage error: {message}");
    std::process::abort()
}

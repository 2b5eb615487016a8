//! Usage and invariant errors raised by the shadow-stack engine
//!
//! These never describe stack corruption (that is a `CheckOutcome`), only
//! misuse of the instrumentation or a host stack that is not as assumed.

use thiserror::Error;

/// Errors that can occur while maintaining the shadow stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShadowError {
    #[error("failed to discover the thread stack range: {0}")]
    StackDiscovery(String),

    #[error("stack pointer {address:#x} lies outside the thread stack {base:#x}..={end:#x}")]
    OutsideStack {
        address: usize,
        base: usize,
        end: usize,
    },

    #[error("push at position {position} is above the previous checkpoint {checkpoint}")]
    NonMonotonicPush { position: usize, checkpoint: usize },

    #[error("push at position {position} captures no bytes (duplicate push at an unchanged stack pointer)")]
    EmptyPush { position: usize },

    #[error("pop from an empty frame ledger")]
    LedgerUnderflow,

    #[error("null callee passed to the C entry point")]
    NullCallee,
}

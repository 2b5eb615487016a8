//! Shadowstack - runtime detection of native stack corruption
//!
//! Every guarded call copies the part of the thread stack that belongs to
//! its callers into a private mirror. Before the call and after it returns,
//! the live stack is compared with the mirror; a difference means something
//! wrote into a caller's frame. What happens then (abort, report, heal, ...)
//! is configured through `SHST_*` environment variables or a TOML file.
//!
//! ```
//! use shadowstack::config::{ReactionMode, ShadowConfig};
//!
//! # let mut config = ShadowConfig::default();
//! # config.reaction = ReactionMode::Ignore;
//! # ShadowConfig::install(config);
//! let len = shadowstack::invoke(|| "guarded".len());
//! assert_eq!(len, 7);
//! # ShadowConfig::clear_override();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod guard;
pub mod logging;
pub mod mirror;
pub mod reaction;
pub mod report;
pub mod stack_memory;
pub mod stack_range;
pub mod stack_unwind;
pub mod symbols;

pub use config::{ColorMode, DumpArea, DumpConfig, ReactionMode, ShadowConfig};
pub use error::ShadowError;
pub use guard::{ignore_above, ignore_above_here, invoke, invoke_as, ledger_depth, Guard};
pub use mirror::{CheckOutcome, CorruptionSummary, Frame, Phase, ShadowMirror};
pub use stack_memory::{BufferStack, NativeStack, StackMemory};
pub use stack_range::{current_stack_pointer, StackRange};
pub use symbols::CalleeId;

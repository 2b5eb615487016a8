//! Shadow mirror and frame ledger
//!
//! The mirror is an owned copy of the part of a thread stack that lies above
//! the innermost guarded call. Every push copies the bytes between the new
//! stack pointer and the previous checkpoint, so the captured frames are
//! stitched into one contiguous span. A check compares that span (up to the
//! ignore threshold) with the live stack.
//!
//! ```text
//!   position 0 (base)                                        size (top)
//!   |.............[frame C][   frame B   ][      frame A      ]|
//!                 ^ innermost             ^ B.position
//! ```

use std::ops::Range;

use termcolor::WriteColor;

use crate::config::{DumpConfig, ReactionMode, ShadowConfig};
use crate::error::ShadowError;
use crate::reaction::{Reaction, ReactionPolicy};
use crate::report::{self, CorruptionReport, DiagnosticReporter, FrameDump};
use crate::stack_memory::StackMemory;
use crate::stack_range::StackRange;
use crate::symbols::CalleeId;

/// Which side of a guarded call a check runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreCall,
    PostReturn,
}

impl Phase {
    /// Label used in reports
    pub fn label(self) -> &'static str {
        match self {
            Phase::PreCall => "PRE-CALL to",
            Phase::PostReturn => "POST-RETURN from",
        }
    }
}

/// One captured, currently monitored stack region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub callee: CalleeId,
    /// Offset of the stack pointer at the guarded call's entry
    pub position: usize,
    /// Bytes captured by the push, up to the previous checkpoint
    pub size: usize,
}

impl Frame {
    pub fn end(&self) -> usize {
        self.position + self.size
    }

    pub fn span(&self) -> Range<usize> {
        self.position..self.end()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.span().contains(&position)
    }
}

/// What a detected mismatch looked like and how it was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionSummary {
    pub phase: Phase,
    pub mode: ReactionMode,
    pub reaction: Reaction,
    /// Ledger frames whose captured region holds differing bytes, innermost first
    pub corrupted_frames: Vec<Frame>,
    pub differing_bytes: usize,
    /// Lowest differing position
    pub first_difference: usize,
}

/// Result of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Live stack equals the mirror over the monitored span
    Clean,
    /// The span lies entirely beyond the ignore threshold
    Unmonitored,
    Corrupted(CorruptionSummary),
}

impl CheckOutcome {
    pub fn is_corrupted(&self) -> bool {
        matches!(self, CheckOutcome::Corrupted(_))
    }

    pub fn corruption(&self) -> Option<&CorruptionSummary> {
        match self {
            CheckOutcome::Corrupted(summary) => Some(summary),
            _ => None,
        }
    }
}

/// Mirror of a thread stack plus the ledger of captured frames
#[derive(Debug)]
pub struct ShadowMirror<S> {
    stack: S,
    mirror: Vec<u8>,
    frames: Vec<Frame>,
    ignore_threshold: usize,
}

impl<S: StackMemory> ShadowMirror<S> {
    /// Empty mirror over `stack`, monitoring the whole range
    pub fn new(stack: S) -> Self {
        let size = stack.range().size();
        Self {
            stack,
            mirror: vec![0; size],
            frames: Vec::new(),
            ignore_threshold: size,
        }
    }

    pub fn range(&self) -> StackRange {
        self.stack.range()
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Ledger, outermost first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Ledger, innermost (most recently pushed) first
    pub fn frames_recent_first(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.iter().rev()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn ignore_threshold(&self) -> usize {
        self.ignore_threshold
    }

    /// Mirrored bytes of a span
    pub fn shadow_bytes(&self, span: Range<usize>) -> &[u8] {
        &self.mirror[span]
    }

    /// Position the next push measures back to
    fn checkpoint(&self) -> usize {
        self.frames
            .last()
            .map_or(self.stack.range().size(), |frame| frame.position)
    }

    /// Capture the region between `stack_pointer` and the previous checkpoint
    pub fn push(&mut self, callee: CalleeId, stack_pointer: usize) -> Result<(), ShadowError> {
        let position = self.stack.range().require_position(stack_pointer)?;
        let checkpoint = self.checkpoint();
        if position > checkpoint {
            return Err(ShadowError::NonMonotonicPush {
                position,
                checkpoint,
            });
        }
        let size = checkpoint - position;
        if size == 0 {
            return Err(ShadowError::EmptyPush { position });
        }

        self.stack.load(position, &mut self.mirror[position..checkpoint]);
        self.frames.push(Frame {
            callee,
            position,
            size,
        });
        tracing::trace!(position, size, depth = self.frames.len(), callee = ?callee, "shadow push");
        Ok(())
    }

    /// Drop the innermost frame
    pub fn pop(&mut self) -> Result<Frame, ShadowError> {
        let frame = self.frames.pop().ok_or(ShadowError::LedgerUnderflow)?;
        tracing::trace!(position = frame.position, depth = self.frames.len(), "shadow pop");
        Ok(frame)
    }

    /// Stop checking bytes at or above `stack_pointer`
    ///
    /// Returns whether the threshold moved; addresses outside the stack are
    /// ignored.
    pub fn ignore_above(&mut self, stack_pointer: usize) -> bool {
        match self.stack.range().position(stack_pointer) {
            Some(position) if position < self.stack.range().size() => {
                self.ignore_threshold = position;
                tracing::debug!(position, "shadow ignore threshold moved");
                true
            }
            _ => {
                tracing::debug!("ignore_above: {:#x} is outside the thread stack", stack_pointer);
                false
            }
        }
    }

    /// Span a check compares, `None` when it lies beyond the ignore threshold
    pub fn monitored_span(&self) -> Option<Range<usize>> {
        let last = self.checkpoint();
        (last < self.ignore_threshold).then_some(last..self.ignore_threshold)
    }

    /// Whether the live stack equals the mirror over the monitored span
    pub fn is_consistent(&self) -> bool {
        match self.monitored_span() {
            Some(span) => self.stack.matches(span.start, &self.mirror[span]),
            None => true,
        }
    }

    /// Compare the live stack with the mirror and react per configuration
    ///
    /// The configuration is read and the report goes to stderr only when a
    /// mismatch is found.
    pub fn check(&mut self, phase: Phase) -> CheckOutcome {
        self.check_with(phase, ShadowConfig::current, |dump| {
            DiagnosticReporter::new(report::stderr_stream(dump), dump.clone())
        })
    }

    /// `check` with injectable configuration and report output
    pub fn check_with<C, O, W>(&mut self, phase: Phase, config: C, open_reporter: O) -> CheckOutcome
    where
        C: FnOnce() -> ShadowConfig,
        O: FnOnce(&DumpConfig) -> DiagnosticReporter<W>,
        W: WriteColor,
    {
        let Some(span) = self.monitored_span() else {
            return CheckOutcome::Unmonitored;
        };
        if self.stack.matches(span.start, &self.mirror[span.clone()]) {
            return CheckOutcome::Clean;
        }

        let policy = ReactionPolicy::resolve(&config());
        let summary = self.summarize(phase, &policy, span.clone());
        if policy.reaction.is_silent() {
            tracing::trace!(
                phase = phase.label(),
                differing_bytes = summary.differing_bytes,
                mode = ?policy.mode,
                "silent shadow stack mismatch"
            );
        } else {
            tracing::warn!(
                phase = phase.label(),
                differing_bytes = summary.differing_bytes,
                first_difference = summary.first_difference,
                mode = ?policy.mode,
                "shadow stack mismatch"
            );
        }

        if policy.reaction.report {
            let report = self.snapshot(&summary);
            let mut reporter = open_reporter(&policy.dump);
            if let Err(e) = reporter.report(&report) {
                tracing::warn!("Failed to write shadow stack report: {}", e);
            }
        }
        if policy.reaction.heal {
            self.heal_span(span);
        }
        if policy.reaction.abort {
            std::process::abort();
        }

        CheckOutcome::Corrupted(summary)
    }

    /// Restore the monitored span of the live stack from the mirror
    pub fn heal(&mut self) {
        if let Some(span) = self.monitored_span() {
            self.heal_span(span);
        }
    }

    fn heal_span(&mut self, span: Range<usize>) {
        tracing::debug!(start = span.start, len = span.len(), "healing stack from mirror");
        self.stack.store(span.start, &self.mirror[span]);
    }

    fn summarize(&self, phase: Phase, policy: &ReactionPolicy, span: Range<usize>) -> CorruptionSummary {
        let mut actual = vec![0; span.len()];
        self.stack.load(span.start, &mut actual);
        let shadow = &self.mirror[span.clone()];

        let mut differing_bytes = 0;
        let mut first_difference = None;
        for (offset, (live, mirrored)) in actual.iter().zip(shadow).enumerate() {
            if live != mirrored {
                differing_bytes += 1;
                first_difference.get_or_insert(span.start + offset);
            }
        }

        // Frames are disjoint, so each monitored byte is compared once here
        let corrupted_frames = self
            .frames_recent_first()
            .filter(|frame| {
                let start = frame.position.max(span.start);
                let end = frame.end().min(span.end);
                start < end
                    && actual[start - span.start..end - span.start]
                        != shadow[start - span.start..end - span.start]
            })
            .copied()
            .collect();

        CorruptionSummary {
            phase,
            mode: policy.mode,
            reaction: policy.reaction,
            corrupted_frames,
            differing_bytes,
            first_difference: first_difference.unwrap_or(span.start),
        }
    }

    fn snapshot(&self, summary: &CorruptionSummary) -> CorruptionReport {
        let range = self.stack.range();
        let frames = self
            .frames_recent_first()
            .map(|frame| {
                let mut actual = vec![0; frame.size];
                self.stack.load(frame.position, &mut actual);
                FrameDump {
                    frame: *frame,
                    address: range.address(frame.position),
                    actual,
                    shadow: self.mirror[frame.span()].to_vec(),
                }
            })
            .collect();

        CorruptionReport {
            phase: summary.phase,
            frames,
            corrupted_frames: summary.corrupted_frames.clone(),
            differing_bytes: summary.differing_bytes,
            first_difference: summary.first_difference,
        }
    }
}

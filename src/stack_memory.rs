//! Access to "the real stack" by offset
//!
//! This is the only place where raw stack memory is touched. Everything
//! above it (ledger, policy, reporting) works on offsets and owned copies.
//!
//! Callers guarantee `position + len <= range().size()` for every access;
//! `ShadowMirror` validates positions before delegating here.

use crate::error::ShadowError;
use crate::stack_range::StackRange;

/// Byte-addressable view of a thread stack
pub trait StackMemory {
    /// Extent of the stack this memory covers
    fn range(&self) -> StackRange;

    /// Copy `dst.len()` bytes starting at `position` into `dst`
    fn load(&self, position: usize, dst: &mut [u8]);

    /// Whether the bytes at `position` equal `expected`
    fn matches(&self, position: usize, expected: &[u8]) -> bool;

    /// Overwrite the bytes at `position` with `src`
    fn store(&mut self, position: usize, src: &[u8]);
}

/// The calling thread's live native stack
#[derive(Debug)]
pub struct NativeStack {
    range: StackRange,
}

impl NativeStack {
    /// Native stack of the calling thread
    pub fn current() -> Result<Self, ShadowError> {
        Ok(Self {
            range: StackRange::discover()?,
        })
    }

    fn ptr(&self, position: usize, len: usize) -> *mut u8 {
        debug_assert!(position + len <= self.range.size());
        self.range.address(position) as *mut u8
    }
}

impl StackMemory for NativeStack {
    fn range(&self) -> StackRange {
        self.range
    }

    fn load(&self, position: usize, dst: &mut [u8]) {
        let src = self.ptr(position, dst.len());
        // SAFETY: the span lies inside the thread's mapped stack and `dst` is
        // an owned buffer, so the regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    fn matches(&self, position: usize, expected: &[u8]) -> bool {
        let src = self.ptr(position, expected.len());
        // SAFETY: the span lies inside the thread's mapped stack. The slice
        // only lives for this comparison, which runs below the compared span.
        let actual = unsafe { std::slice::from_raw_parts(src as *const u8, expected.len()) };
        actual == expected
    }

    fn store(&mut self, position: usize, src: &[u8]) {
        let dst = self.ptr(position, src.len());
        // SAFETY: the span lies inside the thread's mapped stack, above every
        // frame that is executing this store.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
    }
}

/// An owned buffer posing as a thread stack
///
/// Positions map onto the buffer directly; `base` is only used to turn
/// simulated stack-pointer addresses into positions. Used to simulate call
/// chains and corruption without touching the live stack.
#[derive(Debug, Clone)]
pub struct BufferStack {
    base: usize,
    bytes: Vec<u8>,
}

impl BufferStack {
    /// Zero-filled stack of `size` bytes starting at `base`
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    /// Stack with explicit contents
    pub fn with_bytes(base: usize, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Address of a position, for use as a simulated stack pointer
    pub fn address(&self, position: usize) -> usize {
        self.base + position
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte(&self, position: usize) -> u8 {
        self.bytes[position]
    }

    pub fn set_byte(&mut self, position: usize, value: u8) {
        self.bytes[position] = value;
    }
}

impl StackMemory for BufferStack {
    fn range(&self) -> StackRange {
        StackRange::new(self.base, self.bytes.len())
    }

    fn load(&self, position: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self.bytes[position..position + dst.len()]);
    }

    fn matches(&self, position: usize, expected: &[u8]) -> bool {
        &self.bytes[position..position + expected.len()] == expected
    }

    fn store(&mut self, position: usize, src: &[u8]) {
        self.bytes[position..position + src.len()].copy_from_slice(src);
    }
}

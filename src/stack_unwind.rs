//! Backtrace of the detecting thread
//!
//! The report ends with the call chain that led to the failing check. The
//! `backtrace` crate does the unwinding; when it yields nothing (stripped
//! unwind tables, exotic targets) we fall back to walking the frame pointer
//! chain inside the thread's own stack range.

use std::io::{self, Write};

use crate::stack_range::{current_stack_pointer, StackRange};
use crate::symbols;

/// Maximum stack depth to unwind (prevent infinite loops)
const MAX_STACK_DEPTH: usize = 64;

/// A single captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Instruction pointer (return address for all but the innermost frame)
    pub ip: usize,
    pub symbol: Option<String>,
}

impl CapturedFrame {
    pub fn new(ip: usize) -> Self {
        Self { ip, symbol: None }
    }

    /// Symbol name, or the hex address when unresolved
    pub fn display_name(&self) -> String {
        match &self.symbol {
            Some(name) => name.clone(),
            None => format!("{:#x}", self.ip),
        }
    }
}

/// Capture the current thread's call chain, innermost first
#[inline(never)]
pub fn capture() -> Vec<CapturedFrame> {
    let mut frames = Vec::with_capacity(16);
    backtrace::trace(|frame| {
        frames.push(CapturedFrame::new(frame.ip() as usize));
        frames.len() < MAX_STACK_DEPTH
    });

    if frames.is_empty() {
        tracing::debug!("unwinder returned no frames, walking frame pointers");
        match StackRange::discover() {
            Ok(range) => frames = walk_frame_pointers(&range),
            Err(err) => tracing::debug!(error = %err, "no stack range for frame pointer walk"),
        }
    }

    for frame in &mut frames {
        frame.symbol = symbols::resolve_symbol(frame.ip);
    }
    frames
}

/// Walk the saved frame pointer chain
///
/// Stack layout at the frame pointer:
///   [fp+0]: saved frame pointer (caller's frame)
///   [fp+8]: return address
///
/// Stops when the chain leaves the live part of `range`, is misaligned,
/// stops growing towards the stack top or hits `MAX_STACK_DEPTH`. Only
/// meaningful for code built with frame pointers.
#[inline(never)]
pub fn walk_frame_pointers(range: &StackRange) -> Vec<CapturedFrame> {
    let mut frames = Vec::with_capacity(16);
    let Some(mut fp) = current_frame_pointer() else {
        return frames;
    };

    // Nothing below our own stack pointer is guaranteed to be mapped
    let low = current_stack_pointer().max(range.base());
    let word = std::mem::size_of::<usize>();
    for _ in 0..MAX_STACK_DEPTH {
        if fp % word != 0 || fp < low || fp.saturating_add(2 * word) > range.end() {
            break;
        }

        // SAFETY: fp and fp + word lie inside the live stack of this thread
        // and are word aligned.
        let (saved_fp, return_address) = unsafe {
            let slot = fp as *const usize;
            (slot.read(), slot.add(1).read())
        };
        if return_address == 0 {
            break;
        }
        frames.push(CapturedFrame::new(return_address));

        // The chain must move towards the stack top
        if saved_fp <= fp {
            break;
        }
        fp = saved_fp;
    }
    frames
}

#[inline(always)]
fn current_frame_pointer() -> Option<usize> {
    #[cfg(target_arch = "x86_64")]
    {
        let fp: usize;
        // SAFETY: reads a register, touches no memory.
        unsafe { std::arch::asm!("mov {}, rbp", out(reg) fp, options(nomem, nostack, preserves_flags)) };
        Some(fp)
    }
    #[cfg(target_arch = "aarch64")]
    {
        let fp: usize;
        // SAFETY: reads a register, touches no memory.
        unsafe { std::arch::asm!("mov {}, x29", out(reg) fp, options(nomem, nostack, preserves_flags)) };
        Some(fp)
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        None
    }
}

/// Print frames as `#N  0x... name`
pub fn write_backtrace<W: Write>(out: &mut W, frames: &[CapturedFrame]) -> io::Result<()> {
    if frames.is_empty() {
        return writeln!(out, "  <no frames captured>");
    }
    for (index, frame) in frames.iter().enumerate() {
        writeln!(out, "  #{:<3} {:#018x} {}", index, frame.ip, frame.display_name())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_returns_frames() {
        let frames = capture();
        assert!(!frames.is_empty());
        assert!(frames.len() <= MAX_STACK_DEPTH);
    }

    #[test]
    fn test_capture_resolves_some_symbol() {
        let frames = capture();
        assert!(frames.iter().any(|f| f.symbol.is_some()));
    }

    #[test]
    fn test_frame_pointer_walk_stays_bounded() {
        let range = StackRange::discover().unwrap();
        let frames = walk_frame_pointers(&range);
        assert!(frames.len() <= MAX_STACK_DEPTH);
    }

    #[test]
    fn test_frame_pointer_walk_outside_range_is_empty() {
        let bogus = StackRange::new(0x1000, 0x100);
        assert!(walk_frame_pointers(&bogus).is_empty());
    }

    #[test]
    fn test_write_backtrace_format() {
        let frames = vec![
            CapturedFrame {
                ip: 0x1234,
                symbol: Some("demo::inner".to_string()),
            },
            CapturedFrame::new(0xabc),
        ];
        let mut out = Vec::new();
        write_backtrace(&mut out, &frames).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "  #0   0x0000000000001234 demo::inner\n  #1   0x0000000000000abc 0xabc\n"
        );
    }

    #[test]
    fn test_write_backtrace_empty() {
        let mut out = Vec::new();
        write_backtrace(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "  <no frames captured>\n");
    }
}

//! Thread stack extent discovery
//!
//! The shadow mirror needs the OS-allocated extent of the calling thread's
//! stack so that stack-pointer values can be turned into offsets. The range is
//! queried once per thread and never changes afterwards.

use crate::error::ShadowError;

/// Extent of a thread's native call stack
///
/// `base` is the lowest address; the stack grows from `base + size` towards
/// `base`, so deeper calls have smaller positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRange {
    base: usize,
    size: usize,
}

impl StackRange {
    /// Create a range from a known base address and size
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Lowest address of the stack
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Size of the stack in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address of the stack
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    /// Whether `address` lies in `base..=end`
    ///
    /// The end itself is accepted: a stack pointer equal to the top of the
    /// stack is a valid (empty) position.
    pub fn contains(&self, address: usize) -> bool {
        self.base <= address && address <= self.end()
    }

    /// Offset of `address` from the base, if it lies inside the range
    pub fn position(&self, address: usize) -> Option<usize> {
        self.contains(address).then(|| address - self.base)
    }

    /// Offset of `address`, or an `OutsideStack` error
    pub fn require_position(&self, address: usize) -> Result<usize, ShadowError> {
        self.position(address).ok_or(ShadowError::OutsideStack {
            address,
            base: self.base,
            end: self.end(),
        })
    }

    /// Absolute address of a position
    pub const fn address(&self, position: usize) -> usize {
        self.base + position
    }

    /// Query the calling thread's stack range from the OS
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn discover() -> Result<Self, ShadowError> {
        let mut attr = std::mem::MaybeUninit::<libc::pthread_attr_t>::uninit();
        let mut stack_addr: *mut libc::c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;

        // SAFETY: `attr` is initialised by pthread_getattr_np before any other
        // use and destroyed exactly once afterwards.
        unsafe {
            let rc = libc::pthread_getattr_np(libc::pthread_self(), attr.as_mut_ptr());
            if rc != 0 {
                return Err(ShadowError::StackDiscovery(format!(
                    "pthread_getattr_np failed with error {rc}"
                )));
            }
            let rc = libc::pthread_attr_getstack(attr.as_ptr(), &mut stack_addr, &mut stack_size);
            libc::pthread_attr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(ShadowError::StackDiscovery(format!(
                    "pthread_attr_getstack failed with error {rc}"
                )));
            }
        }

        Self::checked(stack_addr as usize, stack_size)
    }

    /// Query the calling thread's stack range from the OS
    #[cfg(target_os = "macos")]
    pub fn discover() -> Result<Self, ShadowError> {
        // SAFETY: both calls only inspect the calling thread's descriptor.
        let (top, size) = unsafe {
            let this = libc::pthread_self();
            (
                libc::pthread_get_stackaddr_np(this) as usize,
                libc::pthread_get_stacksize_np(this),
            )
        };
        Self::checked(top.wrapping_sub(size), size)
    }

    /// Query the calling thread's stack range from the OS
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    pub fn discover() -> Result<Self, ShadowError> {
        Err(ShadowError::StackDiscovery(
            "stack range discovery is not supported on this target".to_string(),
        ))
    }

    #[allow(dead_code)]
    fn checked(base: usize, size: usize) -> Result<Self, ShadowError> {
        if base == 0 || size == 0 || base.checked_add(size).is_none() {
            return Err(ShadowError::StackDiscovery(format!(
                "OS reported an unusable stack {base:#x} + {size:#x}"
            )));
        }
        Ok(Self::new(base, size))
    }
}

/// Current stack pointer of the caller
///
/// Reads the real stack pointer where inline assembly is available and falls
/// back to the address of a local otherwise. Either way the value is only a
/// depth proxy; callers still enforce monotonicity on it.
#[inline(always)]
pub fn current_stack_pointer() -> usize {
    #[cfg(target_arch = "x86_64")]
    {
        let sp: usize;
        // SAFETY: reads a register, touches no memory.
        unsafe {
            core::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
        }
        sp
    }
    #[cfg(target_arch = "aarch64")]
    {
        let sp: usize;
        // SAFETY: reads a register, touches no memory.
        unsafe {
            core::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
        }
        sp
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let marker = 0u8;
        std::hint::black_box(&marker) as *const u8 as usize
    }
}

//! The closed error-kind set shared by every fallible kernel operation.
//!
//! Internally, fallible operations return `Result<T, KernelError>` and use
//! `?` to propagate the way any ordinary Rust code would; `KernelError` only
//! collapses to a bare status code at the syscall boundary (`to_status`),
//! it never becomes the `i64` before then.

/// A kernel-internal failure. `Ok(_)` stands in for the `OK` status; there is
/// no `Ok` variant here on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Bad argument shape (wrong size, wrong alignment class, reserved bits set).
    Inval,
    /// Caller lacks the capability required for this operation.
    Perm,
    /// Out of memory (PMEM exhausted, NODES pool exhausted, RPC stack overflow).
    OutOfMemory,
    /// Referenced id/resource does not exist.
    NotFound,
    /// Resource already exists (double `ipc_server`, double `register_irq`, ...).
    AlreadyExists,
    /// Address out of range or outside any owned region.
    Addr,
    /// Address or size not aligned to the required order.
    Align,
    /// Anything else — internal invariant violation that isn't covered above.
    Misc,
}

impl KernelError {
    /// Collapse to the `status` word returned across the syscall ABI (§6/§7).
    pub const fn to_status(self) -> i64 {
        match self {
            KernelError::Inval => -1,
            KernelError::Perm => -2,
            KernelError::OutOfMemory => -3,
            KernelError::NotFound => -4,
            KernelError::AlreadyExists => -5,
            KernelError::Addr => -6,
            KernelError::Align => -7,
            KernelError::Misc => -8,
        }
    }
}

/// The `OK` status value returned on success.
pub const STATUS_OK: i64 = 0;

pub type KernelResult<T> = Result<T, KernelError>;

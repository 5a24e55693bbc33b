//! SBI firmware boundary.
//!
//! Grounded on `arch/riscv/sbi.rs`'s extension-ID table and `ecall`-based
//! `sbi_call` wrapper, reshaped into the `Console`-style external-collaborator
//! trait (§10.4): the real ecall backend and a deterministic mock both
//! implement `SbiFirmware`, selected at compile time the same way
//! `config::CONSOLE` selects a console backend.

use core::arch::asm;

const SBI_EXT_TIMER: usize = 0x54494D45; // "TIME"
const SBI_EXT_IPI: usize = 0x0073_5049;  // "sPI"
const SBI_EXT_HSM: usize = 0x48534D;     // "HSM"
const SBI_EXT_SRST: usize = 0x53525354;  // "SRST"

const SBI_TIMER_SET_TIMER: usize = 0;
const SBI_IPI_SEND: usize = 0;
const SBI_HSM_HART_START: usize = 0;
const SBI_SRST_RESET: usize = 0;

/// The subset of SBI firmware calls the kernel needs: setting the timer
/// comparator (TIMERS §4.7), sending cross-core IPIs, starting secondary
/// harts, and powering off (the `poweroff` syscall, §6).
pub trait SbiFirmware: Send + Sync {
    fn set_timer(&self, deadline: u64);
    fn send_ipi(&self, hart_mask: usize) -> isize;
    fn start_hart(&self, hart_id: usize, start_addr: usize, opaque: usize) -> isize;
    fn shutdown(&self) -> !;
}

#[derive(Debug, Clone, Copy)]
pub struct SbiRet {
    pub error: isize,
    pub value: usize,
}

#[inline(always)]
fn sbi_call(extension: usize, function: usize, arg0: usize, arg1: usize, arg2: usize) -> SbiRet {
    #[cfg(target_arch = "riscv64")]
    {
        let error: isize;
        let value: usize;
        unsafe {
            asm!(
                "ecall",
                in("a0") arg0,
                in("a1") arg1,
                in("a2") arg2,
                in("a6") function,
                in("a7") extension,
                lateout("a0") error,
                lateout("a1") value,
            );
        }
        SbiRet { error, value }
    }
    #[cfg(not(target_arch = "riscv64"))]
    {
        let _ = (extension, function, arg0, arg1, arg2);
        SbiRet { error: 0, value: 0 }
    }
}

/// The real firmware backend — issues `ecall`s to OpenSBI/M-mode firmware.
pub struct Sbi;

impl SbiFirmware for Sbi {
    fn set_timer(&self, deadline: u64) {
        sbi_call(SBI_EXT_TIMER, SBI_TIMER_SET_TIMER, deadline as usize, 0, 0);
    }

    fn send_ipi(&self, hart_mask: usize) -> isize {
        sbi_call(SBI_EXT_IPI, SBI_IPI_SEND, hart_mask, 0, 0).error
    }

    fn start_hart(&self, hart_id: usize, start_addr: usize, opaque: usize) -> isize {
        sbi_call(SBI_EXT_HSM, SBI_HSM_HART_START, hart_id, start_addr, opaque).error
    }

    fn shutdown(&self) -> ! {
        sbi_call(SBI_EXT_SRST, SBI_SRST_RESET, 0, 0, 0);
        loop {
            #[cfg(target_arch = "riscv64")]
            unsafe {
                asm!("wfi");
            }
        }
    }
}

/// Deterministic mock for host-target tests and builds without real
/// firmware underneath: records the last timer deadline set instead of
/// trapping into M-mode, and never actually halts the process on shutdown.
pub struct MockSbi {
    last_deadline: spin::Mutex<u64>,
}

impl MockSbi {
    pub const fn new() -> Self {
        Self { last_deadline: spin::Mutex::new(0) }
    }

    pub fn last_deadline(&self) -> u64 {
        *self.last_deadline.lock()
    }
}

impl SbiFirmware for MockSbi {
    fn set_timer(&self, deadline: u64) {
        *self.last_deadline.lock() = deadline;
    }

    fn send_ipi(&self, _hart_mask: usize) -> isize {
        0
    }

    fn start_hart(&self, _hart_id: usize, _start_addr: usize, _opaque: usize) -> isize {
        0
    }

    fn shutdown(&self) -> ! {
        panic!("mock firmware shutdown");
    }
}

#[cfg(feature = "sbi-mock")]
pub static SBI: MockSbi = MockSbi::new();

#[cfg(not(feature = "sbi-mock"))]
pub static SBI: Sbi = Sbi;

pub fn firmware() -> &'static impl SbiFirmware {
    &SBI
}

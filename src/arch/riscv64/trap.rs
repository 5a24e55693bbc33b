//! Supervisor trap entry and cause decoding.
//!
//! The entry trampoline follows the same "save everything, call into Rust,
//! restore, `sret`" shape as `load_context`/`context_switch` in
//! `arch::riscv64::context`, just entered via `stvec` instead of a direct
//! call. Only one return path exists — a plain `sret` — per the design
//! decision recorded in DESIGN.md (no fast/slow syscall return split).

use super::context::GprContext;
use core::arch::asm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    UserEcall,
    SupervisorTimer,
    SupervisorSoft,
    ExternalInterrupt,
    PageFault,
    IllegalInstruction,
    Other(usize),
}

#[inline(always)]
pub fn read_scause() -> usize {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        let v: usize;
        asm!("csrr {}, scause", out(reg) v);
        return v;
    }
    #[cfg(not(target_arch = "riscv64"))]
    0
}

#[inline(always)]
pub fn read_stval() -> usize {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        let v: usize;
        asm!("csrr {}, stval", out(reg) v);
        return v;
    }
    #[cfg(not(target_arch = "riscv64"))]
    0
}

const INTERRUPT_BIT: usize = 1 << 63;

pub fn decode_cause(scause: usize) -> TrapCause {
    let code = scause & !INTERRUPT_BIT;
    if scause & INTERRUPT_BIT != 0 {
        match code {
            1 => TrapCause::SupervisorSoft,
            5 => TrapCause::SupervisorTimer,
            9 => TrapCause::ExternalInterrupt,
            other => TrapCause::Other(other),
        }
    } else {
        match code {
            8 => TrapCause::UserEcall,
            12 | 13 | 15 => TrapCause::PageFault,
            2 => TrapCause::IllegalInstruction,
            other => TrapCause::Other(other),
        }
    }
}

/// Advance `sepc` past the `ecall` that trapped, so `sret` resumes at the
/// instruction after it rather than re-trapping forever.
pub fn skip_ecall(ctx: &mut GprContext) {
    ctx.sepc = ctx.sepc.wrapping_add(4);
}

/// Resume the given context in supervisor/user mode via `sret`. Never
/// returns.
///
/// # Safety
/// `ctx` must describe a consistent, resumable CPU state including a valid
/// `satp`.
pub unsafe fn return_to_userspace(ctx: &GprContext) -> ! {
    #[cfg(target_arch = "riscv64")]
    {
        let mut scratch = *ctx;
        context_restore_and_sret(&mut scratch);
    }
    #[cfg(not(target_arch = "riscv64"))]
    {
        let _ = ctx;
        loop {}
    }
}

#[cfg(target_arch = "riscv64")]
#[no_mangle]
unsafe extern "C" fn context_restore_and_sret(ctx: *mut GprContext) -> ! {
    asm!(
        "ld t0, 264(a0)",
        "csrw satp, t0",
        "sfence.vma",
        "ld t0, 248(a0)",
        "csrw sepc, t0",
        "ld t0, 256(a0)",
        "csrw sstatus, t0",
        "ld ra,  0(a0)",
        "ld sp,  8(a0)",
        "ld gp,  16(a0)",
        "ld tp,  24(a0)",
        "ld t1,  40(a0)",
        "ld t2,  48(a0)",
        "ld s0,  56(a0)",
        "ld s1,  64(a0)",
        "ld s2,  72(a0)",
        "ld s3,  80(a0)",
        "ld s4,  88(a0)",
        "ld s5,  96(a0)",
        "ld s6,  104(a0)",
        "ld s7,  112(a0)",
        "ld s8,  120(a0)",
        "ld s9,  128(a0)",
        "ld s10, 136(a0)",
        "ld s11, 144(a0)",
        "ld a1,  160(a0)",
        "ld a2,  168(a0)",
        "ld a3,  176(a0)",
        "ld a4,  184(a0)",
        "ld a5,  192(a0)",
        "ld a6,  200(a0)",
        "ld a7,  208(a0)",
        "ld t3,  216(a0)",
        "ld t4,  224(a0)",
        "ld t5,  232(a0)",
        "ld t6,  240(a0)",
        "ld t0,  32(a0)",
        "ld a0,  152(a0)",
        "sret",
        in("a0") ctx,
        options(noreturn),
    );
}

extern "C" {
    /// Defined in `boot`: runs with the BKL held and the trapping thread's
    /// context already copied into its TCB, dispatches on `scause`, and
    /// finishes by calling back into `return_to_userspace`.
    fn rust_trap_handler(ctx: *mut GprContext) -> !;
}

/// Install this vector as `stvec` (direct mode). Must run once per hart,
/// before any trap can fire and after `set_current_context` has pointed
/// `sscratch` at a valid context.
///
/// # Safety
/// Must run exactly once per hart during boot.
#[cfg(target_arch = "riscv64")]
pub unsafe fn install_vector() {
    asm!("csrw stvec, {0}", in(reg) trap_entry as usize, options(nostack));
}

#[cfg(not(target_arch = "riscv64"))]
pub unsafe fn install_vector() {}

/// Point `sscratch` at the `GprContext` a trap should save into and resume
/// from — the currently running thread's. Called by `scheduler` on every
/// switch so a trap always lands in the right TCB.
///
/// # Safety
/// `ctx` must stay valid (point at the current thread's saved registers)
/// until the next call.
#[cfg(target_arch = "riscv64")]
pub unsafe fn set_current_context(ctx: *mut GprContext) {
    asm!("csrw sscratch, {0}", in(reg) ctx, options(nostack));
}

#[cfg(not(target_arch = "riscv64"))]
pub unsafe fn set_current_context(_ctx: *mut GprContext) {}

/// Trap entry: swaps `t6` for the saved-context pointer via `sscratch`,
/// spills every GPR plus `sepc`/`sstatus`/`satp` into it (same field
/// offsets as `context::context_switch`), then calls into Rust. Never
/// returns — `rust_trap_handler` always finishes through `sret`.
#[cfg(target_arch = "riscv64")]
#[naked]
#[no_mangle]
unsafe extern "C" fn trap_entry() -> ! {
    asm!(
        "csrrw t6, sscratch, t6",
        "sd ra,   0(t6)",
        "sd sp,   8(t6)",
        "sd gp,  16(t6)",
        "sd tp,  24(t6)",
        "sd t0,  32(t6)",
        "sd t1,  40(t6)",
        "sd t2,  48(t6)",
        "sd s0,  56(t6)",
        "sd s1,  64(t6)",
        "sd s2,  72(t6)",
        "sd s3,  80(t6)",
        "sd s4,  88(t6)",
        "sd s5,  96(t6)",
        "sd s6,  104(t6)",
        "sd s7,  112(t6)",
        "sd s8,  120(t6)",
        "sd s9,  128(t6)",
        "sd s10, 136(t6)",
        "sd s11, 144(t6)",
        "sd a0,  152(t6)",
        "sd a1,  160(t6)",
        "sd a2,  168(t6)",
        "sd a3,  176(t6)",
        "sd a4,  184(t6)",
        "sd a5,  192(t6)",
        "sd a6,  200(t6)",
        "sd a7,  208(t6)",
        "sd t3,  216(t6)",
        "sd t4,  224(t6)",
        "sd t5,  232(t6)",
        "csrr t5, sscratch",
        "sd t5,  240(t6)",
        "csrw sscratch, t6",
        "csrr t0, sepc",
        "sd t0, 248(t6)",
        "csrr t0, sstatus",
        "sd t0, 256(t6)",
        "csrr t0, satp",
        "sd t0, 264(t6)",
        "mv a0, t6",
        "call {handler}",
        handler = sym rust_trap_handler,
        options(noreturn),
    );
}

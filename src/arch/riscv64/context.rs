//! Saved CPU register context and the raw context-switch trampoline.
//!
//! Grounded on `arch/riscv/context.rs`'s `RiscVContext` register layout and
//! its hand-rolled `context_switch`/`load_context` inline-asm routines,
//! trimmed of the F/D floating-point extension (out of scope — this kernel
//! never emulates or context-switches FPU state) and of the `ThreadContext`
//! trait indirection the teacher's multi-arch scheduler needed; this crate
//! only ever targets riscv64 so `GprContext` is used directly.

use core::arch::asm;

/// General-purpose register file plus the supervisor CSRs needed to resume
/// a thread exactly where it left off, including which address space it
/// was running in. This is the `saved_regs` half of an RPC stack frame
/// (§4.8); `eid`/`rpc.vmem` live alongside it in `ipc::rpc::Frame`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GprContext {
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
    pub sepc: usize,
    pub sstatus: usize,
    pub satp: usize,
}

impl GprContext {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0, sp: 0, gp: 0, tp: 0,
            t0: 0, t1: 0, t2: 0,
            s0: 0, s1: 0, s2: 0, s3: 0, s4: 0, s5: 0, s6: 0, s7: 0, s8: 0, s9: 0, s10: 0, s11: 0,
            a0: 0, a1: 0, a2: 0, a3: 0, a4: 0, a5: 0, a6: 0, a7: 0,
            t3: 0, t4: 0, t5: 0, t6: 0,
            sepc: 0,
            sstatus: 0x120, // SPP=1, SPIE=1: resumes in supervisor mode, interrupts enabled
            satp: 0,
        }
    }

    /// Build the initial context for a freshly created thread.
    pub fn for_entry(entry: usize, stack_top: usize, satp: usize) -> Self {
        let mut ctx = Self::zeroed();
        ctx.sepc = entry;
        ctx.sp = stack_top;
        ctx.satp = satp;
        ctx
    }

    pub fn set_return_value(&mut self, value: usize) {
        self.a0 = value;
    }

    pub fn syscall_args(&self) -> [usize; 6] {
        [self.a0, self.a1, self.a2, self.a3, self.a4, self.a5]
    }

    pub fn syscall_number(&self) -> usize {
        self.a7
    }
}

/// Save `*from` and load `*to`, including `satp` (switches address space)
/// and the other supervisor CSRs. Caller must hold the BKL or otherwise
/// guarantee no concurrent access to either context.
///
/// # Safety
/// `from` and `to` must be valid, non-overlapping pointers to `GprContext`.
#[cfg(target_arch = "riscv64")]
#[no_mangle]
pub unsafe extern "C" fn context_switch(from: *mut GprContext, to: *const GprContext) {
    asm!(
        "sd ra,   0(a0)",
        "sd sp,   8(a0)",
        "sd gp,  16(a0)",
        "sd tp,  24(a0)",
        "sd t0,  32(a0)",
        "sd t1,  40(a0)",
        "sd t2,  48(a0)",
        "sd s0,  56(a0)",
        "sd s1,  64(a0)",
        "sd s2,  72(a0)",
        "sd s3,  80(a0)",
        "sd s4,  88(a0)",
        "sd s5,  96(a0)",
        "sd s6,  104(a0)",
        "sd s7,  112(a0)",
        "sd s8,  120(a0)",
        "sd s9,  128(a0)",
        "sd s10, 136(a0)",
        "sd s11, 144(a0)",
        "sd a0,  152(a0)",
        "sd a1,  160(a0)",
        "sd a2,  168(a0)",
        "sd a3,  176(a0)",
        "sd a4,  184(a0)",
        "sd a5,  192(a0)",
        "sd a6,  200(a0)",
        "sd a7,  208(a0)",
        "sd t3,  216(a0)",
        "sd t4,  224(a0)",
        "sd t5,  232(a0)",
        "sd t6,  240(a0)",
        "csrr t0, sepc",
        "sd t0, 248(a0)",
        "csrr t0, sstatus",
        "sd t0, 256(a0)",
        "csrr t0, satp",
        "sd t0, 264(a0)",

        "ld t1, 264(a1)",
        "beq t0, t1, 1f",
        "csrw satp, t1",
        "sfence.vma",
        "1:",
        "ld t0, 248(a1)",
        "csrw sepc, t0",
        "ld t0, 256(a1)",
        "csrw sstatus, t0",

        "ld ra,  0(a1)",
        "ld sp,  8(a1)",
        "ld gp,  16(a1)",
        "ld tp,  24(a1)",
        "ld t0,  32(a1)",
        "ld t1,  40(a1)",
        "ld t2,  48(a1)",
        "ld s0,  56(a1)",
        "ld s1,  64(a1)",
        "ld s2,  72(a1)",
        "ld s3,  80(a1)",
        "ld s4,  88(a1)",
        "ld s5,  96(a1)",
        "ld s6,  104(a1)",
        "ld s7,  112(a1)",
        "ld s8,  120(a1)",
        "ld s9,  128(a1)",
        "ld s10, 136(a1)",
        "ld s11, 144(a1)",
        "ld a2,  168(a1)",
        "ld a3,  176(a1)",
        "ld a4,  184(a1)",
        "ld a5,  192(a1)",
        "ld a6,  200(a1)",
        "ld a7,  208(a1)",
        "ld t3,  216(a1)",
        "ld t4,  224(a1)",
        "ld t5,  232(a1)",
        "ld t6,  240(a1)",
        "ld a0,  152(a1)",
        "ld a1,  160(a1)",
        "ret",
        in("a0") from,
        in("a1") to,
        options(noreturn),
    );
}

#[cfg(not(target_arch = "riscv64"))]
pub unsafe extern "C" fn context_switch(from: *mut GprContext, to: *const GprContext) {
    // Host-target test builds never actually switch CPU state; callers only
    // exercise the surrounding frame bookkeeping.
    core::ptr::write(from, GprContext::zeroed());
    let _ = to;
}

/// Reads the `time` CSR (§4.7: ticks, in timebase units, since boot).
#[inline(always)]
pub fn read_time() -> u64 {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        let t: u64;
        asm!("csrr {}, time", out(reg) t);
        return t;
    }
    #[cfg(not(target_arch = "riscv64"))]
    0
}

#[inline(always)]
pub fn hart_id() -> usize {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        let id: usize;
        asm!("csrr {}, mhartid", out(reg) id);
        return id;
    }
    #[cfg(not(target_arch = "riscv64"))]
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_entry_sets_pc_sp_satp() {
        let ctx = GprContext::for_entry(0x1000, 0x2000, 0x8000_0000_0000_0001);
        assert_eq!(ctx.sepc, 0x1000);
        assert_eq!(ctx.sp, 0x2000);
        assert_eq!(ctx.satp, 0x8000_0000_0000_0001);
    }

    #[test]
    fn syscall_args_read_a0_through_a5() {
        let mut ctx = GprContext::zeroed();
        ctx.a0 = 1;
        ctx.a1 = 2;
        ctx.a5 = 6;
        assert_eq!(ctx.syscall_args(), [1, 2, 0, 0, 0, 6]);
    }
}

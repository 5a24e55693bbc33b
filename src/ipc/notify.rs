//! Notifications — asynchronous wakeups.
//!
//! Shares `ipc::rpc`'s addressing (`proc::lifecycle::lookup`) but never
//! migrates or blocks the sender: posting a notification always returns to
//! the caller immediately (the open design question on notify semantics
//! was resolved this way — see DESIGN.md). If the target is running on a
//! different core, delivery is queued through `ipi` rather than written
//! directly, matching `irq::dispatch`'s notify-not-call pattern.

use crate::arch::riscv64::context::GprContext;
use crate::error::{KernelError, KernelResult};
use crate::ipi;
use crate::proc::lifecycle;
use crate::proc::tcb::{Tcb, Tid};

/// Post `notify_id` to `target_tid`. If the target lives on another core,
/// queue an IPI so its trap-return path picks the notification up;
/// same-core delivery just writes the field, since the target will see it
/// the next time it re-enters the kernel. Never blocks the caller.
pub fn notify(from_cpu: u32, target_tid: Tid, notify_id: u32) -> KernelResult<()> {
    let target = lifecycle::lookup(target_tid).ok_or(KernelError::NotFound)?;
    let target_cpu = unsafe { target.as_ref() }.cpu_id;

    unsafe {
        (*target.as_ptr()).notify_id = notify_id;
    }

    if target_cpu != from_cpu {
        ipi::send(target_cpu, target_tid);
    }
    Ok(())
}

/// Deliver a notification to its own sender (§4.6: "if target is idle:
/// swap to it and deliver" — when the target *is* the caller, there is
/// nothing to swap to, so delivery means redirecting the caller's own
/// context right here). Jumps straight to `tcb.callback` with `code` in
/// `a0` and `flag` in `a1`; unlike `rpc::call` this pushes no RPC frame,
/// since a notification is "asynchronous, non-returning" and nothing
/// will ever `ipc_resp` it back.
pub fn deliver_self(tcb: &mut Tcb, code: usize, flag: usize) -> KernelResult<()> {
    if tcb.callback == 0 {
        return Err(KernelError::Inval);
    }
    let sp = tcb.regs.sp;
    let satp = tcb.regs.satp;
    tcb.regs = GprContext::for_entry(tcb.callback, sp, satp);
    tcb.regs.a0 = code;
    tcb.regs.a1 = flag;
    Ok(())
}

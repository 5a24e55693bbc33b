//! TCB — the thread control block.
//!
//! Field list and lifecycle states are grounded on `objects::tcb::TCB`
//! (cspace/vspace roots, IPC buffer, `ThreadState`, priority), reshaped
//! around thread-migration RPC rather than rendezvous endpoints: a TCB
//! tracks the two address spaces it can be running in (`proc_vmem` when
//! executing its own process's code, `rpc_vmem` when it has migrated into
//! a callee) instead of a single VSpace root, and blocks on RPC/notify
//! targets (`eid`/`rid`) rather than endpoint capabilities. The kernel
//! stack canary is ported from the original `common/canary.c`: a fixed
//! magic word at the low end of the stack, checked on every return from a
//! trap, with no per-boot randomization.

use crate::arch::riscv64::context::GprContext;
use crate::error::{KernelError, KernelResult};
use crate::memory::Vmem;
use crate::proc::caps::Caps;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

/// Maximum depth of nested RPC calls a single thread may have in flight
/// (§4.8). Bounds worst-case stack growth from a thread that calls into a
/// server, which calls into another server, and so on.
pub const MAX_RPC_DEPTH: usize = 16;

/// One frame of `ipc::rpc`'s thread-migration call stack: everything
/// needed to resume the caller exactly where it left off once the callee
/// replies with `ipc_resp`.
#[derive(Clone)]
pub struct RpcFrame {
    pub saved_regs: GprContext,
    /// Entry id (tid) of the thread that was migrated away from.
    pub caller_eid: Tid,
    pub caller_vmem: Arc<Mutex<Vmem>>,
}

/// Matches the original `common/canary.c` magic constant exactly; this is
/// a corruption tripwire, not a security boundary, so it is never
/// randomized per boot.
pub const STACK_CANARY: u32 = 0x0b00_b1e5;

pub type Tid = u32;
pub type Pid = u32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadState: u32 {
        const RUNNABLE       = 1 << 0;
        const RUNNING        = 1 << 1;
        /// Blocked inside an RPC call, waiting for `ipc_resp`.
        const BLOCKED_RPC    = 1 << 2;
        /// Blocked waiting on a notification (`rid` is the waited-on id).
        const BLOCKED_NOTIFY = 1 << 3;
        /// Blocked waiting on a timer to fire.
        const BLOCKED_TIMER  = 1 << 4;
        const ZOMBIE         = 1 << 5;
        /// Re-parented to init after its original parent exited (or after
        /// an explicit `detach`); init reaps it at its convenience.
        const ORPHAN         = 1 << 6;
    }
}

/// One thread of execution. Lives inside a per-pool `NodePool<Tcb>` record
/// (§4.2) sitting atop its own kernel stack; `STACK_CANARY` is written at
/// the low word of that stack by `proc::lifecycle::create_thread`.
pub struct Tcb {
    pub tid: Tid,
    pub pid: Pid,
    /// Pid of the process that created this one via `create_proc`/`fork`/
    /// `spawn`, or 0 for the root thread (no parent to reparent onto).
    /// Rewritten to init's pid by `detach`/a parent's `exit`.
    pub parent: Pid,
    /// Target of an in-flight RPC call (`eid` = entry id of the callee
    /// thread), or 0 when idle.
    pub eid: Tid,
    /// Target of an in-flight notification wait.
    pub rid: Tid,
    pub cpu_id: u32,
    pub state: ThreadState,
    pub caps: Caps,
    /// Notification callback entry point, set by `set_handler` (§6).
    pub callback: usize,
    pub notify_id: u32,
    /// Address space this thread's own process runs in.
    pub proc_vmem: Arc<Mutex<Vmem>>,
    /// Address space this thread is currently executing in — equal to
    /// `proc_vmem` unless it has migrated into a callee via `ipc_req_*`.
    pub rpc_vmem: Arc<Mutex<Vmem>>,
    pub regs: GprContext,
    /// Nested RPC call frames (§4.8), pushed by `ipc::rpc::call` and
    /// popped by `ipc::rpc::reply`. Depth-bounded by `MAX_RPC_DEPTH`.
    pub call_stack: Vec<RpcFrame>,
    kernel_stack_base: usize,
}

impl Tcb {
    pub fn new(tid: Tid, pid: Pid, caps: Caps, vmem: Arc<Mutex<Vmem>>, kernel_stack_base: usize) -> Self {
        Self {
            tid,
            pid,
            parent: 0,
            eid: 0,
            rid: 0,
            cpu_id: 0,
            state: ThreadState::RUNNABLE,
            caps,
            callback: 0,
            notify_id: 0,
            proc_vmem: vmem.clone(),
            rpc_vmem: vmem,
            regs: GprContext::zeroed(),
            call_stack: Vec::new(),
            kernel_stack_base,
        }
    }

    /// # Safety
    /// `kernel_stack_base` must point at the low (numerically smallest)
    /// word of a kernel stack this TCB owns exclusively.
    pub unsafe fn place_canary(&self) {
        (self.kernel_stack_base as *mut u32).write(STACK_CANARY);
    }

    /// §8: `check_canary(t)` returns false when the canary is intact, true
    /// when it has been clobbered — a corruption flag, not a health check.
    ///
    /// # Safety
    /// See `place_canary`.
    pub unsafe fn check_canary(&self) -> bool {
        (self.kernel_stack_base as *const u32).read() != STACK_CANARY
    }

    /// True while this thread is executing inside a callee's address space
    /// rather than its own (mid-RPC, per `ipc::rpc`).
    pub fn is_migrated(&self) -> bool {
        !Arc::ptr_eq(&self.proc_vmem, &self.rpc_vmem)
    }

    pub fn require_cap(&self, cap: Caps) -> KernelResult<()> {
        if self.caps.contains(cap) {
            Ok(())
        } else {
            Err(KernelError::Perm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pmem;

    fn vmem() -> Arc<Mutex<Vmem>> {
        pmem::test_support::ensure_init();
        Arc::new(Mutex::new(Vmem::new().unwrap()))
    }

    #[test]
    fn new_thread_starts_runnable_and_unmigrated() {
        let tcb = Tcb::new(1, 1, Caps::ROOT, vmem(), 0x1000);
        assert_eq!(tcb.state, ThreadState::RUNNABLE);
        assert!(!tcb.is_migrated());
    }

    #[test]
    fn require_cap_rejects_missing_rights() {
        let tcb = Tcb::new(1, 1, Caps::CAP_CALL, vmem(), 0x1000);
        assert!(tcb.require_cap(Caps::CAP_CALL).is_ok());
        assert_eq!(tcb.require_cap(Caps::CAP_POWER), Err(KernelError::Perm));
    }

    #[test]
    fn canary_round_trips_through_real_memory() {
        let mut backing: u64 = 0;
        let tcb = Tcb::new(1, 1, Caps::ROOT, vmem(), &mut backing as *mut u64 as usize);
        unsafe {
            tcb.place_canary();
            assert!(!tcb.check_canary(), "an intact canary must report false");
        }
    }

    #[test]
    fn check_canary_reports_true_once_clobbered() {
        let mut backing: u64 = 0;
        let tcb = Tcb::new(1, 1, Caps::ROOT, vmem(), &mut backing as *mut u64 as usize);
        unsafe {
            tcb.place_canary();
            (tcb.kernel_stack_base as *mut u32).write(0xDEAD_BEEF);
            assert!(tcb.check_canary(), "a clobbered canary must report true");
        }
    }
}

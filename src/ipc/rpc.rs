//! RPC — thread-migration request/response.
//!
//! There is no separate receiver thread to rendezvous with: a calling
//! thread migrates itself into the callee's address space and resumes
//! execution at the callee's registered entry point (`Tcb::callback`, set
//! by `set_handler`), carrying its own kernel stack with it. `call` pushes
//! an `RpcFrame` recording how to get back; `reply` pops it and resumes
//! the caller in its own address space. This replaces the teacher's
//! endpoint-rendezvous `ipc::operations::send`/`recv` entirely — nothing
//! here blocks waiting for a partner, since the "partner" is just the
//! thread's own continuation.

use crate::arch::riscv64::context::GprContext;
use crate::error::{KernelError, KernelResult};
use crate::memory::Vmem;
use crate::proc::lifecycle;
use crate::proc::tcb::{RpcFrame, Tcb, Tid, MAX_RPC_DEPTH};
use alloc::sync::Arc;
use spin::Mutex;

/// Resolve `target_tid`'s callback and address space. A thread may target
/// itself (§8 scenario 2: "init sends ipc_req4(1, ...) to itself"); in that
/// case `lifecycle::lookup` would hand back a pointer into this very
/// `caller`, and forming a second `&Tcb` through it alongside the live
/// `&mut caller` would alias the same object — read straight off `caller`
/// instead of through a second pointer.
fn resolve_target(caller: &Tcb, target_tid: Tid) -> KernelResult<(usize, Arc<Mutex<Vmem>>)> {
    if target_tid == caller.tid {
        if caller.callback == 0 {
            return Err(KernelError::Inval);
        }
        Ok((caller.callback, caller.proc_vmem.clone()))
    } else {
        let target = lifecycle::lookup(target_tid).ok_or(KernelError::NotFound)?;
        let target = unsafe { target.as_ref() };
        if target.callback == 0 {
            return Err(KernelError::Inval);
        }
        Ok((target.callback, target.proc_vmem.clone()))
    }
}

/// Jump `caller` into `callback` inside `target_vmem`, passing `args` in
/// a0..a3. Shared by `call` (which also pushes a frame) and `kick` (which
/// doesn't).
fn migrate(caller: &mut Tcb, target_tid: Tid, callback: usize, target_vmem: Arc<Mutex<Vmem>>, args: [usize; 4]) {
    let sp = caller.regs.sp;
    caller.rpc_vmem = target_vmem;
    let satp = caller.rpc_vmem.lock().satp();
    caller.regs = GprContext::for_entry(callback, sp, satp);
    caller.regs.a0 = args[0];
    caller.regs.a1 = args[1];
    caller.regs.a2 = args[2];
    caller.regs.a3 = args[3];
    caller.eid = target_tid;
}

/// Migrate `caller` into `target_tid`'s address space and jump to its
/// registered entry point, passing `args` in a0..a3 (§4.8, §6
/// `ipc_req_thread`/`ipc_req_proc`).
pub fn call(caller: &mut Tcb, target_tid: Tid, args: [usize; 4]) -> KernelResult<()> {
    if caller.call_stack.len() >= MAX_RPC_DEPTH {
        return Err(KernelError::OutOfMemory);
    }

    let (callback, target_vmem) = resolve_target(caller, target_tid)?;
    let frame = RpcFrame {
        saved_regs: caller.regs,
        caller_eid: caller.eid,
        caller_vmem: caller.rpc_vmem.clone(),
    };
    migrate(caller, target_tid, callback, target_vmem, args);
    caller.call_stack.push(frame);
    Ok(())
}

/// Replace the caller's current RPC target with `target_tid` without
/// growing the call stack — `ipc_kick`'s tail-call transition (§4.6, §4.10:
/// "`ipc_kick` preserves [RPC stack depth]"). The frame pushed by whatever
/// `call` got the caller here, if any, is left exactly as it was; `reply`
/// still unwinds to it.
pub fn kick(caller: &mut Tcb, target_tid: Tid, args: [usize; 4]) -> KernelResult<()> {
    let (callback, target_vmem) = resolve_target(caller, target_tid)?;
    migrate(caller, target_tid, callback, target_vmem, args);
    Ok(())
}

/// Pop the innermost RPC frame and resume the caller in its own address
/// space, with `ret` written into a0..a3 (`ipc_resp`, §6).
pub fn reply(callee: &mut Tcb, ret: [usize; 4]) -> KernelResult<()> {
    let frame = callee.call_stack.pop().ok_or(KernelError::NotFound)?;
    callee.regs = frame.saved_regs;
    callee.regs.a0 = ret[0];
    callee.regs.a1 = ret[1];
    callee.regs.a2 = ret[2];
    callee.regs.a3 = ret[3];
    callee.eid = frame.caller_eid;
    callee.rpc_vmem = frame.caller_vmem;
    Ok(())
}

/// Depth of the caller's in-flight RPC call stack.
pub fn depth(tcb: &Tcb) -> usize {
    tcb.call_stack.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pmem;
    use crate::memory::Vmem;
    use crate::proc::caps::Caps;
    use crate::proc::lifecycle;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn make_caller() -> Tcb {
        pmem::test_support::ensure_init();
        let vmem = Arc::new(Mutex::new(Vmem::new().unwrap()));
        Tcb::new(100, 100, Caps::ROOT, vmem, 0x1000)
    }

    fn make_server(entry: usize) -> Tid {
        let creator = make_caller();
        let server = lifecycle::create_proc(&creator, Caps::CAP_CALL, 0x2000, 0x3000).unwrap();
        unsafe { (*server.as_ptr()).callback = entry };
        unsafe { server.as_ref() }.tid
    }

    #[test]
    fn call_migrates_into_server_address_space_with_args() {
        let server_tid = make_server(0x4000);
        let mut caller = make_caller();
        let original_vmem_ptr = Arc::as_ptr(&caller.rpc_vmem);
        call(&mut caller, server_tid, [1, 2, 3, 4]).unwrap();
        assert_eq!(caller.regs.sepc, 0x4000);
        assert_eq!(caller.regs.a0, 1);
        assert_eq!(caller.regs.a3, 4);
        assert_eq!(caller.eid, server_tid);
        assert_ne!(Arc::as_ptr(&caller.rpc_vmem), original_vmem_ptr);
        assert_eq!(depth(&caller), 1);
    }

    #[test]
    fn reply_restores_caller_context_and_pops_frame() {
        let server_tid = make_server(0x4000);
        let mut caller = make_caller();
        caller.regs.sepc = 0x9000;
        call(&mut caller, server_tid, [0, 0, 0, 0]).unwrap();
        reply(&mut caller, [42, 0, 0, 0]).unwrap();
        assert_eq!(caller.regs.sepc, 0x9000);
        assert_eq!(caller.regs.a0, 42);
        assert_eq!(depth(&caller), 0);
    }

    #[test]
    fn reply_with_empty_stack_is_not_found() {
        let mut caller = make_caller();
        assert_eq!(reply(&mut caller, [0, 0, 0, 0]), Err(KernelError::NotFound));
    }

    #[test]
    fn call_to_unregistered_thread_is_not_found() {
        let mut caller = make_caller();
        assert_eq!(call(&mut caller, 0xDEAD, [0, 0, 0, 0]), Err(KernelError::NotFound));
    }

    #[test]
    fn kick_retargets_without_growing_the_call_stack() {
        let first_tid = make_server(0x4000);
        let second_tid = make_server(0x5000);
        let mut caller = make_caller();
        call(&mut caller, first_tid, [0, 0, 0, 0]).unwrap();
        assert_eq!(depth(&caller), 1);

        kick(&mut caller, second_tid, [9, 8, 7, 6]).unwrap();
        assert_eq!(caller.regs.sepc, 0x5000);
        assert_eq!(caller.regs.a0, 9);
        assert_eq!(caller.eid, second_tid);
        assert_eq!(depth(&caller), 1, "kick must preserve rpc stack depth");

        reply(&mut caller, [0, 0, 0, 0]).unwrap();
        assert_eq!(depth(&caller), 0, "the original frame from call is still the one reply unwinds to");
    }

    #[test]
    fn kick_to_unregistered_thread_is_not_found() {
        let mut caller = make_caller();
        assert_eq!(kick(&mut caller, 0xDEAD, [0, 0, 0, 0]), Err(KernelError::NotFound));
    }
}

//! Syscall dispatch — the table backing the syscall ABI (§6).
//!
//! Every entry takes its arguments from `GprContext::syscall_args` (a0..a5)
//! and returns a `Response` written back into a0..a3 plus the `status`/`id`
//! pair, mirroring the teacher's `handle_syscall(tf: &mut TrapFrame)`
//! dispatcher but against this kernel's own register file and operation
//! set instead of the seL4-style capability invocations it replaces.

pub mod numbers;

use crate::arch::riscv64::context::GprContext;
use crate::arch::riscv64::sbi::SbiFirmware;
use crate::config::{self, ConfKey};
use crate::error::KernelError;
use crate::ipc;
use crate::irq;
use crate::memory::{devmem, pmem, shm, vmem::CloneMode, VirtAddr};
use crate::proc::caps::Caps;
use crate::proc::lifecycle;
use crate::proc::tcb::Tcb;
use crate::scheduler;
use crate::timers;
use numbers::*;

/// `{status, id, a0, a1, a2, a3}` — the fixed return shape every syscall
/// produces (§6). `id` carries a newly created tid/pid/shm id/timer id
/// where relevant; unused slots are zero.
///
/// `regs_set` is for the handful of handlers (`ipc_req*`, `ipc_kick`,
/// `ipc_resp`, self-targeted `ipc_notify`) that migrate or redirect
/// `tcb.regs` themselves rather than returning data through `a0..a3` —
/// `dispatch_current` must not overwrite what they already wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: i64,
    pub id: u64,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub regs_set: bool,
}

impl Response {
    const fn ok() -> Self {
        Self { status: 0, id: 0, a0: 0, a1: 0, a2: 0, a3: 0, regs_set: false }
    }

    const fn err(e: KernelError) -> Self {
        Self { status: e.to_status(), id: 0, a0: 0, a1: 0, a2: 0, a3: 0, regs_set: false }
    }

    const fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Mark that the handler already wrote the caller's `a0..a3` (and
    /// usually `sepc`) itself, e.g. by migrating into another address
    /// space — `dispatch_current` must skip its normal data writeback.
    const fn regs_already_set(mut self) -> Self {
        self.regs_set = true;
        self
    }
}

impl From<Result<Response, KernelError>> for Response {
    fn from(r: Result<Response, KernelError>) -> Self {
        r.unwrap_or_else(Response::err)
    }
}

/// Dispatch the syscall currently loaded in `tcb.regs` and write the
/// result back into `tcb.regs.a0..a3`. Called from the trap handler after
/// `TrapCause::decode_cause` identifies an `Ecall`.
pub fn dispatch_current(tcb: &mut Tcb) {
    let no = tcb.regs.syscall_number();
    let args = tcb.regs.syscall_args();
    let resp = dispatch(tcb, no, args);
    // A handler with `regs_set` has already written the caller's a0..a3
    // itself (and usually `sepc`) by migrating it elsewhere — `ipc_req*`,
    // `ipc_kick`, `ipc_resp`, self-targeted `ipc_notify`. Overwriting those
    // here with the all-zero `Response::ok()` data would silently discard
    // the very values the migration just delivered.
    if !resp.regs_set {
        tcb.regs.a0 = resp.a0;
        tcb.regs.a1 = resp.a1;
        tcb.regs.a2 = resp.a2;
        tcb.regs.a3 = resp.a3;
    }
    // status/id travel in a6/a7 by convention, alongside the four data
    // registers proper; a7 already held the syscall number on entry and is
    // overwritten here since the caller only needs it for the duration of
    // the ecall.
    tcb.regs.a6 = resp.status as usize;
    tcb.regs.a7 = resp.id as usize;
}

fn dispatch(tcb: &mut Tcb, no: usize, args: [usize; 6]) -> Response {
    let result: Result<Response, KernelError> = match no {
        NOOP => Ok(Response::ok()),
        REQ_MEM => sys_req_mem(args[0]),
        REQ_PMEM => sys_req_pmem(tcb, args[0], args[1]),
        REQ_FIXMEM => sys_req_fixmem(tcb, args[0], args[1], args[2]),
        REQ_SHAREDMEM => sys_req_sharedmem(tcb, args[0]),
        REF_SHAREDMEM => sys_ref_sharedmem(tcb, args[0], args[1]),
        FREE_MEM => sys_free_mem(tcb, args[0], args[1]),
        TIMEBASE => Ok(Response::ok().with_id(config::conf_get(ConfKey::TimebaseFrequency))),
        TICKS => Ok(sys_ticks()),
        REQ_REL_TIMER => Ok(sys_req_rel_timer(tcb, args[0], args[1], args[2])),
        REQ_ABS_TIMER => Ok(sys_req_abs_timer(tcb, args[0], args[1])),
        FREE_TIMER => sys_free_timer(args[0]),
        IPC_SERVER => sys_ipc_server(tcb, args[0]),
        IPC_REQ_PROC | IPC_REQ_THREAD => sys_ipc_req(tcb, args[0], args[1], args[2], args[3], args[4]),
        IPC_KICK => sys_ipc_kick(tcb, args[0], args[1], args[2], args[3], args[4]),
        IPC_RESP => sys_ipc_resp(tcb, args[0], args[1], args[2], args[3]),
        IPC_NOTIFY => sys_ipc_notify(tcb, args[0]),
        CREATE => sys_create(tcb, args[0], args[1], args[2]),
        FORK => sys_fork(tcb),
        EXEC => sys_exec(tcb, args[0], args[1]),
        SPAWN => sys_spawn(tcb, args[0], args[1], args[2], args[3]),
        DETACH => sys_detach(tcb),
        SIGNAL => sys_ipc_notify(tcb, args[0]),
        SWAP => sys_swap(args[0]),
        EXIT => sys_exit(tcb),
        CONF => sys_conf(args[0], args[1]),
        CONF_GET => Ok(sys_conf_get(args[0])),
        POWEROFF => sys_poweroff(args[0]),
        SET_CAP => sys_set_cap(tcb, args[0], args[1]),
        IRQ_REQ => sys_irq_req(tcb, args[0]),
        FREE_IRQ => sys_free_irq(tcb, args[0]),
        SET_HANDLER => Ok(sys_set_handler(tcb, args[0])),
        _ => Err(KernelError::Inval),
    };
    result.into()
}

fn sys_req_mem(order: usize) -> Result<Response, KernelError> {
    let frame = pmem::alloc(order)?;
    Ok(Response::ok().with_id(frame.phys_addr().as_u64()))
}

fn sys_req_pmem(tcb: &mut Tcb, phys_addr: usize, len: usize) -> Result<Response, KernelError> {
    let va = devmem::map_device(&mut tcb.proc_vmem.lock(), crate::memory::PhysAddr::new(phys_addr), len)?;
    Ok(Response { status: 0, id: va.as_usize() as u64, a0: 0, a1: 0, a2: 0, a3: 0, regs_set: false })
}

fn sys_req_fixmem(tcb: &mut Tcb, virt_addr: usize, order: usize, flags: usize) -> Result<Response, KernelError> {
    let frame = pmem::alloc(order)?;
    let pages = crate::memory::ORDERS.size(order) / crate::memory::PAGE_SIZE;
    let pt_flags = crate::arch::riscv64::pagetable::PageTableFlags::from_bits_truncate(flags as u64)
        | crate::arch::riscv64::pagetable::PageTableFlags::USER_DATA;
    tcb.proc_vmem.lock().map(VirtAddr::new(virt_addr), frame.phys_addr(), pages, pt_flags, CloneMode::Deep)?;
    Ok(Response::ok())
}

fn sys_req_sharedmem(tcb: &mut Tcb, pages: usize) -> Result<Response, KernelError> {
    let (id, frames) = shm::create(tcb.tid, pages)?;
    let mut vmem = tcb.proc_vmem.lock();
    let base = VirtAddr::new(crate::memory::VM_KERN - (id as usize + 1) * crate::memory::PAGE_SIZE * 64);
    for (i, frame) in frames.iter().enumerate() {
        vmem.map(
            VirtAddr::new(base.as_usize() + i * crate::memory::PAGE_SIZE),
            *frame,
            1,
            crate::arch::riscv64::pagetable::PageTableFlags::USER_DATA,
            CloneMode::Shared,
        )?;
    }
    Ok(Response { status: 0, id: id as u64, a0: base.as_usize(), a1: 0, a2: 0, a3: 0, regs_set: false })
}

fn sys_ref_sharedmem(tcb: &mut Tcb, shm_id: usize, pages: usize) -> Result<Response, KernelError> {
    let frames = shm::reference(shm_id as u32)?;
    let mut vmem = tcb.proc_vmem.lock();
    let base = VirtAddr::new(crate::memory::VM_KERN - (shm_id + 1) * crate::memory::PAGE_SIZE * 64 - crate::memory::PAGE_SIZE * 64 * 1000);
    for (i, frame) in frames.iter().enumerate().take(pages.max(frames.len())) {
        vmem.map(
            VirtAddr::new(base.as_usize() + i * crate::memory::PAGE_SIZE),
            *frame,
            1,
            crate::arch::riscv64::pagetable::PageTableFlags::USER_DATA,
            CloneMode::Shared,
        )?;
    }
    Ok(Response { status: 0, id: shm_id as u64, a0: base.as_usize(), a1: 0, a2: 0, a3: 0, regs_set: false })
}

/// `kind`: 0 = ordinary page at `id` (a physical frame address), 1 = shared
/// region owned by the caller, 2 = a held shared-region reference.
fn sys_free_mem(tcb: &mut Tcb, kind: usize, id: usize) -> Result<Response, KernelError> {
    match kind {
        0 => {
            let frame = crate::memory::PageFrameNumber::from_phys_addr(crate::memory::PhysAddr::new(id));
            pmem::free(0, frame)?;
            Ok(Response::ok())
        }
        1 => {
            shm::free_owner(id as u32, tcb.tid)?;
            Ok(Response::ok())
        }
        2 => {
            shm::unreference(id as u32)?;
            Ok(Response::ok())
        }
        _ => Err(KernelError::Inval),
    }
}

fn sys_ticks() -> Response {
    Response::ok().with_id(crate::arch::riscv64::context::read_time())
}

fn sys_req_rel_timer(tcb: &mut Tcb, now: usize, delta: usize, repeat: usize) -> Response {
    let id = timers::request_relative(now as u64, delta as u64, tcb.tid, repeat as u64);
    Response::ok().with_id(id as u64)
}

fn sys_req_abs_timer(tcb: &mut Tcb, deadline: usize, repeat: usize) -> Response {
    let id = timers::request_absolute(deadline as u64, tcb.tid, repeat as u64);
    Response::ok().with_id(id as u64)
}

fn sys_free_timer(id: usize) -> Result<Response, KernelError> {
    timers::cancel(id as u32)?;
    Ok(Response::ok())
}

fn sys_ipc_server(tcb: &mut Tcb, entry: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_CALL)?;
    tcb.callback = entry;
    Ok(Response::ok().with_id(tcb.tid as u64))
}

fn sys_ipc_req(tcb: &mut Tcb, target_tid: usize, a0: usize, a1: usize, a2: usize, a3: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_CALL)?;
    ipc::call(tcb, target_tid as u32, [a0, a1, a2, a3])?;
    Ok(Response::ok().regs_already_set())
}

/// `ipc_kick` — §4.6's tail-call transition: retarget the caller's current
/// RPC destination to `target_tid` without pushing a new frame, so
/// `reply` still unwinds to whatever frame `ipc_req` pushed to get here.
fn sys_ipc_kick(tcb: &mut Tcb, target_tid: usize, a0: usize, a1: usize, a2: usize, a3: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_CALL)?;
    ipc::kick(tcb, target_tid as u32, [a0, a1, a2, a3])?;
    Ok(Response::ok().regs_already_set())
}

fn sys_ipc_resp(tcb: &mut Tcb, a0: usize, a1: usize, a2: usize, a3: usize) -> Result<Response, KernelError> {
    ipc::reply(tcb, [a0, a1, a2, a3])?;
    Ok(Response::ok().regs_already_set())
}

fn sys_ipc_notify(tcb: &mut Tcb, target_tid: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_SIGNAL)?;
    // Self-targeted notifications are delivered synchronously right here
    // (§8 scenario 3: "init issues ipc_notify(1) to itself" — there is no
    // separate target thread to swap to), so `tcb.regs` is already the
    // observation a resumed thread would see and must not be clobbered.
    // Routing a self-target through `ipc::notify`'s `lifecycle::lookup`
    // would also hand back a second pointer into this very `tcb` while its
    // `&mut` is still live.
    if target_tid as u32 == tcb.tid {
        ipc::deliver_self(tcb, numbers::notify_code::SYS_USER_NOTIFY, numbers::NOTIFY_SIGNAL)?;
        Ok(Response::ok().regs_already_set())
    } else {
        ipc::notify(tcb.cpu_id, target_tid as u32, numbers::notify_code::SYS_USER_NOTIFY as u32)?;
        Ok(Response::ok())
    }
}

fn sys_create(tcb: &mut Tcb, caps_bits: usize, entry: usize, stack_top: usize) -> Result<Response, KernelError> {
    let caps = Caps::from_bits_truncate(caps_bits as u32);
    let child = lifecycle::create_proc(tcb, caps, entry, stack_top)?;
    let pid = unsafe { child.as_ref() }.pid;
    let _ = scheduler::enqueue(child);
    Ok(Response::ok().with_id(pid as u64))
}

fn sys_fork(tcb: &mut Tcb) -> Result<Response, KernelError> {
    let child = lifecycle::fork(tcb)?;
    let pid = unsafe { child.as_ref() }.pid;
    let _ = scheduler::enqueue(child);
    Ok(Response::ok().with_id(pid as u64))
}

fn sys_exec(tcb: &mut Tcb, entry: usize, stack_top: usize) -> Result<Response, KernelError> {
    lifecycle::exec(tcb, entry, stack_top)?;
    Ok(Response::ok())
}

fn sys_spawn(tcb: &mut Tcb, template_tid: usize, caps_bits: usize, entry: usize, stack_top: usize) -> Result<Response, KernelError> {
    let template = lifecycle::lookup(template_tid as u32).ok_or(KernelError::NotFound)?;
    let caps = Caps::from_bits_truncate(caps_bits as u32);
    let child = lifecycle::spawn(tcb, unsafe { template.as_ref() }, caps, entry, stack_top)?;
    let pid = unsafe { child.as_ref() }.pid;
    let _ = scheduler::enqueue(child);
    Ok(Response::ok().with_id(pid as u64))
}

fn sys_detach(tcb: &mut Tcb) -> Result<Response, KernelError> {
    lifecycle::detach(tcb);
    Ok(Response::ok())
}

fn sys_swap(target_tid: usize) -> Result<Response, KernelError> {
    let target = lifecycle::lookup(target_tid as u32).ok_or(KernelError::NotFound)?;
    unsafe { scheduler::swap(target) };
    Ok(Response::ok())
}

fn sys_exit(tcb: &mut Tcb) -> Result<Response, KernelError> {
    lifecycle::exit(tcb);
    unsafe { scheduler::exit_current() };
    Ok(Response::ok())
}

fn sys_conf(key: usize, _value: usize) -> Result<Response, KernelError> {
    let _ = key;
    Err(KernelError::Inval)
}

fn sys_conf_get(key: usize) -> Response {
    let conf_key = match key {
        0 => ConfKey::RamUsage,
        1 => ConfKey::TimebaseFrequency,
        2 => ConfKey::NumHarts,
        _ => return Response::err(KernelError::Inval),
    };
    Response::ok().with_id(config::conf_get(conf_key))
}

fn sys_poweroff(kind: usize) -> Result<Response, KernelError> {
    let kind = PoweroffType::from_usize(kind).ok_or(KernelError::Inval)?;
    let _ = kind;
    crate::arch::riscv64::sbi::firmware().shutdown();
}

fn sys_set_cap(tcb: &mut Tcb, target_tid: usize, caps_bits: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_CAPS)?;
    let target = lifecycle::lookup(target_tid as u32).ok_or(KernelError::NotFound)?;
    let caps = Caps::from_bits_truncate(caps_bits as u32);
    if !tcb.caps.can_delegate(caps) {
        return Err(KernelError::Perm);
    }
    unsafe { (*target.as_ptr()).caps = caps };
    Ok(Response::ok())
}

fn sys_irq_req(tcb: &mut Tcb, irq_id: usize) -> Result<Response, KernelError> {
    tcb.require_cap(Caps::CAP_IRQ)?;
    irq::request(irq_id, tcb.tid)?;
    Ok(Response::ok())
}

fn sys_free_irq(tcb: &mut Tcb, irq_id: usize) -> Result<Response, KernelError> {
    irq::free(irq_id, tcb.tid)?;
    Ok(Response::ok())
}

fn sys_set_handler(tcb: &mut Tcb, entry: usize) -> Response {
    tcb.callback = entry;
    Response::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pmem as pmem_mod;
    use crate::memory::Vmem;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn root_tcb() -> Tcb {
        pmem_mod::test_support::ensure_init();
        let vmem = Arc::new(Mutex::new(Vmem::new().unwrap()));
        Tcb::new(1, 1, Caps::ROOT, vmem, 0x1000)
    }

    #[test]
    fn noop_reports_ok() {
        let mut tcb = root_tcb();
        let resp = dispatch(&mut tcb, NOOP, [0; 6]);
        assert_eq!(resp.status, 0);
    }

    #[test]
    fn unknown_syscall_is_inval() {
        let mut tcb = root_tcb();
        let resp = dispatch(&mut tcb, 9999, [0; 6]);
        assert_eq!(resp.status, KernelError::Inval.to_status());
    }

    #[test]
    fn req_mem_returns_a_frame_address() {
        let mut tcb = root_tcb();
        let resp = dispatch(&mut tcb, REQ_MEM, [0; 6]);
        assert_eq!(resp.status, 0);
        assert_ne!(resp.id, 0);
    }

    #[test]
    fn conf_get_ram_usage_round_trips_through_pmem_alloc() {
        let mut tcb = root_tcb();
        let before = dispatch(&mut tcb, CONF_GET, [0, 0, 0, 0, 0, 0]).id;
        dispatch(&mut tcb, REQ_MEM, [0; 6]);
        let after = dispatch(&mut tcb, CONF_GET, [0, 0, 0, 0, 0, 0]).id;
        assert!(after >= before);
    }

    #[test]
    fn exit_without_other_runnable_threads_does_not_panic() {
        let mut tcb = root_tcb();
        let resp = dispatch(&mut tcb, EXIT, [0; 6]);
        assert_eq!(resp.status, 0);
    }

    #[test]
    fn ipc_req_delivers_args_to_its_own_register_file() {
        let mut tcb = root_tcb();
        tcb.callback = 0x4000;
        let tid = tcb.tid;
        let resp = dispatch(&mut tcb, IPC_REQ_THREAD, [tid as usize, 1, 2, 3, 4, 0]);
        assert_eq!(resp.status, 0);
        assert!(resp.regs_set, "ipc_req must flag that it already wrote a0..a3 itself");
        assert_eq!(tcb.regs.sepc, 0x4000);
        assert_eq!((tcb.regs.a0, tcb.regs.a1, tcb.regs.a2, tcb.regs.a3), (1, 2, 3, 4));
    }

    #[test]
    fn ipc_kick_retargets_without_pushing_a_new_frame() {
        let creator = root_tcb();
        let first = lifecycle::create_proc(&creator, Caps::CAP_CALL, 0x4000, 0x6000).unwrap();
        let first_tid = unsafe { first.as_ref() }.tid;
        let second = lifecycle::create_proc(&creator, Caps::CAP_CALL, 0x5000, 0x6000).unwrap();
        let second_tid = unsafe { second.as_ref() }.tid;

        let mut tcb = root_tcb();
        dispatch(&mut tcb, IPC_REQ_THREAD, [first_tid as usize, 0, 0, 0, 0, 0]);
        assert_eq!(ipc::rpc::depth(&tcb), 1);

        let resp = dispatch(&mut tcb, IPC_KICK, [second_tid as usize, 9, 8, 7, 6, 0]);
        assert_eq!(resp.status, 0);
        assert_eq!(tcb.regs.sepc, 0x5000);
        assert_eq!(tcb.regs.a0, 9);
        assert_eq!(ipc::rpc::depth(&tcb), 1, "kick must not grow the rpc call stack");
    }
}

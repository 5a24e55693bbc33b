//! Process/thread lifecycle operations.
//!
//! Table management (TCB allocation via `memory::nodes`, a monotonic id
//! counter guarded by the same `spin::Once<spin::Mutex<_>>` shape as every
//! other kernel singleton) is grounded on `memory::frame_allocator`'s
//! allocator-singleton idiom; the operations themselves are new, since the
//! teacher's `objects::tcb` never implemented `fork`/`spawn`/`exec` at all.

use crate::arch::riscv64::context::GprContext;
use crate::error::{KernelError, KernelResult};
use crate::memory::address::{PageFrameNumber, PhysAddr, PAGE_SIZE};
use crate::memory::nodes::NodePool;
use crate::memory::vmem::CloneMode;
use crate::memory::{pmem, Vmem};
use crate::proc::caps::Caps;
use crate::proc::tcb::{Pid, Tcb, ThreadState, Tid};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use spin::Mutex;

const KERNEL_STACK_PAGES: usize = 4;

/// Pid of the very first process (`boot::main`'s `bootstrap_root` call,
/// always the first to draw from `next_id`). Orphaned threads are
/// re-parented here, matching the init-reaps-orphans model (§4.5).
pub const INIT_PID: Pid = 1;

struct Table {
    pool: NodePool<Tcb>,
    next_id: u32,
    /// tid -> record, so `ipc::rpc`/`ipc::notify` can address a thread by
    /// id without holding a pointer to it across a syscall boundary.
    directory: BTreeMap<Tid, NonNull<Tcb>>,
    /// tid -> the physical frames backing that thread's kernel stack,
    /// recorded individually: `KERNEL_STACK_PAGES` separate order-0
    /// `pmem::alloc` calls carry no guarantee of landing on contiguous
    /// frames, so freeing must walk this list rather than stride off a
    /// single base address.
    stacks: BTreeMap<Tid, [usize; KERNEL_STACK_PAGES]>,
}

// SAFETY: entries are pointers into `pool`'s pages, which the pool itself
// already treats as movable-but-stable once allocated; the map is only
// ever touched through the `Mutex<Table>` above.
unsafe impl Send for Table {}

static TABLE: spin::Once<Mutex<Table>> = spin::Once::new();

fn table() -> &'static Mutex<Table> {
    TABLE.call_once(|| Mutex::new(Table { pool: NodePool::new(), next_id: 1, directory: BTreeMap::new(), stacks: BTreeMap::new() }))
}

/// Look up a thread by id. Used by `ipc::rpc`/`ipc::notify`/`irq` to
/// address a thread without holding a pointer to it across a syscall.
pub fn lookup(tid: Tid) -> Option<NonNull<Tcb>> {
    table().lock().directory.get(&tid).copied()
}

/// Allocate `KERNEL_STACK_PAGES` order-0 frames one at a time and record
/// each physical address. `pmem::alloc(0)` gives no guarantee that
/// successive calls land contiguously, so every frame is tracked
/// individually rather than assumed to follow the first by `PAGE_SIZE`.
fn alloc_kernel_stack() -> KernelResult<[usize; KERNEL_STACK_PAGES]> {
    let mut frames = [0usize; KERNEL_STACK_PAGES];
    for slot in frames.iter_mut() {
        *slot = pmem::alloc(0)?.phys_addr().as_usize();
    }
    Ok(frames)
}

fn free_kernel_stack(frames: [usize; KERNEL_STACK_PAGES]) {
    for addr in frames {
        let frame = PageFrameNumber::from_phys_addr(PhysAddr::new(addr));
        let _ = pmem::free(0, frame);
    }
}

fn insert(tcb: Tcb, stack_frames: [usize; KERNEL_STACK_PAGES]) -> KernelResult<NonNull<Tcb>> {
    let mut t = table().lock();
    let tid = tcb.tid;
    let ptr = t.pool.alloc()?;
    unsafe { ptr.as_ptr().write(tcb) };
    t.directory.insert(tid, ptr);
    t.stacks.insert(tid, stack_frames);
    Ok(ptr)
}

/// # Safety
/// `ptr` must have come from `insert` and not already be removed.
pub unsafe fn remove(ptr: NonNull<Tcb>) -> KernelResult<[usize; KERNEL_STACK_PAGES]> {
    let mut t = table().lock();
    let tid = ptr.as_ref().tid;
    t.directory.remove(&tid);
    let frames = t.stacks.remove(&tid);
    core::ptr::drop_in_place(ptr.as_ptr());
    t.pool.free(ptr)?;
    frames.ok_or(KernelError::NotFound)
}

fn next_id() -> u32 {
    let mut t = table().lock();
    let id = t.next_id;
    t.next_id += 1;
    id
}

/// Create a new process: a fresh address space plus its first thread.
/// Requires `CAP_PROC`; the child's capability set must be a subset of the
/// creator's (§4.5).
pub fn create_proc(creator: &Tcb, caps: Caps, entry: usize, stack_top: usize) -> KernelResult<NonNull<Tcb>> {
    creator.require_cap(Caps::CAP_PROC)?;
    if !creator.caps.can_delegate(caps) {
        return Err(KernelError::Perm);
    }
    let pid = next_id();
    let tid = pid;
    let vmem = Arc::new(Mutex::new(Vmem::new()?));
    let frames = alloc_kernel_stack()?;
    let mut tcb = Tcb::new(tid, pid, caps, vmem, frames[0]);
    tcb.parent = creator.pid;
    tcb.regs = GprContext::for_entry(entry, stack_top, tcb.proc_vmem.lock().satp());
    unsafe { tcb.place_canary() };
    insert(tcb, frames)
}

/// Create an additional thread inside `owner`'s process.
pub fn create_thread(owner: &Tcb, caps: Caps, entry: usize, stack_top: usize) -> KernelResult<NonNull<Tcb>> {
    owner.require_cap(Caps::CAP_PROC)?;
    if !owner.caps.can_delegate(caps) {
        return Err(KernelError::Perm);
    }
    let tid = next_id();
    let frames = alloc_kernel_stack()?;
    let mut tcb = Tcb::new(tid, owner.pid, caps, owner.proc_vmem.clone(), frames[0]);
    tcb.parent = owner.pid;
    tcb.regs = GprContext::for_entry(entry, stack_top, owner.proc_vmem.lock().satp());
    unsafe { tcb.place_canary() };
    insert(tcb, frames)
}

/// Duplicate `parent`'s process: a new address space with every region
/// deep-copied or shared per its `CloneMode`, and a single new thread
/// resuming at the same program counter with `a0 = 0` (the child's return
/// value from `fork`).
pub fn fork(parent: &Tcb) -> KernelResult<NonNull<Tcb>> {
    parent.require_cap(Caps::CAP_PROC)?;
    let pid = next_id();
    let mut child_vmem = Vmem::new()?;
    parent.proc_vmem.lock().clone_into(&mut child_vmem)?;
    let vmem = Arc::new(Mutex::new(child_vmem));
    let frames = alloc_kernel_stack()?;
    let mut tcb = Tcb::new(pid, pid, parent.caps, vmem, frames[0]);
    tcb.parent = parent.pid;
    tcb.regs = parent.regs;
    tcb.regs.set_return_value(0);
    tcb.regs.satp = tcb.proc_vmem.lock().satp();
    unsafe { tcb.place_canary() };
    insert(tcb, frames)
}

/// `spawn` is `create_proc` plus mapping the same zero-copy region layout
/// as an existing template process — here, deep-cloning `template`'s
/// shared regions into the child (used by a root task to launch servers
/// from an already-loaded ELF image rather than re-parsing it).
pub fn spawn(creator: &Tcb, template: &Tcb, caps: Caps, entry: usize, stack_top: usize) -> KernelResult<NonNull<Tcb>> {
    creator.require_cap(Caps::CAP_PROC)?;
    if !creator.caps.can_delegate(caps) {
        return Err(KernelError::Perm);
    }
    let pid = next_id();
    let mut vmem = Vmem::new()?;
    template.proc_vmem.lock().clone_into(&mut vmem)?;
    let vmem = Arc::new(Mutex::new(vmem));
    let frames = alloc_kernel_stack()?;
    let mut tcb = Tcb::new(pid, pid, caps, vmem, frames[0]);
    tcb.parent = creator.pid;
    tcb.regs = GprContext::for_entry(entry, stack_top, tcb.proc_vmem.lock().satp());
    unsafe { tcb.place_canary() };
    insert(tcb, frames)
}

/// Replace the calling thread's image in place: same pid/tid, fresh
/// register state, same address space (the caller is expected to have
/// already unmapped/remapped its regions via `req_mem`/`free_mem` before
/// calling this).
pub fn exec(tcb: &mut Tcb, entry: usize, stack_top: usize) -> KernelResult<()> {
    tcb.require_cap(Caps::CAP_PROC)?;
    tcb.regs = GprContext::for_entry(entry, stack_top, tcb.proc_vmem.lock().satp());
    Ok(())
}

/// Detach a thread from its parent's supervision. Unlike the general
/// death-of-parent path (which only reparents threads whose root process
/// has already exited), `detach` re-parents immediately: nothing in this
/// kernel blocks a parent on a child's exit, so there is no later moment
/// to catch the transition at other than the call itself (§8 scenario 6).
pub fn detach(tcb: &mut Tcb) {
    tcb.parent = INIT_PID;
    tcb.state |= ThreadState::ORPHAN;
    tcb.notify_id = 0;
}

/// Tear down a thread: mark it a zombie, park it off the run queue, and
/// reparent any of its own children onto init so they don't outlive a
/// vanished parent (§4.5, "ORPHAN iff parent dies while DEAD children
/// exist" generalized to *any* live children). The caller (`scheduler::
/// exit_current`) is responsible for removing it from the table via
/// `reap`/`remove` once no other thread can reference it.
pub fn exit(tcb: &mut Tcb) {
    tcb.state = ThreadState::ZOMBIE;
    let t = table().lock();
    // Raw-pointer writes, not `&mut` borrows: `tcb` itself is one of these
    // directory entries, so forming a second `&mut Tcb` into it here (even
    // transiently, for an entry we'd then skip) would alias the caller's
    // reference.
    for (&tid, &ptr) in t.directory.iter() {
        if tid == tcb.tid {
            continue;
        }
        unsafe {
            if (*ptr.as_ptr()).parent == tcb.pid {
                (*ptr.as_ptr()).parent = INIT_PID;
                (*ptr.as_ptr()).state |= ThreadState::ORPHAN;
            }
        }
    }
}

/// Free every zombie thread parented on `init` (kernel stack frames, the
/// TCB slot, and — once the last reference to its `proc_vmem`/`rpc_vmem`
/// drops — its page-table frames via `Vmem`'s `Drop`). Returns the number
/// reaped. Intended to be called by the init process's idle loop (§4.5,
/// "init ... frees them at its convenience").
pub fn reap(init: &Tcb) -> usize {
    let dead: Vec<NonNull<Tcb>> = {
        let t = table().lock();
        t.directory
            .values()
            .copied()
            .filter(|p| {
                let c = unsafe { p.as_ref() };
                c.parent == init.pid && c.state.contains(ThreadState::ZOMBIE)
            })
            .collect()
    };
    for ptr in &dead {
        if let Ok(frames) = unsafe { remove(*ptr) } {
            free_kernel_stack(frames);
        }
    }
    dead.len()
}

/// Cooperative yield target for the `swap` syscall: mark `from` runnable
/// again and hand control to `to` is the scheduler's job; this just
/// validates the two threads share no resource that would make the swap
/// unsafe (today: always valid, since threads never hold the BKL across a
/// syscall boundary).
pub fn swap(_from: &Tcb, _to: &Tcb) -> KernelResult<()> {
    Ok(())
}

pub const fn kernel_stack_bytes() -> usize {
    KERNEL_STACK_PAGES * PAGE_SIZE
}

/// Create the very first thread of the very first process, with every
/// capability and no creator to check against. Called exactly once, from
/// `boot::main`, to seed the scheduler before any syscall can run.
pub fn bootstrap_root(entry: usize, stack_top: usize) -> KernelResult<NonNull<Tcb>> {
    let pid = next_id();
    let vmem = Arc::new(Mutex::new(Vmem::new()?));
    let frames = alloc_kernel_stack()?;
    let mut tcb = Tcb::new(pid, pid, Caps::ROOT, vmem, frames[0]);
    tcb.regs = GprContext::for_entry(entry, stack_top, tcb.proc_vmem.lock().satp());
    unsafe { tcb.place_canary() };
    insert(tcb, frames)
}

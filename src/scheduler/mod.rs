//! Scheduler — cooperative run queue.
//!
//! Reshaped from the teacher's 256-priority preemptive scheduler into a
//! single FIFO of runnable threads: this kernel never preempts a thread
//! mid-syscall, so there is no priority bitmap and no timer-driven
//! `yield_current` (see `timers`, which wakes threads via notification
//! instead, never by forcing a context switch). A thread only leaves the
//! CPU by calling the `swap` syscall, blocking on `ipc::rpc`/
//! `ipc::notify`, or exiting. The run-queue array itself keeps the
//! teacher's `ThreadQueue` fixed-capacity idiom (`scheduler::types`), just
//! without the per-priority indirection.

mod types;

pub use types::{Scheduler, SchedulerError};

use crate::arch::riscv64::{context, trap};
use crate::proc::tcb::Tcb;
use core::ptr::NonNull;

static SCHEDULER: spin::Mutex<Scheduler> = spin::Mutex::new(Scheduler::new());

/// Seed the run queue with the first thread to run (the root task) and
/// mark it current. Must be called once during boot, after `trap::
/// install_vector` so the first trap has somewhere to land.
pub fn init(root: NonNull<Tcb>) {
    SCHEDULER.lock().set_current(Some(root));
    unsafe { trap::set_current_context(&mut (*root.as_ptr()).regs) };
}

/// Currently executing thread, if the scheduler has been initialized.
pub fn current() -> Option<NonNull<Tcb>> {
    SCHEDULER.lock().current()
}

/// Append a thread to the tail of the run queue. Called after a thread is
/// created, unblocked, or re-enqueued after a cooperative `swap`.
pub fn enqueue(tcb: NonNull<Tcb>) -> Result<(), SchedulerError> {
    SCHEDULER.lock().enqueue(tcb)
}

/// Pop the next runnable thread, if any. Leaves `current` untouched — the
/// caller decides whether/how to switch to it.
pub fn next_runnable() -> Option<NonNull<Tcb>> {
    SCHEDULER.lock().dequeue()
}

/// Cooperatively switch from the calling thread to `to`, re-enqueuing the
/// caller at the tail of the run queue first. Backs the `swap` syscall
/// (§6) and `proc::lifecycle::swap`'s validation. Performs a real context
/// switch via `arch::riscv64::context::context_switch`.
///
/// # Safety
/// `to` must be a live `Tcb` with a valid `regs`/`satp`; the caller must
/// hold the BKL across this call (every syscall entry does).
pub unsafe fn swap(to: NonNull<Tcb>) {
    let from = {
        let mut sched = SCHEDULER.lock();
        let from = sched.current();
        sched.set_current(Some(to));
        from
    };
    if let Some(from) = from {
        if from != to {
            let _ = enqueue(from);
            trap::set_current_context(&mut (*to.as_ptr()).regs);
            context::context_switch(
                &mut (*from.as_ptr()).regs as *mut _,
                &(*to.as_ptr()).regs as *const _,
            );
        }
    }
}

/// Remove the current thread from scheduling entirely (it has exited) and
/// switch to the next runnable thread, if any.
///
/// # Safety
/// See `swap`. The exited thread's `Tcb` must not be referenced again by
/// the caller after this returns.
pub unsafe fn exit_current() -> Option<NonNull<Tcb>> {
    let next = next_runnable()?;
    let from = {
        let mut sched = SCHEDULER.lock();
        let from = sched.current();
        sched.set_current(Some(next));
        from
    };
    if let Some(from) = from {
        trap::set_current_context(&mut (*next.as_ptr()).regs);
        context::context_switch(
            &mut (*from.as_ptr()).regs as *mut _,
            &(*next.as_ptr()).regs as *const _,
        );
    }
    Some(next)
}

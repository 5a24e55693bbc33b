//! Boot sequence and the trap handler it installs.
//!
//! Replaces the teacher's AArch64 `elfloader`-handoff sequence (boot
//! parameters in callee-saved registers, a hand-parsed DTB) with the
//! `(fdt_physical_addr, ram_base) -> main` contract (§6 "Entry") and the
//! `FdtSource` trait boundary (`boot::fdt`) in place of an embedded parser.

pub mod fdt;

use crate::arch::riscv64::context::GprContext;
use crate::arch::riscv64::sbi::SbiFirmware;
use crate::arch::riscv64::{context, trap};
use crate::boot::fdt::FdtSource;
use crate::memory::address::PhysAddr;
use crate::proc::lifecycle;
use crate::{config, ipi, kprintln, memory, scheduler, syscall, timers};

/// Kernel entry point, reached from `_start` with the boot loader's two
/// arguments already in `a0`/`a1`.
///
/// # Safety
/// Must run exactly once, on the boot hart, before any other kernel code.
pub unsafe extern "C" fn main(fdt_physical_addr: usize, ram_base: usize) -> ! {
    config::init_console();

    kprintln!("orphanage-kernel booting");
    kprintln!("  fdt:      {:#x} (direct-mapped at {:#x})",
        fdt_physical_addr,
        PhysAddr::new(fdt_physical_addr).direct_map().as_usize());
    kprintln!("  ram_base: {:#x}", ram_base);

    let fdt = config::fdt_source();
    let (fdt_ram_base, ram_size) = fdt.memory_range();
    let _ = ram_base;

    extern "C" {
        static _kernel_start: u8;
        static _kernel_end: u8;
    }
    let kernel_start = PhysAddr::new(&_kernel_start as *const u8 as usize);
    let kernel_end = PhysAddr::new(&_kernel_end as *const u8 as usize);

    memory::init(fdt_ram_base, ram_size, kernel_start, kernel_end);
    for range in fdt.reserved_ranges() {
        memory::pmem::reserve(range.start, range.len);
    }

    config::set_boot_facts(fdt.timebase_frequency(), fdt.num_harts());

    kprintln!("[boot] spawning root thread (idle loop, no root binary loaded)");
    let root = lifecycle::bootstrap_root(idle_entry as usize, idle_stack_top())
        .expect("failed to create root thread");

    trap::install_vector();
    scheduler::init(root);

    let deadline = context::read_time() + fdt.timebase_frequency();
    crate::arch::riscv64::sbi::firmware().set_timer(deadline);

    kprintln!("[boot] handing off to root thread");
    trap::return_to_userspace(&(*root.as_ptr()).regs)
}

/// Where the root thread parks once boot is done. There is no ELF loader
/// in this crate (§1, out of scope) so the very first thread has nothing
/// to load — it simply idles, woken on every trap, until a real root task
/// is spawned into it via `req_fixmem`/`exec` by whoever drives the board.
///
/// This thread is also init (`proc::lifecycle::INIT_PID`): every `wfi`
/// wakeup is a convenient moment to reap any orphaned zombie threads that
/// accumulated since the last one (§4.5, "init ... frees them at its
/// convenience").
extern "C" fn idle_entry() -> ! {
    loop {
        if let Some(current) = scheduler::current() {
            lifecycle::reap(unsafe { current.as_ref() });
        }
        #[cfg(target_arch = "riscv64")]
        unsafe {
            core::arch::asm!("wfi");
        }
        #[cfg(not(target_arch = "riscv64"))]
        core::hint::spin_loop();
    }
}

fn idle_stack_top() -> usize {
    extern "C" {
        static _boot_stack_top: u8;
    }
    unsafe { &_boot_stack_top as *const u8 as usize }
}

/// Entry point for every trap (`stvec`, direct mode). Runs with the BKL
/// held and `ctx` already holding the trapping thread's saved registers
/// (`arch::riscv64::trap::set_current_context` keeps `sscratch` pointed at
/// the current thread's `Tcb::regs`, so `ctx == &mut current.regs`).
#[no_mangle]
pub extern "C" fn rust_trap_handler(ctx: *mut GprContext) -> ! {
    let guard = crate::sync::bkl::lock();
    let current = scheduler::current().expect("trap with no current thread");
    let tcb = unsafe { &mut *current.as_ptr() };
    let _ = ctx;

    let scause = trap::read_scause();
    match trap::decode_cause(scause) {
        trap::TrapCause::UserEcall => {
            trap::skip_ecall(&mut tcb.regs);
            syscall::dispatch_current(tcb);
        }
        trap::TrapCause::SupervisorTimer => {
            let now = context::read_time();
            for tid in timers::fire(now) {
                if let Some(t) = lifecycle::lookup(tid) {
                    let _ = scheduler::enqueue(t);
                }
            }
        }
        trap::TrapCause::SupervisorSoft => {
            while let Some(tid) = ipi::pop(context::hart_id() as u32) {
                if let Some(t) = lifecycle::lookup(tid) {
                    let _ = scheduler::enqueue(t);
                }
            }
        }
        trap::TrapCause::PageFault | trap::TrapCause::IllegalInstruction => {
            lifecycle::exit(tcb);
            unsafe {
                scheduler::exit_current();
            }
        }
        trap::TrapCause::ExternalInterrupt | trap::TrapCause::Other(_) => {
            // PLIC claim/complete is a board-specific peripheral (§1, out
            // of scope); nothing to dispatch without it.
        }
    }

    drop(guard);
    let next = scheduler::current().expect("scheduler always has a current thread");
    unsafe { trap::return_to_userspace(&(*next.as_ptr()).regs) }
}

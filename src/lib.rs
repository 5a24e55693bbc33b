//! A capability-based microkernel for 64-bit RISC-V.
//!
//! Threads communicate by migrating into the address space of the process
//! they are calling rather than rendezvousing on a shared endpoint: a request
//! pushes a frame onto the caller's RPC stack, retargets it at the callee,
//! and resumes; a response pops the frame and resumes the caller. See
//! `ipc::rpc` for the mechanism and `proc::tcb` for the per-thread state it
//! operates on.
//!
//! # Module map
//! - `memory`: order table (MEM-CONST), buddy physical allocator (PMEM),
//!   sub-page record pool (NODES), page-table walker and regions (VMEM),
//!   MMIO window mapping (DEVMEM), kernel heap.
//! - `proc`: thread/process records (TCB), capability bits (CAPS), lifecycle
//!   operations (create/fork/spawn/exec/detach/exit/swap).
//! - `sync`: the big kernel lock.
//! - `ipc`: thread-migration request/response and notifications.
//! - `ipi`, `irq`, `timers`: cross-core wakeups, interrupt routing, deadlines.
//! - `scheduler`: cooperative run queue (no preemption).
//! - `syscall`: the dispatch table backing the syscall ABI.
//! - `arch::riscv64`: trap vector, context switch, page tables, SBI shim.
//! - `boot`, `config`, `debug`, `components`: early init and the ambient
//!   collaborator/logging/config stack.

#![no_std]
#![feature(naked_functions)]
#![feature(asm_const)]
#![feature(alloc_error_handler)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod components;
pub mod config;
pub mod debug;
pub mod error;
pub mod ipc;
pub mod ipi;
pub mod irq;
pub mod memory;
pub mod proc;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod timers;

pub use error::KernelError;

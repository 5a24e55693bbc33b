//! Inter-Process Communication — thread migration, not rendezvous.
//!
//! Replaces the teacher's seL4-style endpoint send/recv/call/reply with a
//! single mechanism: a calling thread migrates into the callee's address
//! space and back (`rpc`), and asynchronous wakeups share its addressing
//! without ever migrating or blocking the sender (`notify`). There is no
//! `Message`/`IpcBuffer` register-marshalling layer or capability-transfer
//! path here — arguments travel in `a0..a3` the same way a syscall's do
//! (`arch::riscv64::context::GprContext::syscall_args`), and capabilities
//! move with `proc::caps::Caps::can_delegate` at process-creation time,
//! not per-message.

pub mod notify;
pub mod rpc;

pub use notify::{deliver_self, notify};
pub use rpc::{call, kick, reply};

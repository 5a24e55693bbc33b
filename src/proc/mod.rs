//! Process and thread objects.
//!
//! Replaces the teacher's `objects` module (seL4-style `CNode`/`TCB`) with
//! a flat-capability, thread-migration design: see `tcb` for the per-thread
//! record, `caps` for the capability bitset, and `lifecycle` for
//! create/fork/spawn/exec/detach/exit/swap.

pub mod caps;
pub mod lifecycle;
pub mod tcb;

pub use caps::Caps;
pub use lifecycle::INIT_PID;
pub use tcb::{Pid, RpcFrame, Tcb, ThreadState, Tid, MAX_RPC_DEPTH};

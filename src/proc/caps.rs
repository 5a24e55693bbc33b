//! CAPS — per-thread capability bits.
//!
//! The teacher derives capabilities from a `CNode`/`CDT` tree (seL4-style
//! capability objects with derivation rights). This kernel instead gives
//! each thread a flat bitset of kernel-call categories it may use,
//! delegated subset-only on `create`/`fork`/`spawn` (§4.5). Expressed with
//! the `bitflags` crate already in the dependency table rather than the
//! teacher's hand-rolled `CapRights`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Caps: u32 {
        /// May create/modify capability sets of other threads.
        const CAP_CAPS   = 1 << 0;
        /// May create, fork, spawn, exec, detach, or kill processes/threads.
        const CAP_PROC   = 1 << 1;
        /// May issue RPC requests (`ipc_req_proc`/`ipc_req_thread`/`ipc_kick`).
        const CAP_CALL   = 1 << 2;
        /// May register as an IRQ handler.
        const CAP_IRQ    = 1 << 3;
        /// May power off or reset the machine.
        const CAP_POWER  = 1 << 4;
        /// May send signals to other threads.
        const CAP_SIGNAL = 1 << 5;
    }
}

impl Caps {
    /// The set granted to the first (root) thread at boot.
    pub const ROOT: Caps = Caps::all();

    /// `true` if `self` delegating `requested` to a child is a subset
    /// relationship — a thread can never hand out a right it doesn't hold
    /// (§4.5 "subset-only delegation").
    pub fn can_delegate(self, requested: Caps) -> bool {
        self.contains(requested)
    }
}

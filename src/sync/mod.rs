//! Kernel-wide synchronization.
//!
//! A single coarse-grained lock serializes every kernel entry (§5: "one
//! lock, not fine-grained locking per object") — see `bkl`.

pub mod bkl;

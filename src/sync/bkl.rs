//! BKL — the big kernel lock.
//!
//! Every syscall, trap, and IPI handler takes this lock on entry and drops
//! it before returning to userspace, the same `spin::Mutex`-per-singleton
//! idiom used everywhere else in this crate (`memory::pmem`, `config`), but
//! wrapping the kernel's whole critical section instead of one data
//! structure: the original design accepted no fine-grained locking in
//! exchange for never reasoning about lock ordering between subsystems.

use spin::{Mutex, MutexGuard};

static BKL: Mutex<()> = Mutex::new(());

pub struct BklGuard<'a>(MutexGuard<'a, ()>);

/// Acquire the BKL. Blocking: spins until any other hart's kernel entry
/// releases it.
pub fn lock() -> BklGuard<'static> {
    BklGuard(BKL.lock())
}

pub fn is_locked() -> bool {
    BKL.is_locked()
}

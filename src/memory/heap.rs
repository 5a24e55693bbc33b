//! Kernel heap.
//!
//! The teacher's hand-rolled `LinkedListAllocator` is replaced with the
//! `linked_list_allocator` crate it already declared as a dependency but
//! never wired up — same `spin`-guarded `GlobalAlloc` shape, sourced from
//! an ecosystem crate instead of reimplemented by hand.

use linked_list_allocator::LockedHeap;

/// Heap region reserved for kernel bookkeeping: TCBs, RPC stack frames,
/// `Vec`-backed bitmaps in PMEM/VMEM, and everything else `alloc` touches.
const HEAP_SIZE: usize = 4 * 1024 * 1024;

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// # Safety
/// Must be called exactly once during boot, before any heap allocation.
pub unsafe fn init() {
    ALLOCATOR.lock().init(HEAP_MEMORY.as_mut_ptr(), HEAP_SIZE);
}

pub fn free_memory() -> usize {
    ALLOCATOR.lock().free()
}

pub fn used_memory() -> usize {
    ALLOCATOR.lock().used()
}

#[cfg(not(feature = "testing"))]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    crate::kprintln!("FATAL: heap allocation failed");
    crate::kprintln!("  requested: {} bytes, align: {}", layout.size(), layout.align());
    crate::kprintln!("  free heap: {} bytes", free_memory());
    panic!("out of memory")
}

/// Shared host-backed heap bring-up for tests, mirroring
/// `pmem::test_support::ensure_init` — unit/integration tests never run
/// `boot::main`, so nothing else calls `heap::init` for them.
#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    static INIT: spin::Once<()> = spin::Once::new();

    /// Idempotent: the first caller across the whole test binary wins the
    /// underlying `Once`, which is fine since every caller wants the same
    /// heap.
    pub fn ensure_init() {
        INIT.call_once(|| unsafe { super::init() });
    }
}

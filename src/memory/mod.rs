//! Memory management subsystem.
//!
//! - `address`: type-safe physical/virtual addresses (`PhysAddr`/`VirtAddr`).
//! - `orders`: MEM-CONST, the runtime page-size order table.
//! - `pmem`: PMEM, the multi-order buddy physical allocator.
//! - `nodes`: NODES, the fixed-size record sub-allocator built on PMEM.
//! - `vmem`: VMEM, the per-address-space page table and region tracker.
//! - `devmem`: DEVMEM, identity-mapped MMIO windows.
//! - `heap`: the kernel heap (`alloc` backing store).
//!
//! - `shm`: shared memory region registry (owner/reference counting).

pub mod address;
pub mod devmem;
pub mod heap;
pub mod nodes;
pub mod orders;
pub mod pmem;
pub mod shm;
pub mod vmem;

pub use address::{PageFrameNumber, PhysAddr, VirtAddr, PAGE_SIZE, VM_KERN};
pub use orders::{MAX_ORDER, ORDERS};
pub use vmem::Vmem;

use crate::kprintln;

/// Boot-time memory bring-up: size PMEM from the FDT-reported RAM window,
/// reserve the kernel image and boot artifacts, then bring up the heap.
///
/// # Safety
/// Must run exactly once, early in `boot::main`, before any allocation.
pub unsafe fn init(ram_start: PhysAddr, ram_size: usize, kernel_start: PhysAddr, kernel_end: PhysAddr) {
    kprintln!(
        "[memory] RAM {:#x}-{:#x} ({} MiB)",
        ram_start.as_usize(),
        ram_start.as_usize() + ram_size,
        ram_size / (1024 * 1024)
    );

    let num_pages = ram_size / PAGE_SIZE;
    pmem::init(ram_start, num_pages);

    let reserved = kernel_end.as_usize() - ram_start.as_usize();
    pmem::reserve(ram_start, reserved);

    heap::init();

    if let Some((free, total)) = pmem::stats() {
        kprintln!(
            "[memory] PMEM {}/{} pages free ({} MiB usable)",
            free,
            total,
            (free * PAGE_SIZE) / (1024 * 1024)
        );
    }
    let _ = kernel_start;
}

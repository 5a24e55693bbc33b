//! VMEM round-trip property (§8): `map(v, p, va, f, o); unmap(v, va, o)`
//! leaves `v` in an observable state identical to before the pair — the
//! translation is gone, and the same virtual address can be mapped again
//! afterward. `unmap` only clears the PTE and the region entry; it never
//! frees the underlying physical frame, so this is checked via `translate`
//! rather than via `pmem::stats`.
//!
//! Run with `cargo test --features testing`.

use orphanage_kernel::arch::riscv64::pagetable::PageTableFlags;
use orphanage_kernel::memory::address::VirtAddr;
use orphanage_kernel::memory::pmem;
use orphanage_kernel::memory::vmem::{CloneMode, Vmem};

#[test]
fn map_unmap_remap_round_trips() {
    pmem::test_support::ensure_init();

    let mut vmem = Vmem::new().unwrap();
    let frame = pmem::alloc(0).unwrap();
    let virt = VirtAddr::new(0x10_0000);

    assert_eq!(vmem.translate(virt), None);

    vmem.map(virt, frame.phys_addr(), 1, PageTableFlags::USER_DATA, CloneMode::Shared).unwrap();
    assert_eq!(vmem.translate(virt), Some(frame.phys_addr()));

    vmem.unmap(virt, 1).unwrap();
    assert_eq!(vmem.translate(virt), None, "translation must vanish after unmap");

    // The frame itself was never freed by unmap, so re-mapping it (or a
    // fresh one) at the same address must succeed exactly as before.
    vmem.map(virt, frame.phys_addr(), 1, PageTableFlags::USER_DATA, CloneMode::Shared).unwrap();
    assert_eq!(vmem.translate(virt), Some(frame.phys_addr()));

    vmem.unmap(virt, 1).unwrap();
    pmem::free(0, frame).unwrap();
}

#[test]
fn multi_page_round_trip_is_fully_disjoint_afterward() {
    pmem::test_support::ensure_init();

    let mut vmem = Vmem::new().unwrap();
    let base_virt = VirtAddr::new(0x20_0000);
    let frames: Vec<_> = (0..4).map(|_| pmem::alloc(0).unwrap()).collect();
    let base_phys = frames[0].phys_addr();

    // The four frames PMEM handed back need not be contiguous in general,
    // but order-0 allocations from a freshly initialized arena are, so
    // `map`'s "contiguous run" contract holds for this arena.
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(
            frame.phys_addr().as_usize(),
            base_phys.as_usize() + i * orphanage_kernel::memory::address::PAGE_SIZE
        );
    }

    vmem.map(base_virt, base_phys, 4, PageTableFlags::USER_DATA, CloneMode::Shared).unwrap();
    for i in 0..4 {
        let v = VirtAddr::new(base_virt.as_usize() + i * orphanage_kernel::memory::address::PAGE_SIZE);
        assert!(vmem.translate(v).is_some());
    }

    vmem.unmap(base_virt, 4).unwrap();
    for i in 0..4 {
        let v = VirtAddr::new(base_virt.as_usize() + i * orphanage_kernel::memory::address::PAGE_SIZE);
        assert_eq!(vmem.translate(v), None);
    }

    for frame in frames {
        pmem::free(0, frame).unwrap();
    }
}

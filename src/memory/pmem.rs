//! PMEM — the physical page allocator.
//!
//! Grounded on `memory::frame_allocator`'s bitmap-per-region technique and
//! its `spin::Once<spin::Mutex<_>>` singleton shape, generalized from a flat
//! 4 KiB bitmap to a per-order `empty`/`full` bitmap hierarchy (§4.1).
//!
//! Invariant maintained by every `alloc`/`free` pair: `empty[order][i]` is
//! true iff the entire subtree rooted at chunk `i` of that order is free;
//! `full[order][i]` is true iff it is entirely allocated. Both propagate
//! strictly upward on `alloc`/`free` so a query at any order is O(1).

use super::address::{PageFrameNumber, PhysAddr};
use super::orders::{OrderTable, ORDERS, MAX_ORDER};
use crate::error::{KernelError, KernelResult};
use alloc::vec::Vec;

struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    fn new(len: usize, initial: bool) -> Self {
        let word_count = (len + 63) / 64;
        let fill = if initial { !0u64 } else { 0u64 };
        Self { words: alloc::vec![fill; word_count.max(1)], len }
    }

    fn get(&self, i: usize) -> bool {
        (self.words[i / 64] >> (i % 64)) & 1 != 0
    }

    fn set(&mut self, i: usize, val: bool) {
        let mask = 1u64 << (i % 64);
        if val {
            self.words[i / 64] |= mask;
        } else {
            self.words[i / 64] &= !mask;
        }
    }

    fn first_set(&self) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word != 0 {
                let bit = word.trailing_zeros() as usize;
                let idx = word_idx * 64 + bit;
                if idx < self.len {
                    return Some(idx);
                }
            }
        }
        None
    }

    fn all_set_in_range(&self, start: usize, count: usize) -> bool {
        (start..start + count).all(|i| i < self.len && self.get(i))
    }
}

pub struct Pmem {
    orders: &'static OrderTable,
    /// `empty[order]` bitset, index 0 = order 0 (base pages).
    empty: [Bitset; MAX_ORDER + 1],
    /// `full[order]` bitset.
    full: [Bitset; MAX_ORDER + 1],
    /// Physical address of page frame 0.
    base: PhysAddr,
    counts: [usize; MAX_ORDER + 1],
}

impl Pmem {
    /// `num_pages` is the number of order-0 (base page) frames available
    /// starting at `base`. Counts at higher orders are derived and rounded
    /// up, with any partial top-level chunk trimmed from `empty` so it is
    /// never handed out (reserved implicitly, matching `reserve` semantics
    /// for the tail of RAM that doesn't fill a whole top chunk).
    fn new(base: PhysAddr, num_pages: usize) -> Self {
        let mut counts = [0usize; MAX_ORDER + 1];
        counts[0] = num_pages;
        for order in 1..=MAX_ORDER {
            let width = ORDERS.width(order);
            counts[order] = (counts[order - 1] + width - 1) / width;
        }

        let empty = core::array::from_fn(|order| Bitset::new(counts[order], true));
        let full = core::array::from_fn(|order| Bitset::new(counts[order], false));

        let mut pmem = Self { orders: &ORDERS, empty, full, base, counts };

        // Trim any order-0 tail that doesn't fill a full higher-order chunk:
        // mark those tail pages allocated so they're never returned, and
        // propagate the resulting non-emptiness upward.
        for order in (1..=MAX_ORDER).rev() {
            let width = ORDERS.width(order);
            let exact_children = pmem.counts[order - 1];
            let last_parent_children = exact_children - (pmem.counts[order] - 1) * width;
            if last_parent_children < width {
                let parent = pmem.counts[order] - 1;
                for child in last_parent_children..width {
                    let child_idx = parent * width + child;
                    if child_idx < pmem.empty[order - 1].len {
                        pmem.empty[order - 1].set(child_idx, false);
                        pmem.full[order - 1].set(child_idx, true);
                    }
                }
            }
        }
        pmem
    }

    fn propagate_not_empty(&mut self, mut order: usize, mut idx: usize) {
        while order < MAX_ORDER {
            let parent = idx / self.orders.width(order + 1);
            if self.empty[order + 1].get(parent) {
                self.empty[order + 1].set(parent, false);
            }
            order += 1;
            idx = parent;
        }
    }

    fn propagate_full(&mut self, mut order: usize, mut idx: usize) {
        loop {
            self.full[order].set(idx, true);
            if order >= MAX_ORDER {
                break;
            }
            let width = self.orders.width(order + 1);
            let parent = idx / width;
            let first_child = parent * width;
            if self.full[order].all_set_in_range(first_child, width) {
                order += 1;
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn clear_full_ancestors(&mut self, mut order: usize, mut idx: usize) {
        loop {
            self.full[order].set(idx, false);
            if order >= MAX_ORDER {
                break;
            }
            order += 1;
            idx /= self.orders.width(order);
        }
    }

    fn recompute_empty_upward(&mut self, mut order: usize, mut idx: usize) {
        loop {
            if order >= MAX_ORDER {
                break;
            }
            let width = self.orders.width(order + 1);
            let parent = idx / width;
            let first_child = parent * width;
            let all_free = (first_child..first_child + width)
                .all(|i| i < self.empty[order].len && self.empty[order].get(i));
            self.empty[order + 1].set(parent, all_free);
            order += 1;
            idx = parent;
        }
    }

    pub fn alloc(&mut self, order: usize) -> KernelResult<PageFrameNumber> {
        if order > MAX_ORDER {
            return Err(KernelError::Inval);
        }
        let idx = self.empty[order].first_set().ok_or(KernelError::OutOfMemory)?;
        self.empty[order].set(idx, false);
        self.propagate_not_empty(order, idx);
        self.propagate_full(order, idx);
        let frame = idx * (self.orders.size(order) / self.orders.size(0));
        Ok(PageFrameNumber::from_phys_addr(
            self.base.offset(frame * super::address::PAGE_SIZE),
        ))
    }

    pub fn free(&mut self, order: usize, frame: PageFrameNumber) -> KernelResult<()> {
        if order > MAX_ORDER {
            return Err(KernelError::Inval);
        }
        let base_frame = PageFrameNumber::from_phys_addr(self.base).index();
        let rel = frame.index().checked_sub(base_frame).ok_or(KernelError::Addr)?;
        let per_chunk = self.orders.size(order) / self.orders.size(0);
        if rel % per_chunk != 0 {
            return Err(KernelError::Align);
        }
        let idx = rel / per_chunk;
        if idx >= self.counts[order] {
            return Err(KernelError::Addr);
        }
        self.empty[order].set(idx, true);
        self.clear_full_ancestors(order, idx);
        self.recompute_empty_upward(order, idx);
        Ok(())
    }

    /// Reserve `[start, start+len)` bytes so PMEM never hands them out —
    /// used at boot to subtract the kernel image, initrd, FDT blob, and
    /// boot stack from the free pool (§4.1 `reserve`).
    pub fn reserve(&mut self, start: PhysAddr, len: usize) {
        let page = super::address::PAGE_SIZE;
        let base_frame = PageFrameNumber::from_phys_addr(self.base).index();
        let start_frame = PageFrameNumber::from_phys_addr(start).index();
        let first = start_frame.saturating_sub(base_frame);
        let num_pages = (len + page - 1) / page;
        for i in 0..num_pages {
            let idx = first + i;
            if idx < self.empty[0].len && self.empty[0].get(idx) {
                self.empty[0].set(idx, false);
                self.propagate_not_empty(0, idx);
                self.propagate_full(0, idx);
            }
        }
    }

    pub fn free_pages(&self) -> usize {
        (0..self.counts[0]).filter(|&i| self.empty[0].get(i)).count()
    }

    pub fn total_pages(&self) -> usize {
        self.counts[0]
    }
}

static PMEM: spin::Once<spin::Mutex<Pmem>> = spin::Once::new();

/// # Safety
/// Must be called exactly once during boot, before any `alloc`/`free` call.
pub unsafe fn init(base: PhysAddr, num_pages: usize) {
    PMEM.call_once(|| spin::Mutex::new(Pmem::new(base, num_pages)));
}

pub fn alloc(order: usize) -> KernelResult<PageFrameNumber> {
    let frame = PMEM.get().ok_or(KernelError::Misc)?.lock().alloc(order)?;
    crate::config::adjust_ram_usage(ORDERS.size(order) as isize);
    Ok(frame)
}

pub fn free(order: usize, frame: PageFrameNumber) -> KernelResult<()> {
    PMEM.get().ok_or(KernelError::Misc)?.lock().free(order, frame)?;
    crate::config::adjust_ram_usage(-(ORDERS.size(order) as isize));
    Ok(())
}

pub fn reserve(start: PhysAddr, len: usize) {
    if let Some(pmem) = PMEM.get() {
        pmem.lock().reserve(start, len);
    }
}

pub fn stats() -> Option<(usize, usize)> {
    PMEM.get().map(|p| {
        let p = p.lock();
        (p.free_pages(), p.total_pages())
    })
}

/// Shared host-backed arena for the `memory` module's tests. `nodes` and
/// `vmem` dereference the frames PMEM hands out (writing free-list nodes
/// and page table entries into them), so, unlike this module's own tests,
/// theirs need `pmem::init` pointed at genuinely addressable memory rather
/// than an arbitrary physical-looking constant.
#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::*;

    const ARENA_PAGES: usize = 512;
    static mut ARENA: [u8; ARENA_PAGES * super::super::address::PAGE_SIZE] =
        [0; ARENA_PAGES * super::super::address::PAGE_SIZE];

    /// Idempotent: the first caller across the whole test binary wins the
    /// underlying `Once`, which is fine since every caller wants the same
    /// arena.
    pub fn ensure_init() {
        unsafe {
            let base = PhysAddr::new(core::ptr::addr_of_mut!(ARENA) as usize);
            super::init(base, ARENA_PAGES);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(num_pages: usize) -> Pmem {
        Pmem::new(PhysAddr::new(0x8000_0000), num_pages)
    }

    #[test]
    fn alloc_and_free_order0_round_trips() {
        let mut pmem = fresh(16);
        let before = pmem.free_pages();
        let a = pmem.alloc(0).unwrap();
        let b = pmem.alloc(0).unwrap();
        assert_ne!(a, b);
        assert_eq!(pmem.free_pages(), before - 2);
        pmem.free(0, a).unwrap();
        pmem.free(0, b).unwrap();
        assert_eq!(pmem.free_pages(), before);
    }

    #[test]
    fn alloc_order1_consumes_all_children() {
        let mut pmem = fresh(1024);
        let before = pmem.free_pages();
        let width = ORDERS.width(1);
        let chunk = pmem.alloc(1).unwrap();
        assert_eq!(pmem.free_pages(), before - width);
        pmem.free(1, chunk).unwrap();
        assert_eq!(pmem.free_pages(), before);
    }

    #[test]
    fn exhaustion_returns_oomem() {
        let mut pmem = fresh(2);
        pmem.alloc(0).unwrap();
        pmem.alloc(0).unwrap();
        assert_eq!(pmem.alloc(0), Err(KernelError::OutOfMemory));
    }

    #[test]
    fn misaligned_free_is_rejected() {
        let mut pmem = fresh(1024);
        let width = ORDERS.width(1);
        let page_frame = PageFrameNumber::from_phys_addr(PhysAddr::new(0x8000_0000).offset(super::super::address::PAGE_SIZE));
        let _ = width;
        assert_eq!(pmem.free(1, page_frame), Err(KernelError::Align));
    }

    #[test]
    fn reserve_removes_pages_from_pool() {
        let mut pmem = fresh(16);
        let before = pmem.free_pages();
        pmem.reserve(PhysAddr::new(0x8000_0000), 4 * super::super::address::PAGE_SIZE);
        assert_eq!(pmem.free_pages(), before - 4);
    }
}

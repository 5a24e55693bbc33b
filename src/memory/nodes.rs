//! NODES — the fixed-size record sub-allocator.
//!
//! Carves page-sized chunks obtained from `memory::pmem` into fixed-size
//! records (e.g. `mem_region` descriptors) via an intrusive free list, the
//! same technique as the original `common/mem_nodes.c`: one page is never
//! returned to PMEM while it is the last page backing a pool, even when
//! completely empty, so a pool that oscillates between one and zero live
//! records doesn't thrash PMEM on every alloc/free.

use super::address::{PageFrameNumber, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use core::mem::size_of;
use core::ptr::NonNull;

struct Page {
    frame: PageFrameNumber,
    free_list: Option<NonNull<FreeNode>>,
    live: usize,
}

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// A pool of fixed-size, fixed-alignment records. `T` is never actually
/// stored as a typed value in freed slots — the slot is reused as a
/// `FreeNode` until handed out again — so `T` must be `Sized` and no larger
/// than a page.
pub struct NodePool<T> {
    record_size: usize,
    records_per_page: usize,
    pages: alloc::vec::Vec<Page>,
    _marker: core::marker::PhantomData<T>,
}

const MAX_PAGES_PER_POOL: usize = 64;

impl<T> NodePool<T> {
    pub const fn new() -> Self {
        let min_size = size_of::<T>().next_power_of_two();
        let record_size = if min_size > size_of::<usize>() {
            min_size
        } else {
            size_of::<usize>()
        };
        Self {
            record_size,
            records_per_page: 0,
            pages: alloc::vec::Vec::new(),
            _marker: core::marker::PhantomData,
        }
    }

    fn records_per_page(&self) -> usize {
        if self.records_per_page == 0 {
            PAGE_SIZE / self.record_size
        } else {
            self.records_per_page
        }
    }

    fn grow(&mut self) -> KernelResult<()> {
        if self.pages.len() >= MAX_PAGES_PER_POOL {
            return Err(KernelError::OutOfMemory);
        }
        let frame = super::pmem::alloc(0)?;
        let per_page = self.records_per_page();
        let base = frame.phys_addr().as_usize() as *mut u8;

        let mut head: Option<NonNull<FreeNode>> = None;
        for i in (0..per_page).rev() {
            // SAFETY: slot `i` lies within the freshly allocated page and is
            // at least `size_of::<FreeNode>()` wide because `record_size`
            // is rounded up to a power of two no smaller than a pointer.
            unsafe {
                let slot = base.add(i * self.record_size) as *mut FreeNode;
                slot.write(FreeNode { next: head });
                head = NonNull::new(slot);
            }
        }

        self.pages.push(Page { frame, free_list: head, live: 0 });
        Ok(())
    }

    pub fn alloc(&mut self) -> KernelResult<NonNull<T>> {
        if self.pages.iter().all(|p| p.free_list.is_none()) {
            self.grow()?;
        }
        for page in self.pages.iter_mut() {
            if let Some(node) = page.free_list {
                // SAFETY: `node` was pushed by `grow` and has not been freed.
                page.free_list = unsafe { node.as_ref().next };
                page.live += 1;
                return Ok(node.cast());
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// # Safety
    /// `ptr` must have been returned by `alloc` on this pool and not freed
    /// since.
    pub unsafe fn free(&mut self, ptr: NonNull<T>) -> KernelResult<()> {
        let addr = ptr.as_ptr() as usize;
        let per_page = self.records_per_page();
        let page_idx = self
            .pages
            .iter()
            .position(|p| {
                let start = p.frame.phys_addr().as_usize();
                addr >= start && addr < start + PAGE_SIZE
            })
            .ok_or(KernelError::Addr)?;

        let node_ptr = ptr.cast::<FreeNode>();
        let page = &mut self.pages[page_idx];
        node_ptr.as_ptr().write(FreeNode { next: page.free_list });
        page.free_list = Some(node_ptr);
        page.live -= 1;

        if page.live == 0 && self.pages.len() > 1 {
            let frame = self.pages[page_idx].frame;
            self.pages.swap_remove(page_idx);
            super::pmem::free(0, frame)?;
        }
        let _ = per_page;
        Ok(())
    }

    pub fn live_records(&self) -> usize {
        self.pages.iter().map(|p| p.live).sum()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct MemRegion {
        base: usize,
        len: usize,
    }

    fn with_pmem<R>(f: impl FnOnce() -> R) -> R {
        super::super::pmem::test_support::ensure_init();
        f()
    }

    #[test]
    fn alloc_free_round_trips_and_keeps_last_page() {
        with_pmem(|| {
            let mut pool: NodePool<MemRegion> = NodePool::new();
            let a = pool.alloc().unwrap();
            assert_eq!(pool.page_count(), 1);
            unsafe { pool.free(a).unwrap() };
            // Pool never drops to zero pages even when empty.
            assert_eq!(pool.page_count(), 1);
            assert_eq!(pool.live_records(), 0);
        });
    }

    #[test]
    fn grows_a_second_page_when_first_is_full() {
        with_pmem(|| {
            let mut pool: NodePool<MemRegion> = NodePool::new();
            let per_page = PAGE_SIZE / size_of::<MemRegion>().next_power_of_two().max(size_of::<usize>());
            let mut handles = alloc::vec::Vec::new();
            for _ in 0..per_page {
                handles.push(pool.alloc().unwrap());
            }
            assert_eq!(pool.page_count(), 1);
            handles.push(pool.alloc().unwrap());
            assert_eq!(pool.page_count(), 2);
        });
    }
}

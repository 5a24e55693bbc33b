//! VMEM — the architecture-agnostic virtual address space manager.
//!
//! Walks the page table generically over `memory::orders::ORDERS` and
//! `arch::riscv64::pagetable::VmemLevel`, the same level-indexed-walk idiom
//! as `arch/aarch64/page_table.rs`'s `PageTableLevel`, so a 3-level Sv39
//! walk and a hypothetical 4-level Sv48 walk would share this code modulo
//! `VmemLevel`'s level count. Each address space tracks its mapped regions
//! so `clone_address_space` can replay them instead of walking raw PTEs.

use super::address::{PageFrameNumber, PhysAddr, VirtAddr, PAGE_SIZE};
use super::pmem;
use crate::arch::riscv64::pagetable::{PageTable, PageTableFlags, VmemLevel, ENTRIES_PER_TABLE};
use crate::error::{KernelError, KernelResult};
use alloc::vec::Vec;

/// How a mapped region should be treated when its owning address space is
/// cloned (`fork`, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneMode {
    /// Share the same backing frames (copy-on-write not implemented at the
    /// PTE level yet — both spaces keep `WRITE` and genuinely alias).
    Shared,
    /// Allocate fresh frames in the child and copy the bytes.
    Deep,
}

#[derive(Clone)]
struct Region {
    base: VirtAddr,
    pages: usize,
    flags: PageTableFlags,
    clone_mode: CloneMode,
}

/// One address space: a root Sv39 page table plus the region list needed to
/// clone or tear it down. `global` address spaces (the shared high zone
/// above `VM_KERN`) are mapped into every process's root table at
/// `use_vmem` time by copying the top-level entries above the split index.
pub struct Vmem {
    root: *mut PageTable,
    root_phys: PhysAddr,
    regions: Vec<Region>,
}

unsafe impl Send for Vmem {}

impl Vmem {
    pub fn new() -> KernelResult<Self> {
        let frame = pmem::alloc(0)?;
        let root_phys = frame.phys_addr();
        let root = root_phys.as_usize() as *mut PageTable;
        unsafe { (*root).zero() };
        Ok(Self { root, root_phys, regions: Vec::new() })
    }

    pub fn root_phys(&self) -> PhysAddr {
        self.root_phys
    }

    /// Sv39 `satp`: MODE=8 (Sv39) in bits [63:60], PPN in bits [43:0].
    pub fn satp(&self) -> usize {
        let ppn = self.root_phys.as_usize() >> 12;
        (8usize << 60) | ppn
    }

    fn table_at(ptr: PhysAddr) -> *mut PageTable {
        ptr.as_usize() as *mut PageTable
    }

    /// Map `pages` consecutive order-0 frames starting at `phys` into
    /// `pages` consecutive order-0 slots starting at `virt`, walking the
    /// 3-level tree and allocating intermediate tables from PMEM on demand.
    pub fn map(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        pages: usize,
        flags: PageTableFlags,
        clone_mode: CloneMode,
    ) -> KernelResult<()> {
        if !virt.is_aligned(PAGE_SIZE) || !phys.is_aligned(PAGE_SIZE) {
            return Err(KernelError::Align);
        }
        for i in 0..pages {
            let v = VirtAddr::new(virt.as_usize() + i * PAGE_SIZE);
            let p = PhysAddr::new(phys.as_usize() + i * PAGE_SIZE);
            self.map_one(v, p, flags)?;
        }
        self.regions.push(Region { base: virt, pages, flags, clone_mode });
        Ok(())
    }

    fn map_one(&mut self, virt: VirtAddr, phys: PhysAddr, flags: PageTableFlags) -> KernelResult<()> {
        let mut table_phys = self.root_phys;
        let mut level = VmemLevel::L0;
        loop {
            let table = unsafe { &mut *Self::table_at(table_phys) };
            let idx = level.index(virt);
            match level.next() {
                None => {
                    table.set_entry(idx, phys, flags | PageTableFlags::VALID);
                    return Ok(());
                }
                Some(next_level) => {
                    if !table.is_valid(idx) {
                        let frame = pmem::alloc(0)?;
                        let child_phys = frame.phys_addr();
                        unsafe { (*Self::table_at(child_phys)).zero() };
                        table.set_entry(idx, child_phys, PageTableFlags::VALID);
                    } else if table.is_leaf(idx) {
                        return Err(KernelError::Addr);
                    }
                    table_phys = table.get_addr(idx).ok_or(KernelError::Misc)?;
                    level = next_level;
                }
            }
        }
    }

    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let mut table_phys = self.root_phys;
        let mut level = VmemLevel::L0;
        loop {
            let table = unsafe { &*Self::table_at(table_phys) };
            let idx = level.index(virt);
            if !table.is_valid(idx) {
                return None;
            }
            if table.is_leaf(idx) {
                let page_base = table.get_addr(idx)?;
                let offset = virt.as_usize() & (PAGE_SIZE - 1);
                return Some(PhysAddr::new(page_base.as_usize() + offset));
            }
            match level.next() {
                None => return None,
                Some(next) => {
                    table_phys = table.get_addr(idx)?;
                    level = next;
                }
            }
        }
    }

    pub fn unmap(&mut self, virt: VirtAddr, pages: usize) -> KernelResult<()> {
        for i in 0..pages {
            let v = VirtAddr::new(virt.as_usize() + i * PAGE_SIZE);
            self.unmap_one(v)?;
        }
        self.regions.retain(|r| r.base != virt);
        Ok(())
    }

    fn unmap_one(&mut self, virt: VirtAddr) -> KernelResult<()> {
        let mut table_phys = self.root_phys;
        let mut level = VmemLevel::L0;
        loop {
            let table = unsafe { &mut *Self::table_at(table_phys) };
            let idx = level.index(virt);
            if !table.is_valid(idx) {
                return Err(KernelError::NotFound);
            }
            if table.is_leaf(idx) {
                table.clear_entry(idx);
                return Ok(());
            }
            match level.next() {
                None => return Err(KernelError::NotFound),
                Some(next) => {
                    table_phys = table.get_addr(idx).ok_or(KernelError::Misc)?;
                    level = next;
                }
            }
        }
    }

    /// Clone every tracked region into `child`, sharing frames for
    /// `CloneMode::Shared` regions and allocating-and-copying for
    /// `CloneMode::Deep` ones (`fork`, §4.9).
    pub fn clone_into(&self, child: &mut Vmem) -> KernelResult<()> {
        for region in &self.regions {
            match region.clone_mode {
                CloneMode::Shared => {
                    for i in 0..region.pages {
                        let v = VirtAddr::new(region.base.as_usize() + i * PAGE_SIZE);
                        let phys = self.translate(v).ok_or(KernelError::Addr)?;
                        child.map_one(v, phys, region.flags)?;
                    }
                    child.regions.push(region.clone());
                }
                CloneMode::Deep => {
                    for i in 0..region.pages {
                        let v = VirtAddr::new(region.base.as_usize() + i * PAGE_SIZE);
                        let src_phys = self.translate(v).ok_or(KernelError::Addr)?;
                        let dst_frame = pmem::alloc(0)?;
                        let dst_phys = dst_frame.phys_addr();
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                src_phys.as_usize() as *const u8,
                                dst_phys.as_usize() as *mut u8,
                                PAGE_SIZE,
                            );
                        }
                        child.map_one(v, dst_phys, region.flags)?;
                    }
                    child.regions.push(region.clone());
                }
            }
        }
        Ok(())
    }

    /// Release every page-table frame this address space privately owns
    /// (the root table and any interior tables `map_one` allocated on
    /// demand) back to PMEM. Leaf frames are never touched here, same as
    /// `unmap` — a region's data pages may be shared with another address
    /// space via `CloneMode::Shared`, so only the caller that tracks that
    /// lifetime (`memory::shm`, a parent's own `free_mem`) may free them.
    fn free_tables(table_phys: PhysAddr, level: VmemLevel) {
        if let Some(next) = level.next() {
            let table = unsafe { &*Self::table_at(table_phys) };
            for idx in 0..ENTRIES_PER_TABLE {
                if table.is_valid(idx) && !table.is_leaf(idx) {
                    if let Some(child) = table.get_addr(idx) {
                        Self::free_tables(child, next);
                    }
                }
            }
        }
        let _ = pmem::free(0, PageFrameNumber::from_phys_addr(table_phys));
    }
}

impl Drop for Vmem {
    fn drop(&mut self) {
        Self::free_tables(self.root_phys, VmemLevel::L0);
    }
}

/// Install `vmem`'s root table as the active translation for this hart.
///
/// # Safety
/// The caller must guarantee every mapping the currently executing code
/// path depends on (kernel text, the current stack) remains valid under
/// the new table.
pub unsafe fn use_vmem(vmem: &Vmem) {
    #[cfg(target_arch = "riscv64")]
    {
        let satp = vmem.satp();
        core::arch::asm!("csrw satp, {0}", "sfence.vma", in(reg) satp);
    }
    #[cfg(not(target_arch = "riscv64"))]
    {
        let _ = vmem;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_pmem() {
        pmem::test_support::ensure_init();
    }

    #[test]
    fn map_then_translate_round_trips() {
        init_pmem();
        let mut vmem = Vmem::new().unwrap();
        let frame = pmem::alloc(0).unwrap();
        let virt = VirtAddr::new(0x1000);
        vmem.map(virt, frame.phys_addr(), 1, PageTableFlags::USER_DATA, CloneMode::Shared).unwrap();
        assert_eq!(vmem.translate(virt), Some(frame.phys_addr()));
        assert_eq!(vmem.translate(VirtAddr::new(virt.as_usize() + 8)), Some(PhysAddr::new(frame.phys_addr().as_usize() + 8)));
    }

    #[test]
    fn unmap_removes_translation() {
        init_pmem();
        let mut vmem = Vmem::new().unwrap();
        let frame = pmem::alloc(0).unwrap();
        let virt = VirtAddr::new(0x2000);
        vmem.map(virt, frame.phys_addr(), 1, PageTableFlags::USER_DATA, CloneMode::Shared).unwrap();
        vmem.unmap(virt, 1).unwrap();
        assert_eq!(vmem.translate(virt), None);
    }

    #[test]
    fn deep_clone_produces_independent_frame() {
        init_pmem();
        let mut parent = Vmem::new().unwrap();
        let frame = pmem::alloc(0).unwrap();
        let virt = VirtAddr::new(0x3000);
        unsafe { *(frame.phys_addr().as_usize() as *mut u64) = 0xAAAA };
        parent.map(virt, frame.phys_addr(), 1, PageTableFlags::USER_DATA, CloneMode::Deep).unwrap();

        let mut child = Vmem::new().unwrap();
        parent.clone_into(&mut child).unwrap();
        let child_phys = child.translate(virt).unwrap();
        assert_ne!(child_phys, frame.phys_addr());
        let val = unsafe { *(child_phys.as_usize() as *const u64) };
        assert_eq!(val, 0xAAAA);
    }
}

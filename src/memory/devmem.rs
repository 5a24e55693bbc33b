//! DEVMEM — identity-mapped MMIO device windows.
//!
//! Device windows are never carved out of PMEM (they aren't RAM); they're
//! mapped straight into the kernel's global zone at their physical address
//! with device-memory PTE attributes. Grounded on the same
//! `spin::Once`-guarded registry idiom as `memory::pmem`/`config`.

use super::address::{align_down, align_up, PhysAddr, VirtAddr, PAGE_SIZE};
use super::vmem::{CloneMode, Vmem};
use crate::arch::riscv64::pagetable::PageTableFlags;
use crate::error::KernelResult;
use alloc::vec::Vec;

/// An MMIO window the kernel (not user processes) can reach, e.g. the UART
/// or PLIC registers discovered from the FDT at boot.
#[derive(Debug, Clone, Copy)]
pub struct DeviceWindow {
    pub phys_base: PhysAddr,
    pub len: usize,
}

static WINDOWS: spin::Mutex<Vec<DeviceWindow>> = spin::Mutex::new(Vec::new());

/// Identity-map `[phys_base, phys_base + len)` into the kernel's global
/// zone of `vmem` with device attributes and record it in the registry.
pub fn map_device(vmem: &mut Vmem, phys_base: PhysAddr, len: usize) -> KernelResult<VirtAddr> {
    let start = PhysAddr::new(align_down(phys_base.as_usize(), PAGE_SIZE));
    let end = align_up(phys_base.as_usize() + len, PAGE_SIZE);
    let pages = (end - start.as_usize()) / PAGE_SIZE;

    let virt = VirtAddr::new(super::address::VM_KERN + start.as_usize());
    vmem.map(virt, start, pages, PageTableFlags::DEVICE, CloneMode::Shared)?;

    WINDOWS.lock().push(DeviceWindow { phys_base, len });
    Ok(VirtAddr::new(virt.as_usize() + (phys_base.as_usize() - start.as_usize())))
}

pub fn windows() -> Vec<DeviceWindow> {
    WINDOWS.lock().clone()
}

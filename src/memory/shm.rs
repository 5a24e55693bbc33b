//! SHM — shared memory regions.
//!
//! A registry of page lists an owner thread can hand out references to.
//! Grounded on `memory::nodes`'s multi-page-list idiom (a `Vec<PhysAddr>`
//! instead of a free list) and `memory::vmem::CloneMode::Shared` for
//! mapping the same frames into a second address space without copying.
//! Backs the `req_sharedmem`/`ref_sharedmem`/`free_mem` syscalls (§6).

use crate::error::{KernelError, KernelResult};
use crate::memory::address::PhysAddr;
use crate::memory::pmem;
use crate::proc::tcb::Tid;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub type ShmId = u32;

struct Region {
    frames: Vec<PhysAddr>,
    owner: Tid,
    /// References held by other threads (`ref_sharedmem`), not counting
    /// the owner's own creation.
    refcount: usize,
}

struct Registry {
    regions: BTreeMap<ShmId, Region>,
    next_id: ShmId,
}

static REGISTRY: spin::Mutex<Registry> =
    spin::Mutex::new(Registry { regions: BTreeMap::new(), next_id: 1 });

/// Allocate `pages` order-0 frames and register them as a shared region
/// owned by `owner`. Returns the region id and its frame list.
pub fn create(owner: Tid, pages: usize) -> KernelResult<(ShmId, Vec<PhysAddr>)> {
    if pages == 0 {
        return Err(KernelError::Inval);
    }
    let mut frames = Vec::with_capacity(pages);
    for _ in 0..pages {
        match pmem::alloc(0) {
            Ok(frame) => frames.push(frame.phys_addr()),
            Err(e) => {
                for f in frames {
                    let _ = pmem::free(0, crate::memory::PageFrameNumber::from_phys_addr(f));
                }
                return Err(e);
            }
        }
    }
    let mut reg = REGISTRY.lock();
    let id = reg.next_id;
    reg.next_id += 1;
    let cloned = frames.clone();
    reg.regions.insert(id, Region { frames, owner, refcount: 0 });
    Ok((id, cloned))
}

/// Take a reference to an existing region, incrementing its refcount.
/// Returns the frame list to map into the referencing address space.
pub fn reference(id: ShmId) -> KernelResult<Vec<PhysAddr>> {
    let mut reg = REGISTRY.lock();
    let region = reg.regions.get_mut(&id).ok_or(KernelError::NotFound)?;
    region.refcount += 1;
    Ok(region.frames.clone())
}

/// Drop one reference taken by `reference`.
pub fn unreference(id: ShmId) -> KernelResult<()> {
    let mut reg = REGISTRY.lock();
    let region = reg.regions.get_mut(&id).ok_or(KernelError::NotFound)?;
    if region.refcount == 0 {
        return Err(KernelError::Inval);
    }
    region.refcount -= 1;
    Ok(())
}

/// Free the owner's handle on a region. Fails while any reference is
/// outstanding (§8 testable property: "freeing the owner before its
/// reference must fail").
pub fn free_owner(id: ShmId, caller: Tid) -> KernelResult<()> {
    let mut reg = REGISTRY.lock();
    let region = reg.regions.get(&id).ok_or(KernelError::NotFound)?;
    if region.owner != caller {
        return Err(KernelError::Perm);
    }
    if region.refcount > 0 {
        return Err(KernelError::AlreadyExists);
    }
    let region = reg.regions.remove(&id).unwrap();
    drop(reg);
    for f in region.frames {
        let _ = pmem::free(0, crate::memory::PageFrameNumber::from_phys_addr(f));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pmem;

    #[test]
    fn owner_cannot_free_while_referenced() {
        pmem::test_support::ensure_init();
        let (id, frames) = create(1, 1).unwrap();
        assert_eq!(frames.len(), 1);
        reference(id).unwrap();
        assert_eq!(free_owner(id, 1), Err(KernelError::AlreadyExists));
        unreference(id).unwrap();
        assert!(free_owner(id, 1).is_ok());
    }

    #[test]
    fn free_by_non_owner_is_rejected() {
        pmem::test_support::ensure_init();
        let (id, _) = create(5, 1).unwrap();
        assert_eq!(free_owner(id, 6), Err(KernelError::Perm));
        free_owner(id, 5).unwrap();
    }

    #[test]
    fn reference_unknown_region_is_not_found() {
        assert_eq!(reference(0xFFFF), Err(KernelError::NotFound));
    }
}

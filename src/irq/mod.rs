//! IRQ — interrupt-to-thread routing.
//!
//! A dense `irq_id -> tid` table: registering a handler (`irq_req`, §6)
//! claims a slot; delivery posts a notification to the owning thread with
//! `NOTIFY_IRQ` rather than calling into it directly, reusing the same
//! mechanism as `ipc::notify`. Grounded on the original `src/irq.c`'s
//! fixed-size dispatch table and `common/irq.c`'s shared registration path.

use crate::error::{KernelError, KernelResult};
use crate::proc::tcb::Tid;

pub const MAX_IRQ: usize = 256;

/// Reserved notification id delivered alongside an IRQ wakeup.
pub const NOTIFY_IRQ: u32 = 0xFFFF_FFFE;

static HANDLERS: spin::Mutex<[Option<Tid>; MAX_IRQ]> = spin::Mutex::new([None; MAX_IRQ]);

pub fn request(irq_id: usize, tid: Tid) -> KernelResult<()> {
    if irq_id >= MAX_IRQ {
        return Err(KernelError::Inval);
    }
    let mut table = HANDLERS.lock();
    if table[irq_id].is_some() {
        return Err(KernelError::AlreadyExists);
    }
    table[irq_id] = Some(tid);
    Ok(())
}

pub fn free(irq_id: usize, tid: Tid) -> KernelResult<()> {
    if irq_id >= MAX_IRQ {
        return Err(KernelError::Inval);
    }
    let mut table = HANDLERS.lock();
    match table[irq_id] {
        Some(owner) if owner == tid => {
            table[irq_id] = None;
            Ok(())
        }
        Some(_) => Err(KernelError::Perm),
        None => Err(KernelError::NotFound),
    }
}

/// Called from the trap handler on an external-interrupt cause; returns
/// the thread to notify, if any handler is registered for `irq_id`.
pub fn dispatch(irq_id: usize) -> Option<Tid> {
    HANDLERS.lock().get(irq_id).copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_dispatch_finds_owner() {
        request(5, 42).unwrap();
        assert_eq!(dispatch(5), Some(42));
        free(5, 42).unwrap();
        assert_eq!(dispatch(5), None);
    }

    #[test]
    fn double_request_is_rejected() {
        request(6, 1).unwrap();
        assert_eq!(request(6, 2), Err(KernelError::AlreadyExists));
        free(6, 1).unwrap();
    }

    #[test]
    fn free_by_non_owner_is_rejected() {
        request(7, 1).unwrap();
        assert_eq!(free(7, 2), Err(KernelError::Perm));
        free(7, 1).unwrap();
    }
}

//! TIMERS — the deadline-ordered timer list.
//!
//! A single sorted list of `(deadline, tid)` entries; the hardware
//! comparator (via `arch::riscv64::sbi::SbiFirmware::set_timer`) is always
//! programmed for the earliest deadline in the list, and firing delivers a
//! notification to that entry's thread rather than preempting it — this
//! kernel is strictly cooperative (see `scheduler`), so a timer is a wakeup
//! source, never a forced context switch. Reshaped from
//! `scheduler::timer`'s hardware-tick-driven preemption, which this design
//! explicitly drops.

use crate::arch::riscv64::sbi;
use crate::arch::riscv64::sbi::SbiFirmware;
use crate::error::{KernelError, KernelResult};
use crate::proc::tcb::Tid;
use alloc::vec::Vec;

/// Reserved notification id delivered when a timer fires.
pub const NOTIFY_TIMER: u32 = 0xFFFF_FFFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: u64,
    tid: Tid,
    id: u32,
    /// §3: `repeat_ticks`. Zero means one-shot; non-zero re-arms at
    /// `deadline + repeat` each time it fires (§4.9).
    repeat: u64,
}

struct TimerList {
    entries: Vec<Entry>,
    next_id: u32,
}

static TIMERS: spin::Mutex<TimerList> =
    spin::Mutex::new(TimerList { entries: Vec::new(), next_id: 1 });

fn program_hardware(list: &TimerList) {
    if let Some(earliest) = list.entries.first() {
        sbi::firmware().set_timer(earliest.deadline);
    }
}

fn insert(list: &mut TimerList, entry: Entry) {
    let pos = list.entries.partition_point(|e| e.deadline <= entry.deadline);
    list.entries.insert(pos, entry);
}

/// Insert a new deadline, keeping the list sorted ascending, and reprogram
/// the hardware comparator if this became the earliest entry. `repeat == 0`
/// is one-shot; otherwise the timer re-arms itself on every `fire` (§4.9).
pub fn request_absolute(deadline: u64, tid: Tid, repeat: u64) -> u32 {
    let mut list = TIMERS.lock();
    let id = list.next_id;
    list.next_id += 1;
    insert(&mut list, Entry { deadline, tid, id, repeat });
    program_hardware(&list);
    id
}

pub fn request_relative(now: u64, delta: u64, tid: Tid, repeat: u64) -> u32 {
    request_absolute(now.saturating_add(delta), tid, repeat)
}

pub fn cancel(id: u32) -> KernelResult<()> {
    let mut list = TIMERS.lock();
    let before = list.entries.len();
    list.entries.retain(|e| e.id != id);
    if list.entries.len() == before {
        return Err(KernelError::NotFound);
    }
    program_hardware(&list);
    Ok(())
}

/// Pop every entry whose deadline has passed as of `now`, re-inserting any
/// repeating timer at `deadline + repeat` (§4.9) before reprogramming the
/// comparator for whatever remains. Called from the trap handler on a
/// supervisor-timer interrupt.
pub fn fire(now: u64) -> Vec<Tid> {
    let mut list = TIMERS.lock();
    let split = list.entries.partition_point(|e| e.deadline <= now);
    let fired: Vec<Entry> = list.entries.drain(..split).collect();
    let tids = fired.iter().map(|e| e.tid).collect();
    for mut e in fired {
        if e.repeat != 0 {
            e.deadline += e.repeat;
            insert(&mut list, e);
        }
    }
    program_hardware(&list);
    tids
}

pub fn pending_count() -> usize {
    TIMERS.lock().entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_fire_in_deadline_order() {
        let id_a = request_absolute(100, 1, 0);
        let id_b = request_absolute(50, 2, 0);
        let _ = (id_a, id_b);
        let fired = fire(50);
        assert_eq!(fired, alloc::vec![2]);
        let fired = fire(100);
        assert_eq!(fired, alloc::vec![1]);
    }

    #[test]
    fn cancel_removes_a_pending_entry() {
        let before = pending_count();
        let id = request_absolute(1_000_000, 7, 0);
        assert_eq!(pending_count(), before + 1);
        cancel(id).unwrap();
        assert_eq!(pending_count(), before);
    }

    #[test]
    fn cancel_unknown_id_is_not_found() {
        assert_eq!(cancel(u32::MAX), Err(KernelError::NotFound));
    }

    #[test]
    fn repeating_timer_reinserts_itself_at_deadline_plus_repeat() {
        // Deadlines chosen well clear of the other tests' ranges in this
        // module, since all tests share the one global `TIMERS` list and
        // may run concurrently.
        let before = pending_count();
        let id = request_absolute(2_000_000, 3, 25);
        assert_eq!(pending_count(), before + 1);

        let fired = fire(2_000_000);
        assert_eq!(fired, alloc::vec![3], "must still fire on its original deadline");
        assert_eq!(pending_count(), before + 1, "a repeating timer re-arms itself rather than vanishing");

        // Not due until the re-armed deadline (2_000_000 + 25).
        assert_eq!(fire(2_000_024), alloc::vec![]);
        assert_eq!(fire(2_000_025), alloc::vec![3]);
        assert_eq!(pending_count(), before + 1, "it keeps re-arming on every fire");

        cancel(id).unwrap();
        assert_eq!(pending_count(), before);
    }

    #[test]
    fn one_shot_timer_does_not_reinsert_after_firing() {
        let before = pending_count();
        request_absolute(3_000_000, 4, 0);
        assert_eq!(fire(3_000_000), alloc::vec![4]);
        assert_eq!(pending_count(), before, "repeat == 0 must not re-arm");
    }
}

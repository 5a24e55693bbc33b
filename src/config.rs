//! Kernel configuration and compile-time collaborator composition.
//!
//! Every external collaborator named in the design (console, SBI firmware,
//! FDT source) resolves to a mock/null implementation under the matching
//! `*-mock`/`console-null` feature, and is meant to resolve to a hardware
//! backend under a `*-hw` feature in a real deployment — this crate does not
//! carry a hardware backend itself (out of scope, see `boot`/`arch::riscv64::sbi`).

use crate::boot::fdt::{FdtSource, ReservedRange, StaticFdtSource};
use crate::components::console::{
    mock::{MockConfig, MockConsole},
    null::{NullConfig, NullConsole},
    Console,
};
use crate::memory::address::PhysAddr;

#[cfg(feature = "console-mock")]
pub static CONSOLE: MockConsole = MockConsole::new(MockConfig);

#[cfg(feature = "console-null")]
pub static CONSOLE: NullConsole = NullConsole::new(NullConfig);

#[cfg(not(any(feature = "console-mock", feature = "console-null")))]
pub static CONSOLE: MockConsole = MockConsole::new(MockConfig);

/// Initialize the console component. Must run before any debug output.
pub fn init_console() {
    CONSOLE.init();
}

/// Typed accessor used by `debug::DebugWriter`.
pub fn console() -> &'static impl Console {
    &CONSOLE
}

static RESERVED: [ReservedRange; 0] = [];

/// Default FDT source for boards without a real parser wired in, and for
/// every host-target test. A hardware build under `fdt-hw` would instead
/// point this at a blob parsed out of the address `boot::main` receives.
pub static FDT_SOURCE: StaticFdtSource = StaticFdtSource {
    ram_base: PhysAddr::new(0x8020_0000),
    ram_size: 128 * 1024 * 1024,
    timebase_frequency: 10_000_000,
    num_harts: 1,
    reserved: &RESERVED,
};

/// Typed accessor used by `boot::main`.
pub fn fdt_source() -> &'static impl FdtSource {
    &FDT_SOURCE
}

/// `conf_get` target identifiers (§6/§10.3): readable kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConfKey {
    /// Bytes of RAM currently attributed to live allocations (PMEM + NODES + heap).
    RamUsage = 0,
    /// Timebase frequency in Hz, as read from the FDT at boot.
    TimebaseFrequency = 1,
    /// Number of hardware threads (harts) this kernel image was configured for.
    NumHarts = 2,
}

struct Conf {
    ram_usage: usize,
    timebase_frequency: u64,
    num_harts: u32,
}

static CONF: spin::Mutex<Conf> = spin::Mutex::new(Conf {
    ram_usage: 0,
    timebase_frequency: 0,
    num_harts: 1,
});

/// Record the FDT-derived facts the `conf_get` syscall surfaces.
pub fn set_boot_facts(timebase_frequency: u64, num_harts: u32) {
    let mut c = CONF.lock();
    c.timebase_frequency = timebase_frequency;
    c.num_harts = num_harts;
}

/// Called by PMEM/NODES/heap accounting on every alloc/free so `conf_get`
/// reflects current pressure (§7: the RAM-usage counter is the leak detector).
pub fn adjust_ram_usage(delta: isize) {
    let mut c = CONF.lock();
    c.ram_usage = (c.ram_usage as isize + delta).max(0) as usize;
}

pub fn conf_get(key: ConfKey) -> u64 {
    let c = CONF.lock();
    match key {
        ConfKey::RamUsage => c.ram_usage as u64,
        ConfKey::TimebaseFrequency => c.timebase_frequency,
        ConfKey::NumHarts => c.num_harts as u64,
    }
}

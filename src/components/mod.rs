//! Kernel components.
//!
//! Minimal built-in components providing only what the kernel itself needs.
//! Full-featured drivers (a real UART with interrupts/DMA, network stacks,
//! block devices) are out of scope for this crate; they sit behind the
//! traits in `components::console`, `arch::riscv64::sbi`, and `boot::fdt`,
//! composed at compile-time via cargo features rather than linked in.

pub mod console;

#![no_std]
#![no_main]

use core::arch::global_asm;

// Boot loader convention (§6 "Entry"): a0 = fdt_physical_addr, a1 = ram_base.
// _start sets up a stack from the linker-provided boot stack and tail-calls
// straight into `boot::main`, which never returns.
global_asm!(
    ".section .text._start",
    ".global _start",
    ".option norelax",
    "_start:",
    "    la sp, _boot_stack_top",
    "    call {main}",
    "1:",
    "    wfi",
    "    j 1b",
    main = sym orphanage_kernel::boot::main,
);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    orphanage_kernel::kprintln!("KERNEL PANIC: {}", info);
    loop {
        core::hint::spin_loop();
    }
}

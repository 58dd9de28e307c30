cfg_if::cfg_if! {
    if #[cfg(feature = "jump")] {
        pub mod jump;
        pub use jump::{get_boot_info, is_boot_hart};
    } else {
        pub mod dynamic;
        pub use dynamic::{get_boot_info, is_boot_hart};
    }
}

use core::arch::asm;
use core::ops::Range;
use riscv::register::mstatus;

pub struct BootInfo {
    pub next_address: usize,
    pub mpp: mstatus::MPP,
}

pub struct BootHart {
    pub fdt_address: usize,
    pub is_boot_hart: bool,
}

/// Gets boot hart information based on opaque and nonstandard_a2
/// parameters.
pub fn get_boot_hart(opaque: usize, nonstandard_a2: usize) -> BootHart {
    BootHart {
        fdt_address: opaque,
        is_boot_hart: is_boot_hart(nonstandard_a2),
    }
}

/// The firmware image span, taken from the linker-provided symbols.
pub fn firmware_address_range() -> Range<usize> {
    let start: usize;
    let end: usize;
    unsafe {
        asm!("la {}, sbi_start", out(reg) start, options(nomem));
        asm!("la {}, sbi_end", out(reg) end, options(nomem));
    }
    start..end
}

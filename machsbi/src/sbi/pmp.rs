use core::arch::asm;
use memprot::PmpEntry;

use crate::cfg::PMP_ENTRY_COUNT;

// The reference platform implements 16 PMP entries; the register writes
// below cover exactly that window.
const _: () = assert!(PMP_ENTRY_COUNT <= 16);

/// Turns every PMP entry off.
pub fn disable_all() {
    unsafe {
        asm!("csrw pmpcfg0, zero", options(nomem));
        asm!("csrw pmpcfg2, zero", options(nomem));
    }
}

/// Programs the hart's PMP from a computed entry list.
///
/// Config registers are cleared first so no transient entry pair can
/// match while the address registers are being rewritten, then all
/// address words are installed and the packed config words written last.
pub fn program(entries: &[PmpEntry]) {
    debug_assert!(entries.len() <= PMP_ENTRY_COUNT);

    disable_all();

    let mut cfg0: usize = 0;
    let mut cfg2: usize = 0;
    for (index, entry) in entries.iter().enumerate().take(PMP_ENTRY_COUNT) {
        write_pmpaddr(index, entry.addr);
        if index < 8 {
            cfg0 |= (entry.cfg as usize) << (index * 8);
        } else {
            cfg2 |= (entry.cfg as usize) << ((index - 8) * 8);
        }
    }
    unsafe {
        asm!("csrw pmpcfg0, {}", in(reg) cfg0, options(nomem));
        asm!("csrw pmpcfg2, {}", in(reg) cfg2, options(nomem));
        // Flush any address translation the old configuration allowed.
        asm!("sfence.vma");
    }
}

fn write_pmpaddr(index: usize, value: usize) {
    unsafe {
        match index {
            0 => asm!("csrw pmpaddr0, {}", in(reg) value, options(nomem)),
            1 => asm!("csrw pmpaddr1, {}", in(reg) value, options(nomem)),
            2 => asm!("csrw pmpaddr2, {}", in(reg) value, options(nomem)),
            3 => asm!("csrw pmpaddr3, {}", in(reg) value, options(nomem)),
            4 => asm!("csrw pmpaddr4, {}", in(reg) value, options(nomem)),
            5 => asm!("csrw pmpaddr5, {}", in(reg) value, options(nomem)),
            6 => asm!("csrw pmpaddr6, {}", in(reg) value, options(nomem)),
            7 => asm!("csrw pmpaddr7, {}", in(reg) value, options(nomem)),
            8 => asm!("csrw pmpaddr8, {}", in(reg) value, options(nomem)),
            9 => asm!("csrw pmpaddr9, {}", in(reg) value, options(nomem)),
            10 => asm!("csrw pmpaddr10, {}", in(reg) value, options(nomem)),
            11 => asm!("csrw pmpaddr11, {}", in(reg) value, options(nomem)),
            12 => asm!("csrw pmpaddr12, {}", in(reg) value, options(nomem)),
            13 => asm!("csrw pmpaddr13, {}", in(reg) value, options(nomem)),
            14 => asm!("csrw pmpaddr14, {}", in(reg) value, options(nomem)),
            _ => asm!("csrw pmpaddr15, {}", in(reg) value, options(nomem)),
        }
    }
}

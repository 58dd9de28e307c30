use core::arch::naked_asm;
use riscv::register::{mie, mstatus, satp, sstatus};

use crate::riscv::current_hartid;
use crate::sbi::domain;
use crate::sbi::hsm::local_hsm;
use crate::sbi::ipi;
use crate::sbi::trap_stack;
use sbi_spec::hsm::hart_state;

/// Boot funnel for every hart.
///
/// Resets the hart-local stack, waits for a start request if the hart is
/// stopped, and finally drops to the next stage with `mret`. This flow
/// never returns to its caller, so only `mepc`, `a0` and `a1` need to
/// survive the handler.
#[unsafe(naked)]
pub unsafe extern "C" fn boot() -> ! {
    naked_asm!(
        // Reset hart local stack
        "call    {locate_stack}",
        "csrw    mscratch, sp",
        // Allocate space for the boot context
        "addi    sp, sp, -3*8",
        "mv      a0, sp",
        "call    {boot_handler}",
        // Restore mepc
        "ld      t0, 0*8(sp)",
        "csrw    mepc, t0",
        // Restore registers
        "ld      a0, 1*8(sp)",
        "ld      a1, 2*8(sp)",
        // Restore stack pointer
        "addi    sp, sp, 3*8",
        // Switch stacks back
        "csrrw   sp, mscratch, sp",
        // Return from machine mode
        "mret",
        locate_stack = sym trap_stack::locate,
        boot_handler = sym boot_handler,
    );
}

/// Boot handler.
///
/// Loops in the stop-wait state until the hart state machine hands over a
/// next stage, then programs the entry conditions for it.
pub extern "C" fn boot_handler(ctx: &mut BootContext) {
    loop {
        ipi::clear_msip();
        match local_hsm().start() {
            Ok(next_stage) => {
                unsafe {
                    mstatus::set_mpie();
                    mstatus::set_mpp(next_stage.next_mode);
                    mie::set_msoft();
                    mie::set_mtimer();
                    sstatus::clear_sie();
                    satp::write(0);
                }
                // The hart may start into a different domain than it left.
                domain::activate_current_hart();
                ctx.a0 = current_hartid();
                ctx.a1 = next_stage.opaque;
                ctx.mepc = next_stage.start_addr;
                return;
            }
            Err(hart_state::STOPPED) | Err(hart_state::SUSPENDED) => {
                unsafe {
                    mie::set_msoft();
                }
                riscv::asm::wfi();
            }
            Err(_) => core::hint::spin_loop(),
        }
    }
}

/// Boot context structure containing saved register state.
#[derive(Debug)]
#[repr(C)]
pub struct BootContext {
    pub mepc: usize, // 0
    pub a0: usize,
    pub a1: usize, // 2
}

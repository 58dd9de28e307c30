#![no_std]
#![no_main]
#![allow(static_mut_refs)]

extern crate alloc;
#[macro_use]
extern crate log;
#[macro_use]
mod macros;

mod cfg;
mod fail;
mod firmware;
mod platform;
mod riscv;
mod sbi;

use core::arch::{asm, naked_asm};

use crate::platform::PLATFORM;
use crate::riscv::csr::menvcfg;
use crate::riscv::current_hartid;
use crate::sbi::features::{self, PrivilegedVersion};
use crate::sbi::hart_context::NextStage;
use crate::sbi::heap::sbi_heap_init;
use crate::sbi::hsm::local_remote_hsm;
use crate::sbi::{dbtr, domain, ecall, ipi, sse, trap, trap_stack};

pub const R_RISCV_RELATIVE: usize = 3;

#[unsafe(no_mangle)]
extern "C" fn rust_main(_hart_id: usize, opaque: usize, nonstandard_a2: usize) {
    let boot_hart_info = firmware::get_boot_hart(opaque, nonstandard_a2);
    if boot_hart_info.is_boot_hart {
        // Cold boot: bring the global subsystems up in dependency order.
        sbi_heap_init();

        unsafe {
            PLATFORM.init();
            PLATFORM.print_board_info();
        }

        // Every hart context is built here, before any hart can be
        // addressed through HSM or IPI.
        for hart_index in 0..cfg::NUM_HART_MAX {
            trap_stack::hart_context_mut(hart_index).init();
        }

        features::hart_features_detection();
        dbtr::probe_triggers();

        let boot_info = firmware::get_boot_info(nonstandard_a2);
        let (mpp, next_addr) = (boot_info.mpp, boot_info.next_address);

        domain::init(
            firmware::firmware_address_range(),
            next_addr,
            boot_hart_info.fdt_address,
            mpp,
            current_hartid(),
        );
        sse::init();
        ecall::init();

        domain::activate_current_hart();

        info!("{:<30}: {}", "Boot HART ID", current_hartid());
        info!(
            "{:<30}: {:?}",
            "Boot HART Privileged Version",
            features::hart_privileged_version(crate::riscv::current_hartindex())
        );

        unsafe {
            PLATFORM.set_ready();
        }
        domain::startup_secondary_domains();

        // Queue this hart's own entry into the next stage.
        local_remote_hsm().start(NextStage {
            start_addr: next_addr,
            opaque: boot_hart_info.fdt_address,
            next_mode: mpp,
        });

        info!(
            "Redirecting hart {} to 0x{:0>16x} in {:?} mode.",
            current_hartid(),
            next_addr,
            mpp
        );
    } else {
        // Warm boot: wait for the cold boot hart to finish.
        while !unsafe { PLATFORM.ready() } {
            core::hint::spin_loop()
        }
        features::hart_features_detection();
        dbtr::probe_triggers();
        domain::pmp_configure_current_hart();
    }

    // Clear all pending IPIs.
    ipi::clear_all();

    // Configure CSRs and trap handling.
    unsafe {
        // Delegate all interrupts and exceptions to supervisor mode,
        // then pull back the ones this firmware services itself.
        asm!("csrw mideleg,    {}", in(reg) !0);
        asm!("csrw medeleg,    {}", in(reg) !0);
        asm!("csrw mcounteren, {}", in(reg) !0);
        asm!("csrw scounteren, {}", in(reg) !0);
        use ::riscv::register::{medeleg, mtvec};
        medeleg::clear_supervisor_env_call();
        medeleg::clear_illegal_instruction();
        medeleg::clear_load_misaligned();
        medeleg::clear_store_misaligned();
        // Access faults stay here so PMP denials can be redirected with
        // the guest's own trap state.
        medeleg::clear_load_fault();
        medeleg::clear_store_fault();
        // Double traps feed the software event subsystem.
        asm!("csrc medeleg, {}", in(reg) 1usize << 16);
        if features::hart_privileged_version(crate::riscv::current_hartindex())
            >= PrivilegedVersion::Version1_12
        {
            menvcfg::set_bits(menvcfg::CBIE_INVALIDATE | menvcfg::CBCFE | menvcfg::CBZE);
        }
        // Set up trap handling.
        mtvec::write(trap::trap_entry as _, mtvec::TrapMode::Direct);
    }
}

#[unsafe(naked)]
#[unsafe(link_section = ".text.entry")]
#[unsafe(export_name = "_start")]
unsafe extern "C" fn start() -> ! {
    naked_asm!(
        ".option arch, +a",
        // 1. Turn off interrupt.
        "
        csrw    mie, zero",
        // 2. Initialize programming language runtime.
        // only clear bss if hartid wins the race.
        "
        lla      t0, 6f
        li       t1, 1
        amoadd.w t0, t1, 0(t0)
        bnez     t0, 4f
        call     {relocation_update}",
        // 3. Winning hart clears the bss segment.
        "1:
        lla     t0, sbi_bss_start
        lla     t1, sbi_bss_end",
        "2:
        bgeu    t0, t1, 3f
        sd      zero, 0(t0)
        addi    t0, t0, 8
        j       2b",
        // 3.1 Winning hart sets the bss ready signal.
        "3:
        lla     t0, 7f
        li      t1, 1
        amoadd.w t0, t1, 0(t0)
        j       5f",
        // 3.2 Other harts are waiting for bss ready signal.
        "4:
        lla     t0, 7f
        lw      t0, 0(t0)
        beqz    t0, 4b",
        // 4. Prepare stack for each hart and enter the boot funnel.
        "5:
        call    {locate_stack}
        call    {main}
        csrw    mscratch, sp
        j       {hart_boot}
        .balign  4",
        "6:", // bss-clear race signal.
        "  .word    0",
        "7:", // bss ready signal.
        "  .word    0",
        relocation_update = sym relocation_update,
        locate_stack = sym trap_stack::locate,
        main         = sym rust_main,
        hart_boot    = sym trap::boot::boot,
    )
}

// Handle relocations for position-independent code
#[unsafe(naked)]
unsafe extern "C" fn relocation_update() {
    naked_asm!(
        // Get load offset.
        "   li t0, {START_ADDRESS}",
        "   lla t1, sbi_start",
        "   sub t2, t1, t0",

        // Foreach rela.dyn and update relocation.
        "   lla t0, __rel_dyn_start",
        "   lla t1, __rel_dyn_end",
        "   li  t3, {R_RISCV_RELATIVE}",
        "1:",
        "   ld  t4, 8(t0)",
        "   bne t4, t3, 2f",
        "   ld t4, 0(t0)", // Get offset
        "   ld t5, 16(t0)", // Get append
        "   add t4, t4, t2", // Add load offset to offset add append
        "   add t5, t5, t2",
        "   sd t5, 0(t4)", // Update address
        "   addi t0, t0, 24", // Get next rela item
        "2:",
        "   blt t0, t1, 1b",
        "   fence.i",

        // Return
        "   ret",
        R_RISCV_RELATIVE = const R_RISCV_RELATIVE,
        START_ADDRESS = const cfg::SBI_LINK_START_ADDRESS,
    )
}

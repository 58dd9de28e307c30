use riscv::interrupt::machine::{Exception, Interrupt};
use riscv::register::{mcause::Trap, mepc, mtval};

use crate::riscv::current_hartid;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use ::riscv::register::*;
    error!("Hart {} {info}", current_hartid());
    error!("-----------------------------");
    error!("mcause:  {:?}", mcause::read().cause());
    error!("mepc:    {:#018x}", mepc::read());
    error!("mtval:   {:#018x}", mtval::read());
    error!("-----------------------------");
    error!("System halted due to firmware panic");
    loop {
        riscv::asm::wfi();
    }
}

pub fn unsupported_trap(trap: Option<Trap<Interrupt, Exception>>) -> ! {
    error!("-----------------------------");
    error!("trap:    {trap:?}");
    error!("mepc:    {:#018x}", mepc::read());
    error!("mtval:   {:#018x}", mtval::read());
    error!("-----------------------------");
    panic!("Stopped with unsupported trap")
}

/// Fatal initialization error: report if the console is up, then hang.
#[cold]
pub fn stop() -> ! {
    loop {
        core::hint::spin_loop()
    }
}

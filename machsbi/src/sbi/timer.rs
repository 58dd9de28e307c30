use riscv::register::{mie, mip};
use sbi_spec::pmu::firmware_event;

use crate::platform::PLATFORM;
use crate::riscv::csr::stimecmp;
use crate::riscv::{current_hartid, current_hartindex};
use crate::sbi::features::{Extension, hart_extension_probe};
use crate::sbi::pmu::pmu_firmware_counter_increment;
use crate::sbi::trap_stack::{hart_context, hart_context_mut};

/// Per-hart timer broker state.
pub struct TimerState {
    /// Emulated `htimedelta`: offset applied to virtualized time reads.
    pub time_delta: u64,
}

impl TimerState {
    pub const fn new() -> Self {
        Self { time_delta: 0 }
    }
}

/// Reads the 64-bit machine time.
pub fn value() -> u64 {
    match unsafe { PLATFORM.sbi.ipi.as_ref() } {
        Some(ipi) => ipi.get_time(),
        None => {
            let ticks: u64;
            unsafe {
                core::arch::asm!("rdtime {}", out(reg) ticks, options(nomem));
            }
            ticks
        }
    }
}

/// Machine time as seen by a virtualized supervisor.
pub fn virt_value() -> u64 {
    value().wrapping_add(get_delta())
}

/// Reads the current hart's time delta.
pub fn get_delta() -> u64 {
    hart_context(current_hartindex()).timer.time_delta
}

/// Sets the current hart's time delta.
pub fn set_delta(delta: u64) {
    hart_context_mut(current_hartindex()).timer.time_delta = delta;
}

/// SBI `set_timer`: program the next supervisor timer event.
///
/// Clears any pending supervisor timer interrupt and re-enables the
/// machine timer so the event can be delivered.
pub fn set_timer(stime_value: u64) {
    pmu_firmware_counter_increment(firmware_event::SET_TIMER);
    if hart_extension_probe(current_hartindex(), Extension::Sstc) {
        stimecmp::set(stime_value);
    } else {
        match unsafe { PLATFORM.sbi.ipi.as_ref() } {
            Some(ipi) => ipi.write_mtimecmp(current_hartid(), stime_value),
            None => return,
        }
        unsafe {
            mip::clear_stimer();
        }
    }
    unsafe {
        mie::set_mtimer();
    }
}

/// Stops the pending timer event of the current hart.
#[allow(unused)]
pub fn event_stop() {
    if let Some(ipi) = unsafe { PLATFORM.sbi.ipi.as_ref() } {
        ipi.write_mtimecmp(current_hartid(), u64::MAX);
    }
}

/// Machine timer interrupt: mask it and surface a supervisor timer
/// interrupt instead.
pub fn process() {
    unsafe {
        mie::clear_mtimer();
        mip::set_stimer();
    }
}

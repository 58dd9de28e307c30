use riscv::register::mip;

use crate::sbi::ipi;
use crate::sbi::rfence;
use crate::sbi::sse;
use crate::sbi::trap::TrapFrame;

/// Machine software interrupt: acknowledge the hardware IPI, then drain
/// every event bit published to this hart.
///
/// The event word is swapped to zero on each pass; a producer that sets a
/// bit after the swap also re-raises MSIP, so nothing is lost.
pub(crate) fn msoft_handler(frame: &mut TrapFrame) {
    ipi::clear_msip();
    loop {
        let ipi_type = ipi::get_and_reset_ipi_type();
        if ipi_type == 0 {
            break;
        }
        if ipi_type & ipi::IPI_TYPE_SSOFT != 0 {
            unsafe {
                mip::set_ssoft();
            }
        }
        if ipi_type & ipi::IPI_TYPE_FENCE != 0 {
            rfence::rfence_handler();
        }
        if ipi_type & ipi::IPI_TYPE_SSE != 0 {
            sse::process_pending_events(frame);
        }
        if ipi_type & ipi::IPI_TYPE_HALT != 0 {
            halt();
        }
    }
}

/// Parks the hart forever; the reset path broadcasts this to every other
/// hart before touching the reset device.
pub fn halt() -> ! {
    unsafe {
        core::arch::asm!("csrw mie, zero", options(nomem));
    }
    loop {
        riscv::asm::wfi();
    }
}

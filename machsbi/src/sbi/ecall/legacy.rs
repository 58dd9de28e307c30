use core::ops::RangeInclusive;
use sbi_spec::legacy;

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::console;
use crate::sbi::early_trap::unpriv_read;
use crate::sbi::ipi;
use crate::sbi::reset;
use crate::sbi::rfence;
use crate::sbi::timer;
use crate::sbi::trap::{TrapFrame, advance_pc, redirect};

/// The v0.1 calls: one extension id per function, a single return value
/// in `a0`, and hart masks passed as pointers into supervisor memory.
pub struct Legacy;

impl SbiExtension for Legacy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        legacy::LEGACY_SET_TIMER..=legacy::LEGACY_SHUTDOWN
    }

    /// Probing a legacy id reports whether the one function behind it
    /// can work at all.
    fn probe(&self, extid: usize) -> usize {
        match extid {
            legacy::LEGACY_CONSOLE_PUTCHAR | legacy::LEGACY_CONSOLE_GETCHAR => {
                unsafe { PLATFORM.sbi.console.is_some() } as usize
            }
            _ => 1,
        }
    }

    fn handle(&self, extid: usize, _funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        let (a0, a1, a2, a3) = (frame.a0, frame.a1, frame.a2, frame.a3);
        // Legacy calls fill `a0` themselves and preserve `a1`.
        let ret = match extid {
            legacy::LEGACY_SET_TIMER => {
                timer::set_timer(a0 as u64);
                0
            }
            legacy::LEGACY_CONSOLE_PUTCHAR => console::putchar(a0),
            legacy::LEGACY_CONSOLE_GETCHAR => console::getchar(),
            legacy::LEGACY_CLEAR_IPI => {
                ipi::clear_smode();
                0
            }
            legacy::LEGACY_SEND_IPI => match read_hart_mask(frame, a0) {
                Some(mask) => unsafe { PLATFORM.sbi.ipi.as_ref() }
                    .map(|ipi| ipi.send_ipi(mask, 0).error)
                    .unwrap_or(usize::MAX),
                None => return EcallResult::skip(),
            },
            legacy::LEGACY_REMOTE_FENCE_I => match read_hart_mask(frame, a0) {
                Some(mask) => rfence::remote_fence_i(mask, 0).error,
                None => return EcallResult::skip(),
            },
            legacy::LEGACY_REMOTE_SFENCE_VMA => match read_hart_mask(frame, a0) {
                Some(mask) => rfence::remote_sfence_vma(mask, 0, a1, a2).error,
                None => return EcallResult::skip(),
            },
            legacy::LEGACY_REMOTE_SFENCE_VMA_ASID => match read_hart_mask(frame, a0) {
                Some(mask) => rfence::remote_sfence_vma_asid(mask, 0, a1, a2, a3).error,
                None => return EcallResult::skip(),
            },
            legacy::LEGACY_SHUTDOWN => reset::legacy_shutdown(),
            _ => usize::MAX,
        };
        frame.a0 = ret;
        advance_pc(frame, 4);
        EcallResult::skip()
    }
}

/// Legacy masks are `unsigned long *` in supervisor memory; a null
/// pointer means every hart. A faulting read redirects to the
/// supervisor and consumes the call.
fn read_hart_mask(frame: &mut TrapFrame, mask_ptr: usize) -> Option<usize> {
    if mask_ptr == 0 {
        return Some(usize::MAX);
    }
    match unpriv_read(mask_ptr, core::mem::size_of::<usize>()) {
        Ok(mask) => Some(mask),
        Err(trap_info) => {
            redirect(frame, trap_info.mcause, trap_info.mtval);
            None
        }
    }
}

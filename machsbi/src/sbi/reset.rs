use alloc::boxed::Box;
use sbi_spec::binary::SbiRet;
use spin::Mutex;

use crate::platform::PLATFORM;
use crate::sbi::domain;

/// Reset backend interface.
pub trait ResetDevice {
    fn fail(&self, code: u16) -> !;
    fn pass(&self) -> !;
    fn reset(&self) -> !;
}

/// The registered system reset device.
pub struct SbiReset {
    pub reset_dev: Mutex<Box<dyn ResetDevice>>,
}

impl SbiReset {
    pub fn new(reset_dev: Mutex<Box<dyn ResetDevice>>) -> Self {
        Self { reset_dev }
    }

    /// SBI SRST `system_reset`.
    ///
    /// Parks every other hart with a halt IPI before the device takes
    /// the machine down; does not return for valid requests.
    pub fn system_reset(&self, reset_type: u32, reset_reason: u32) -> SbiRet {
        use sbi_spec::srst::{
            RESET_REASON_NO_REASON, RESET_REASON_SYSTEM_FAILURE, RESET_TYPE_COLD_REBOOT,
            RESET_TYPE_SHUTDOWN, RESET_TYPE_WARM_REBOOT,
        };

        // Only the type is validated; the reason is informational and
        // passed through, including implementation- and vendor-specific
        // values.
        if !matches!(
            reset_type,
            RESET_TYPE_SHUTDOWN | RESET_TYPE_COLD_REBOOT | RESET_TYPE_WARM_REBOOT
        ) {
            return SbiRet::invalid_param();
        }
        // A domain without reset rights cannot take the machine down.
        if !domain::current_domain().system_reset_allowed {
            return SbiRet::denied();
        }

        if let Some(ipi) = unsafe { PLATFORM.sbi.ipi.as_ref() } {
            ipi.send_halt_to_others();
        }

        match reset_type {
            RESET_TYPE_SHUTDOWN => match reset_reason {
                RESET_REASON_NO_REASON => self.reset_dev.lock().pass(),
                RESET_REASON_SYSTEM_FAILURE => self.reset_dev.lock().fail(u16::MAX),
                value => self.reset_dev.lock().fail(value as _),
            },
            _ => self.reset_dev.lock().reset(),
        }
    }
}

/// Fatal exit used by firmware-internal failure paths.
#[allow(unused)]
pub fn fail() -> ! {
    match unsafe { PLATFORM.sbi.reset.as_ref() } {
        Some(reset) => reset.reset_dev.lock().fail(u16::MAX),
        None => {
            trace!("no reset device, begin dead loop");
            loop {
                core::hint::spin_loop()
            }
        }
    }
}

/// Legacy `shutdown`.
pub fn legacy_shutdown() -> ! {
    if let Some(reset) = unsafe { PLATFORM.sbi.reset.as_ref() } {
        reset.system_reset(
            sbi_spec::srst::RESET_TYPE_SHUTDOWN,
            sbi_spec::srst::RESET_REASON_NO_REASON,
        );
    }
    loop {
        riscv::asm::wfi();
    }
}

use alloc::boxed::Box;
use sbi_spec::binary::SbiRet;
use sbi_spec::hsm::{hart_state::STOPPED, suspend_type::NON_RETENTIVE};
use spin::Mutex;

use crate::cfg::NUM_HART_MAX;
use crate::riscv::csr::mstatus::{PRV_S, PRV_U};
use crate::riscv::{current_hartid, hartindex_to_hartid};
use crate::sbi::hsm::{self, remote_hsm};
use crate::sbi::trap::TrapFrame;

/// The only sleep type the reference platform understands.
const SUSPEND_TO_RAM: u32 = 0x0;

/// Platform sleep backend. When present it is consulted for the sleep
/// type and performs the actual power transition; without one, suspend
/// degrades to a non-retentive hart suspend.
pub trait SuspendDevice {
    /// Whether the device can service this sleep type.
    fn check(&self, sleep_type: u32) -> bool;
    /// Enters the sleep state; resumes at `warmboot_addr` on wakeup.
    fn suspend(&self, sleep_type: u32, warmboot_addr: usize) -> Result<(), ()>;
}

/// SBI SUSP system suspend.
pub struct SbiSuspend {
    pub suspend_dev: Option<Mutex<Box<dyn SuspendDevice>>>,
}

impl SbiSuspend {
    pub fn new(suspend_dev: Option<Mutex<Box<dyn SuspendDevice>>>) -> Self {
        Self { suspend_dev }
    }

    /// SBI SUSP `system_suspend`.
    pub fn system_suspend(
        &self,
        frame: &TrapFrame,
        sleep_type: u32,
        resume_addr: usize,
        opaque: usize,
    ) -> SbiRet {
        match &self.suspend_dev {
            Some(dev) => {
                if !dev.lock().check(sleep_type) {
                    return SbiRet::invalid_param();
                }
            }
            None => {
                if sleep_type != SUSPEND_TO_RAM {
                    return SbiRet::invalid_param();
                }
            }
        }

        if !matches!(frame.prev_mode(), PRV_S | PRV_U) {
            return SbiRet::failed();
        }

        // Suspending the system needs every other hart parked first.
        for hart_index in 0..NUM_HART_MAX {
            let hartid = hartindex_to_hartid(hart_index);
            if hartid == current_hartid() {
                continue;
            }
            if let Some(remote) = remote_hsm(hartid) {
                if remote.get_status() != STOPPED {
                    return SbiRet::denied();
                }
            }
        }

        if !crate::sbi::domain::current_domain_check_range(
            resume_addr,
            4,
            memprot::Mode::Supervisor,
            memprot::Access::Execute,
        ) {
            return SbiRet::invalid_address();
        }

        if let Some(dev) = &self.suspend_dev {
            // The device resumes the hart through the warm boot path,
            // which hands control to `resume_addr` via the HSM cell.
            if dev
                .lock()
                .suspend(sleep_type, crate::sbi::trap::boot::boot as usize)
                .is_err()
            {
                return SbiRet::failed();
            }
        }

        // Retention is not guaranteed: flush this hart's context and
        // come back up at the caller-provided address.
        hsm::hart_suspend(NON_RETENTIVE, resume_addr, opaque)
    }
}

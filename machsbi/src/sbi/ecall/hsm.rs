use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::hsm::{EID_HSM, HART_GET_STATUS, HART_START, HART_STOP, HART_SUSPEND};

use super::{EcallResult, SbiExtension};
use crate::sbi::hsm;
use crate::sbi::trap::TrapFrame;

pub struct Hsm;

impl SbiExtension for Hsm {
    fn name(&self) -> &'static str {
        "hsm"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_HSM..=EID_HSM
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            HART_START => hsm::hart_start(frame.a0, frame.a1, frame.a2).into(),
            // Stop and non-retentive suspend re-enter through the boot
            // funnel and never return here.
            HART_STOP => hsm::hart_stop(),
            HART_GET_STATUS => hsm::hart_get_status(frame.a0).into(),
            HART_SUSPEND => hsm::hart_suspend(frame.a0 as u32, frame.a1, frame.a2).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

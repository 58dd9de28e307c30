use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::srst::{EID_SRST, SYSTEM_RESET};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::trap::TrapFrame;

pub struct Srst;

impl SbiExtension for Srst {
    fn name(&self) -> &'static str {
        "srst"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_SRST..=EID_SRST
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.reset.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            SYSTEM_RESET => unsafe { PLATFORM.sbi.reset.as_ref() }
                .unwrap()
                .system_reset(frame.a0 as u32, frame.a1 as u32)
                .into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

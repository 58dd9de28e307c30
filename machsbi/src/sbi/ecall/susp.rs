use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::susp::{EID_SUSP, SUSPEND};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::trap::TrapFrame;

pub struct Susp;

impl SbiExtension for Susp {
    fn name(&self) -> &'static str {
        "susp"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_SUSP..=EID_SUSP
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.susp.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            SUSPEND => unsafe { PLATFORM.sbi.susp.as_ref() }
                .unwrap()
                .system_suspend(frame, frame.a0 as u32, frame.a1, frame.a2)
                .into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

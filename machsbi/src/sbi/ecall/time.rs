use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::time::{EID_TIME, SET_TIMER};

use super::{EcallResult, SbiExtension};
use crate::sbi::timer;
use crate::sbi::trap::TrapFrame;

pub struct Time;

impl SbiExtension for Time {
    fn name(&self) -> &'static str {
        "time"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_TIME..=EID_TIME
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            SET_TIMER => {
                timer::set_timer(frame.a0 as u64);
                SbiRet::success(0).into()
            }
            _ => SbiRet::not_supported().into(),
        }
    }
}

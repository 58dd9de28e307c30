use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::fwft::{EID_FWFT, GET, SET};

use super::{EcallResult, SbiExtension};
use crate::sbi::fwft;
use crate::sbi::trap::TrapFrame;

pub struct Fwft;

impl SbiExtension for Fwft {
    fn name(&self) -> &'static str {
        "fwft"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_FWFT..=EID_FWFT
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            SET => fwft::set(frame.a0, frame.a1, frame.a2).into(),
            GET => fwft::get(frame.a0).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

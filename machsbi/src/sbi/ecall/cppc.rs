use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::cppc::{EID_CPPC, PROBE, READ, READ_HI, WRITE};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::trap::TrapFrame;

pub struct Cppc;

impl SbiExtension for Cppc {
    fn name(&self) -> &'static str {
        "cppc"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_CPPC..=EID_CPPC
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.cppc.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        let cppc = unsafe { PLATFORM.sbi.cppc.as_ref() }.unwrap();
        match funcid {
            PROBE => cppc.probe(frame.a0).into(),
            READ => cppc.read(frame.a0).into(),
            READ_HI => cppc.read_hi(frame.a0).into(),
            WRITE => cppc.write(frame.a0, frame.a1 as u64).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::dbcn::{CONSOLE_READ, CONSOLE_WRITE, CONSOLE_WRITE_BYTE, EID_DBCN};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::console;
use crate::sbi::trap::TrapFrame;

pub struct Dbcn;

impl SbiExtension for Dbcn {
    fn name(&self) -> &'static str {
        "dbcn"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_DBCN..=EID_DBCN
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.console.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            CONSOLE_WRITE => console::console_write(frame, frame.a0, frame.a1, frame.a2).into(),
            CONSOLE_READ => console::console_read(frame, frame.a0, frame.a1, frame.a2).into(),
            CONSOLE_WRITE_BYTE => console::console_write_byte(frame.a0).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

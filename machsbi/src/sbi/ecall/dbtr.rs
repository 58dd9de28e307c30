use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::dbtr::{
    self, EID_DBTR,
};

use super::{EcallResult, SbiExtension};
use crate::sbi::dbtr as dbtr_core;
use crate::sbi::trap::TrapFrame;

pub struct Dbtr;

impl SbiExtension for Dbtr {
    fn name(&self) -> &'static str {
        "dbtr"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_DBTR..=EID_DBTR
    }

    fn available(&self) -> bool {
        dbtr_core::total_triggers() > 0
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            dbtr::NUM_TRIGGERS => dbtr_core::num_trig(frame.a0).into(),
            dbtr::SET_SHMEM => dbtr_core::setup_shmem(frame, frame.a0, frame.a1).into(),
            dbtr::READ_TRIGGERS => dbtr_core::read_trig(frame.a0, frame.a1).into(),
            dbtr::INSTALL_TRIGGERS => dbtr_core::install_trig(frame.a0).into(),
            dbtr::UPDATE_TRIGGERS => dbtr_core::update_trig(frame.a0).into(),
            dbtr::UNINSTALL_TRIGGERS => dbtr_core::uninstall_trig(frame.a0, frame.a1).into(),
            dbtr::ENABLE_TRIGGERS => dbtr_core::enable_trig(frame.a0, frame.a1).into(),
            dbtr::DISABLE_TRIGGERS => dbtr_core::disable_trig(frame.a0, frame.a1).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

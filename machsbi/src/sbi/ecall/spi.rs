use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::spi::{EID_SPI, SEND_IPI};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::trap::TrapFrame;

pub struct Spi;

impl SbiExtension for Spi {
    fn name(&self) -> &'static str {
        "spi"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_SPI..=EID_SPI
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.ipi.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            SEND_IPI => unsafe { PLATFORM.sbi.ipi.as_ref() }
                .unwrap()
                .send_ipi(frame.a0, frame.a1)
                .into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

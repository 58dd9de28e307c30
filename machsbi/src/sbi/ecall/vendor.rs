use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;

use super::{EcallResult, SbiExtension};
use crate::platform;
use crate::sbi::trap::TrapFrame;

/// Vendor-specific extension id window.
pub const EID_VENDOR_START: usize = 0x0900_0000;
pub const EID_VENDOR_END: usize = 0x090F_FFFF;

/// Vendor extension window, forwarded to the platform's provider.
pub struct Vendor;

impl SbiExtension for Vendor {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_VENDOR_START..=EID_VENDOR_END
    }

    fn available(&self) -> bool {
        platform::vendor_ext_available()
    }

    fn handle(&self, extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match platform::vendor_ext_provider(extid, funcid, frame) {
            Some(result) => result,
            None => SbiRet::not_supported().into(),
        }
    }
}

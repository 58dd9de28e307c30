use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::rfnc::{self, EID_RFNC};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::rfence::{self, RFenceType};
use crate::sbi::trap::TrapFrame;

pub struct Rfnc;

impl SbiExtension for Rfnc {
    fn name(&self) -> &'static str {
        "rfnc"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_RFNC..=EID_RFNC
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.ipi.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        let (hmask, hbase) = (frame.a0, frame.a1);
        match funcid {
            rfnc::REMOTE_FENCE_I => rfence::remote_fence_i(hmask, hbase).into(),
            rfnc::REMOTE_SFENCE_VMA => {
                rfence::remote_sfence_vma(hmask, hbase, frame.a2, frame.a3).into()
            }
            rfnc::REMOTE_SFENCE_VMA_ASID => {
                rfence::remote_sfence_vma_asid(hmask, hbase, frame.a2, frame.a3, frame.a4).into()
            }
            rfnc::REMOTE_HFENCE_GVMA_VMID => rfence::remote_hfence(
                RFenceType::HFenceGvmaVmid,
                hmask,
                hbase,
                frame.a2,
                frame.a3,
                frame.a4,
            )
            .into(),
            rfnc::REMOTE_HFENCE_GVMA => rfence::remote_hfence(
                RFenceType::HFenceGvma,
                hmask,
                hbase,
                frame.a2,
                frame.a3,
                0,
            )
            .into(),
            rfnc::REMOTE_HFENCE_VVMA_ASID => rfence::remote_hfence(
                RFenceType::HFenceVvmaAsid,
                hmask,
                hbase,
                frame.a2,
                frame.a3,
                frame.a4,
            )
            .into(),
            rfnc::REMOTE_HFENCE_VVMA => rfence::remote_hfence(
                RFenceType::HFenceVvma,
                hmask,
                hbase,
                frame.a2,
                frame.a3,
                0,
            )
            .into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::pmu::{self, EID_PMU};

use super::{EcallResult, SbiExtension};
use crate::platform::PLATFORM;
use crate::sbi::trap::TrapFrame;

pub struct Pmu;

impl SbiExtension for Pmu {
    fn name(&self) -> &'static str {
        "pmu"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_PMU..=EID_PMU
    }

    fn available(&self) -> bool {
        unsafe { PLATFORM.sbi.pmu.is_some() }
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        let sbi_pmu = unsafe { PLATFORM.sbi.pmu.as_ref() }.unwrap();
        match funcid {
            pmu::NUM_COUNTERS => SbiRet::success(sbi_pmu.num_counters()).into(),
            pmu::COUNTER_GET_INFO => sbi_pmu.counter_get_info(frame.a0).into(),
            pmu::COUNTER_CONFIG_MATCHING => sbi_pmu
                .counter_config_matching(frame.a0, frame.a1, frame.a2, frame.a3, frame.a4 as u64)
                .into(),
            pmu::COUNTER_START => sbi_pmu
                .counter_start(frame.a0, frame.a1, frame.a2, frame.a3 as u64)
                .into(),
            pmu::COUNTER_STOP => sbi_pmu.counter_stop(frame.a0, frame.a1, frame.a2).into(),
            pmu::COUNTER_FW_READ => sbi_pmu.counter_fw_read(frame.a0).into(),
            pmu::COUNTER_FW_READ_HI => sbi_pmu.counter_fw_read_hi(frame.a0).into(),
            // Snapshot memory needs Sscofpmf, which this platform lacks.
            pmu::SNAPSHOT_SET_SHMEM => SbiRet::not_supported().into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

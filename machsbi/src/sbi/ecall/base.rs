use core::ops::RangeInclusive;
use riscv::register::{marchid, mimpid, mvendorid};
use sbi_spec::base::{self, impl_id};
use sbi_spec::binary::SbiRet;

use super::{EcallResult, SbiExtension, probe_extension};
use crate::sbi::trap::TrapFrame;

/// SBI specification version implemented here: 2.0.
const SPEC_VERSION: usize = 2 << 24;
/// Implementation version, `major.minor.patch` packed like the crate
/// version.
const IMPL_VERSION: usize = 1 << 8;

pub struct Base;

impl SbiExtension for Base {
    fn name(&self) -> &'static str {
        "base"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        base::EID_BASE..=base::EID_BASE
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        let value = match funcid {
            base::GET_SBI_SPEC_VERSION => SPEC_VERSION,
            base::GET_SBI_IMPL_ID => impl_id::OPEN_SBI,
            base::GET_SBI_IMPL_VERSION => IMPL_VERSION,
            base::PROBE_EXTENSION => probe_extension(frame.a0),
            base::GET_MVENDORID => mvendorid::read().map(|r| r.bits()).unwrap_or(0),
            base::GET_MARCHID => marchid::read().map(|r| r.bits()).unwrap_or(0),
            base::GET_MIMPID => mimpid::read().map(|r| r.bits()).unwrap_or(0),
            _ => return SbiRet::not_supported().into(),
        };
        SbiRet::success(value).into()
    }
}

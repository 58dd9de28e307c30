use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::sse::{
    COMPLETE, DISABLE, EID_SSE, ENABLE, HART_MASK, HART_UNMASK, INJECT, READ_ATTRS, REGISTER,
    UNREGISTER, WRITE_ATTRS,
};

use super::{EcallResult, SbiExtension};
use crate::sbi::sse;
use crate::sbi::trap::TrapFrame;

pub struct Sse;

impl SbiExtension for Sse {
    fn name(&self) -> &'static str {
        "sse"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_SSE..=EID_SSE
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            READ_ATTRS => {
                sse::read_attrs(frame, frame.a0, frame.a1, frame.a2, frame.a3, frame.a4).into()
            }
            WRITE_ATTRS => {
                sse::write_attrs(frame, frame.a0, frame.a1, frame.a2, frame.a3, frame.a4).into()
            }
            REGISTER => sse::register(frame.a0, frame.a1, frame.a2).into(),
            UNREGISTER => sse::unregister(frame.a0).into(),
            ENABLE => sse::enable(frame.a0).into(),
            DISABLE => sse::disable(frame.a0).into(),
            COMPLETE => {
                // Completion rewrites the frame to resume the
                // interrupted context; nothing else may touch it.
                let ret = sse::complete(frame);
                if ret.is_ok() {
                    EcallResult::skip()
                } else {
                    ret.into()
                }
            }
            INJECT => {
                let (event, hartid) = (frame.a0, frame.a1);
                let a6 = frame.a6;
                let a7 = frame.a7;
                // A self-targeting injection replaces the frame with the
                // handler entry; report success through the interrupted
                // state instead of the live registers.
                let pre_mepc = frame.mepc;
                frame.a0 = 0;
                frame.a1 = 0;
                frame.mepc = frame.mepc.wrapping_add(4);
                let ret = sse::inject(frame, event, hartid);
                if ret.is_ok() {
                    EcallResult::skip()
                } else {
                    frame.a6 = a6;
                    frame.a7 = a7;
                    frame.mepc = pre_mepc;
                    ret.into()
                }
            }
            HART_MASK => sse::hart_mask().into(),
            HART_UNMASK => {
                let pre_mepc = frame.mepc;
                frame.a0 = 0;
                frame.a1 = 0;
                frame.mepc = frame.mepc.wrapping_add(4);
                let ret = sse::hart_unmask(frame);
                if ret.is_ok() {
                    EcallResult::skip()
                } else {
                    frame.mepc = pre_mepc;
                    ret.into()
                }
            }
            _ => SbiRet::not_supported().into(),
        }
    }
}

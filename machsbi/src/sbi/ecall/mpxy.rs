use core::ops::RangeInclusive;
use sbi_spec::binary::SbiRet;
use sbi_spec::mpxy::{
    EID_MPXY, GET_CHANNEL_IDS, GET_NOTIFICATION_EVENTS, GET_SHMEM_SIZE, READ_ATTRIBUTE, SET_SHMEM,
    SEND_MESSAGE_WITHOUT_RESPONSE, SEND_MESSAGE_WITH_RESPONSE, WRITE_ATTRIBUTE,
};

use super::{EcallResult, SbiExtension};
use crate::sbi::mpxy;
use crate::sbi::trap::TrapFrame;

pub struct Mpxy;

impl SbiExtension for Mpxy {
    fn name(&self) -> &'static str {
        "mpxy"
    }

    fn extid_range(&self) -> RangeInclusive<usize> {
        EID_MPXY..=EID_MPXY
    }

    fn available(&self) -> bool {
        mpxy::channel_available()
    }

    fn handle(&self, _extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult {
        match funcid {
            GET_SHMEM_SIZE => mpxy::get_shmem_size().into(),
            SET_SHMEM => mpxy::set_shmem(frame, frame.a0, frame.a1, frame.a2).into(),
            GET_CHANNEL_IDS => mpxy::get_channel_ids(frame.a0).into(),
            READ_ATTRIBUTE => mpxy::read_attrs(frame.a0, frame.a1, frame.a2).into(),
            WRITE_ATTRIBUTE => mpxy::write_attrs(frame.a0, frame.a1, frame.a2).into(),
            SEND_MESSAGE_WITH_RESPONSE => {
                mpxy::send_message(frame.a0, frame.a1, frame.a2, true).into()
            }
            SEND_MESSAGE_WITHOUT_RESPONSE => {
                mpxy::send_message(frame.a0, frame.a1, frame.a2, false).into()
            }
            GET_NOTIFICATION_EVENTS => mpxy::get_notification_events(frame.a0).into(),
            _ => SbiRet::not_supported().into(),
        }
    }
}

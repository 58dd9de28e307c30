use alloc::vec::Vec;
use memprot::{Access, Mode};
use sbi_spec::binary::SbiRet;
use spin::Once;

use crate::cfg::PAGE_SIZE;
use crate::riscv::current_hartindex;
use crate::sbi::domain;
use crate::sbi::trap::TrapFrame;
use crate::sbi::trap_stack::hart_context_mut;

/// Size of the per-hart message proxy shared memory window.
pub const MPXY_SHMEM_SIZE: usize = PAGE_SIZE;

/// Standard channel attribute ids.
pub mod attr {
    pub const MSG_PROT_ID: usize = 0x0;
    pub const MSG_PROT_VER: usize = 0x1;
    pub const MSG_MAX_LEN: usize = 0x2;
    pub const MSG_SEND_TIMEOUT: usize = 0x3;
    pub const MSG_COMPLETION_TIMEOUT: usize = 0x4;
    pub const CHANNEL_CAPABILITY: usize = 0x5;
    pub const SSE_EVENT_ID: usize = 0x6;
    pub const MSI_CONTROL: usize = 0x7;
    pub const MSI_ADDR_LO: usize = 0x8;
    pub const MSI_ADDR_HI: usize = 0x9;
    pub const MSI_DATA: usize = 0xA;
    pub const EVENTS_STATE_CONTROL: usize = 0xB;
    pub const STD_ATTR_MAX: usize = 0xC;
    /// Message-protocol specific attribute space.
    pub const MSGPROTO_START: usize = 0x8000_0000;
}

/// Channel capability bits.
pub mod capability {
    pub const MSI: usize = 1 << 0;
    pub const SSE: usize = 1 << 1;
    pub const EVENTS_STATE: usize = 1 << 2;
    pub const SEND_WITH_RESPONSE: usize = 1 << 3;
    pub const SEND_WITHOUT_RESPONSE: usize = 1 << 4;
    pub const GET_NOTIFICATIONS: usize = 1 << 5;
}

/// A message proxy transport channel.
///
/// Registered by platform collaborators (RPMI mailboxes and the like);
/// this firmware core only relays messages between the supervisor's
/// shared memory and the channel.
pub trait MpxyChannel: Sync {
    fn channel_id(&self) -> u32;
    fn msg_proto_id(&self) -> u32;
    fn msg_proto_version(&self) -> u32;
    fn msg_max_len(&self) -> usize;

    fn capabilities(&self) -> usize {
        capability::SEND_WITH_RESPONSE | capability::SEND_WITHOUT_RESPONSE
    }

    /// Relays one message; `resp` is `None` for posted sends. Returns
    /// the response length.
    fn send_message(
        &self,
        msg_id: u32,
        msg: &[u8],
        resp: Option<&mut [u8]>,
    ) -> Result<usize, sbi_spec::binary::Error>;

    /// Message-protocol specific attribute read.
    fn read_attribute(&self, _attr_id: usize) -> Result<usize, sbi_spec::binary::Error> {
        Err(sbi_spec::binary::Error::NotSupported)
    }

    /// Message-protocol specific attribute write.
    fn write_attribute(
        &self,
        _attr_id: usize,
        _value: usize,
    ) -> Result<(), sbi_spec::binary::Error> {
        Err(sbi_spec::binary::Error::NotSupported)
    }

    /// Drains pending notification events into `out`.
    fn get_notification_events(
        &self,
        _out: &mut [u8],
    ) -> Result<usize, sbi_spec::binary::Error> {
        Err(sbi_spec::binary::Error::NotSupported)
    }
}

static CHANNELS: Once<Vec<&'static dyn MpxyChannel>> = Once::new();

/// Registers the platform's channels. Cold boot only.
pub fn init(channels: Vec<&'static dyn MpxyChannel>) {
    CHANNELS.call_once(|| channels);
}

/// True when at least one channel is registered; gates the extension.
pub fn channel_available() -> bool {
    CHANNELS.get().map(|c| !c.is_empty()).unwrap_or(false)
}

fn find_channel(channel_id: usize) -> Option<&'static dyn MpxyChannel> {
    CHANNELS
        .get()?
        .iter()
        .copied()
        .find(|c| c.channel_id() as usize == channel_id)
}

/// Per-hart shared memory window state.
pub struct MpxyShmem {
    base: Option<usize>,
}

impl MpxyShmem {
    pub const fn new() -> Self {
        Self { base: None }
    }
}

fn shmem_base() -> Option<usize> {
    hart_context_mut(current_hartindex()).mpxy.base
}

/// SBI MPXY `get_shmem_size`.
pub fn get_shmem_size() -> SbiRet {
    SbiRet::success(MPXY_SHMEM_SIZE)
}

/// SBI MPXY `set_shmem`.
pub fn set_shmem(frame: &TrapFrame, shmem_lo: usize, shmem_hi: usize, flags: usize) -> SbiRet {
    if flags != 0 {
        return SbiRet::invalid_param();
    }
    let state = &mut hart_context_mut(current_hartindex()).mpxy;
    if shmem_lo == usize::MAX && shmem_hi == usize::MAX {
        state.base = None;
        return SbiRet::success(0);
    }
    if shmem_hi != 0 || shmem_lo & (MPXY_SHMEM_SIZE - 1) != 0 {
        return SbiRet::invalid_address();
    }
    let mode = if frame.prev_mode() == crate::riscv::csr::mstatus::PRV_U {
        Mode::User
    } else {
        Mode::Supervisor
    };
    if !domain::current_domain_check_range(shmem_lo, MPXY_SHMEM_SIZE, mode, Access::Read)
        || !domain::current_domain_check_range(shmem_lo, MPXY_SHMEM_SIZE, mode, Access::Write)
    {
        return SbiRet::invalid_address();
    }
    state.base = Some(shmem_lo);
    SbiRet::success(0)
}

/// SBI MPXY `get_channel_ids`: fills the shared memory with the 32-bit
/// channel id list, starting at `start_index`.
pub fn get_channel_ids(start_index: usize) -> SbiRet {
    let Some(base) = shmem_base() else {
        return SbiRet::no_shmem();
    };
    let Some(channels) = CHANNELS.get() else {
        return SbiRet::not_supported();
    };
    if start_index > channels.len() {
        return SbiRet::invalid_param();
    }

    let slots = MPXY_SHMEM_SIZE / 4 - 2;
    let remaining = channels.len() - start_index;
    let returned = remaining.min(slots);
    unsafe {
        let words = base as *mut u32;
        words.write(remaining as u32);
        words.add(1).write(returned as u32);
        for (i, channel) in channels[start_index..start_index + returned].iter().enumerate() {
            words.add(2 + i).write(channel.channel_id());
        }
    }
    SbiRet::success(0)
}

fn standard_attribute(channel: &dyn MpxyChannel, attr_id: usize) -> Option<usize> {
    match attr_id {
        attr::MSG_PROT_ID => Some(channel.msg_proto_id() as usize),
        attr::MSG_PROT_VER => Some(channel.msg_proto_version() as usize),
        attr::MSG_MAX_LEN => Some(channel.msg_max_len()),
        attr::MSG_SEND_TIMEOUT | attr::MSG_COMPLETION_TIMEOUT => Some(0),
        attr::CHANNEL_CAPABILITY => Some(channel.capabilities()),
        attr::SSE_EVENT_ID | attr::MSI_CONTROL | attr::MSI_ADDR_LO | attr::MSI_ADDR_HI
        | attr::MSI_DATA | attr::EVENTS_STATE_CONTROL => Some(0),
        _ => None,
    }
}

/// SBI MPXY `read_attributes`.
pub fn read_attrs(channel_id: usize, base_attr_id: usize, attr_count: usize) -> SbiRet {
    let Some(base) = shmem_base() else {
        return SbiRet::no_shmem();
    };
    let Some(channel) = find_channel(channel_id) else {
        return SbiRet::not_supported();
    };
    if attr_count == 0 || attr_count * 4 > MPXY_SHMEM_SIZE {
        return SbiRet::invalid_param();
    }

    for i in 0..attr_count {
        let attr_id = base_attr_id + i;
        let value = if attr_id >= attr::MSGPROTO_START {
            match channel.read_attribute(attr_id) {
                Ok(v) => v,
                Err(e) => return e.into(),
            }
        } else {
            match standard_attribute(channel, attr_id) {
                Some(v) => v,
                None => return SbiRet::bad_range(),
            }
        };
        unsafe {
            (base as *mut u32).add(i).write(value as u32);
        }
    }
    SbiRet::success(0)
}

/// SBI MPXY `write_attributes`: standard attributes are read-only here,
/// message-protocol attributes are forwarded to the channel.
pub fn write_attrs(channel_id: usize, base_attr_id: usize, attr_count: usize) -> SbiRet {
    let Some(base) = shmem_base() else {
        return SbiRet::no_shmem();
    };
    let Some(channel) = find_channel(channel_id) else {
        return SbiRet::not_supported();
    };
    if attr_count == 0 || attr_count * 4 > MPXY_SHMEM_SIZE {
        return SbiRet::invalid_param();
    }

    for i in 0..attr_count {
        let attr_id = base_attr_id + i;
        let value = unsafe { (base as *const u32).add(i).read() } as usize;
        if attr_id < attr::MSGPROTO_START {
            return SbiRet::denied();
        }
        if let Err(e) = channel.write_attribute(attr_id, value) {
            return e.into();
        }
    }
    SbiRet::success(0)
}

/// SBI MPXY `send_message_with_response` /
/// `send_message_without_response`.
pub fn send_message(
    channel_id: usize,
    message_id: usize,
    message_data_len: usize,
    with_response: bool,
) -> SbiRet {
    let Some(base) = shmem_base() else {
        return SbiRet::no_shmem();
    };
    let Some(channel) = find_channel(channel_id) else {
        return SbiRet::not_supported();
    };
    if message_data_len > MPXY_SHMEM_SIZE || message_data_len > channel.msg_max_len() {
        return SbiRet::invalid_param();
    }

    let msg = unsafe { core::slice::from_raw_parts(base as *const u8, message_data_len) };
    if with_response {
        let resp =
            unsafe { core::slice::from_raw_parts_mut(base as *mut u8, MPXY_SHMEM_SIZE) };
        match channel.send_message(message_id as u32, msg, Some(resp)) {
            Ok(resp_len) => SbiRet::success(resp_len),
            Err(e) => e.into(),
        }
    } else {
        match channel.send_message(message_id as u32, msg, None) {
            Ok(_) => SbiRet::success(0),
            Err(e) => e.into(),
        }
    }
}

/// SBI MPXY `get_notification_events`.
pub fn get_notification_events(channel_id: usize) -> SbiRet {
    let Some(base) = shmem_base() else {
        return SbiRet::no_shmem();
    };
    let Some(channel) = find_channel(channel_id) else {
        return SbiRet::not_supported();
    };
    let out = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, MPXY_SHMEM_SIZE) };
    match channel.get_notification_events(out) {
        Ok(len) => SbiRet::success(len),
        Err(e) => e.into(),
    }
}

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use sbi_spec::binary::SbiRet;
use sbi_spec::pmu::event_type;

use crate::riscv::csr::*;
use crate::riscv::current_hartindex;
use crate::sbi::features::{PrivilegedVersion, hart_mhpm_mask, hart_privileged_version};
use crate::sbi::trap_stack::{hart_context, hart_context_mut};

/// Maximum number of hardware performance counters supported.
const HARDWARE_COUNTER_MAX: usize = 32;
/// Maximum number of firmware-managed counters supported.
const FIRMWARE_COUNTER_MAX: usize = 16;
/// Marker value for inactive event slots.
const PMU_EVENT_IDX_INVALID: usize = usize::MAX;

/// Counter configuration flags.
mod config_flags {
    pub const SKIP_MATCH: usize = 1 << 0;
    pub const CLEAR_VALUE: usize = 1 << 1;
    pub const AUTO_START: usize = 1 << 2;
}

/// Counter start flags.
mod start_flags {
    pub const INIT_VALUE: usize = 1 << 0;
    pub const INIT_SNAPSHOT: usize = 1 << 1;
}

/// Counter stop flags.
mod stop_flags {
    pub const RESET: usize = 1 << 0;
    pub const TAKE_SNAPSHOT: usize = 1 << 1;
}

/// Per-hart PMU state: the event bound to every counter plus the value
/// store for the firmware counters.
#[repr(C)]
pub struct PmuState {
    active_event: [usize; HARDWARE_COUNTER_MAX + FIRMWARE_COUNTER_MAX],
    /// Bitmap of running firmware counters.
    fw_counter_state: usize,
    /// Values for firmware-managed counters.
    fw_counter: [u64; FIRMWARE_COUNTER_MAX],
    hw_counters_num: usize,
    total_counters_num: usize,
}

impl PmuState {
    pub fn new() -> Self {
        let mhpm_mask = hart_mhpm_mask(current_hartindex());
        let hw_counters_num = mhpm_mask.count_ones() as usize;
        let total_counters_num = hw_counters_num + FIRMWARE_COUNTER_MAX;

        let mut active_event = [PMU_EVENT_IDX_INVALID; HARDWARE_COUNTER_MAX + FIRMWARE_COUNTER_MAX];
        // Fixed counter bindings: mcycle, time, minstret.
        active_event[0] = 0x1;
        active_event[1] = 0x0;
        active_event[2] = 0x2;

        Self {
            active_event,
            fw_counter_state: 0,
            fw_counter: [0; FIRMWARE_COUNTER_MAX],
            hw_counters_num,
            total_counters_num,
        }
    }

    #[inline]
    fn fw_slot(&self, counter_idx: usize) -> Option<usize> {
        if counter_idx < self.hw_counters_num || counter_idx >= self.total_counters_num {
            return None;
        }
        Some(counter_idx - self.hw_counters_num)
    }
}

/// Mapping from an SBI event index range onto a hardware counter set.
#[derive(Debug, Clone)]
pub struct EventToCounterMap {
    counters_mask: u32,
    event_start_idx: u32,
    event_end_idx: u32,
}

impl EventToCounterMap {
    pub const fn new(counters_mask: u32, event_start_idx: u32, event_end_idx: u32) -> Self {
        Self {
            counters_mask,
            event_start_idx,
            event_end_idx,
        }
    }

    #[inline]
    fn matches(&self, event_idx: u32) -> bool {
        self.event_start_idx <= event_idx && event_idx <= self.event_end_idx
    }
}

/// Mapping from a raw (vendor) event selector onto a hardware counter set.
#[derive(Debug, Clone)]
pub struct RawEventToCounterMap {
    counters_mask: u32,
    raw_event_select: u64,
    select_mask: u64,
}

impl RawEventToCounterMap {
    pub const fn new(counters_mask: u32, raw_event_select: u64, select_mask: u64) -> Self {
        Self {
            counters_mask,
            raw_event_select,
            select_mask,
        }
    }

    #[inline]
    fn matches(&self, event_data: u64) -> bool {
        (event_data & self.select_mask) == self.raw_event_select
    }
}

/// Global PMU configuration, built by the platform at cold boot.
pub struct SbiPmu {
    event_to_mhpmevent: BTreeMap<u32, u64>,
    event_to_mhpmcounter: Vec<EventToCounterMap>,
    raw_event_to_mhpmcounter: Vec<RawEventToCounterMap>,
}

impl SbiPmu {
    pub const fn new() -> Self {
        Self {
            event_to_mhpmevent: BTreeMap::new(),
            event_to_mhpmcounter: Vec::new(),
            raw_event_to_mhpmcounter: Vec::new(),
        }
    }

    pub fn insert_event_to_mhpmevent(&mut self, event: u32, selector: u64) {
        self.event_to_mhpmevent.insert(event, selector);
    }

    pub fn insert_event_to_mhpmcounter(&mut self, map: EventToCounterMap) {
        self.event_to_mhpmcounter.push(map);
    }

    pub fn insert_raw_event_to_mhpmcounter(&mut self, map: RawEventToCounterMap) {
        self.raw_event_to_mhpmcounter.push(map);
    }

    /// SBI PMU `num_counters`.
    pub fn num_counters(&self) -> usize {
        hart_context(current_hartindex()).pmu_state.total_counters_num
    }

    /// SBI PMU `counter_get_info`.
    ///
    /// Hardware counters report their user CSR number and width;
    /// firmware counters set the top bit.
    pub fn counter_get_info(&self, counter_idx: usize) -> SbiRet {
        let state = &hart_context(current_hartindex()).pmu_state;
        if counter_idx >= state.total_counters_num {
            return SbiRet::invalid_param();
        }
        if counter_idx < state.hw_counters_num {
            let csr = CSR_CYCLE as usize + hw_counter_csr_offset(counter_idx);
            SbiRet::success(csr | (63 << 12))
        } else {
            SbiRet::success(1 << (usize::BITS - 1))
        }
    }

    /// SBI PMU `counter_config_matching`.
    pub fn counter_config_matching(
        &self,
        counter_idx_base: usize,
        counter_idx_mask: usize,
        config_flags: usize,
        event_idx: usize,
        event_data: u64,
    ) -> SbiRet {
        let state = &mut hart_context_mut(current_hartindex()).pmu_state;
        let event_type = (event_idx >> 16) & 0xf;

        let is_firmware = event_type == event_type::FIRMWARE;
        let counter_idx = if config_flags & config_flags::SKIP_MATCH != 0 {
            // Reuse the exact counter the caller nominated.
            let idx = counter_idx_base + counter_idx_mask.trailing_zeros() as usize;
            if idx >= state.total_counters_num || state.active_event[idx] == PMU_EVENT_IDX_INVALID {
                return SbiRet::invalid_param();
            }
            idx
        } else if is_firmware {
            match self.find_firmware_counter(state, counter_idx_base, counter_idx_mask) {
                Some(idx) => idx,
                None => return SbiRet::not_supported(),
            }
        } else {
            match self.find_hardware_counter(
                state,
                counter_idx_base,
                counter_idx_mask,
                event_idx,
                event_data,
            ) {
                Some(idx) => idx,
                None => return SbiRet::not_supported(),
            }
        };

        state.active_event[counter_idx] = event_idx;

        if let Some(fw_idx) = state.fw_slot(counter_idx) {
            if config_flags & config_flags::CLEAR_VALUE != 0 {
                state.fw_counter[fw_idx] = 0;
            }
            if config_flags & config_flags::AUTO_START != 0 {
                state.fw_counter_state |= 1 << fw_idx;
            }
        } else {
            if config_flags & config_flags::CLEAR_VALUE != 0 {
                write_hw_counter(counter_idx, 0);
            }
            if config_flags & config_flags::AUTO_START != 0 {
                set_hw_counter_inhibit(counter_idx, false);
            }
        }

        SbiRet::success(counter_idx)
    }

    /// SBI PMU `counter_start`.
    pub fn counter_start(
        &self,
        counter_idx_base: usize,
        counter_idx_mask: usize,
        start_flags: usize,
        initial_value: u64,
    ) -> SbiRet {
        if start_flags & start_flags::INIT_SNAPSHOT != 0 {
            return SbiRet::no_shmem();
        }
        let state = &mut hart_context_mut(current_hartindex()).pmu_state;
        let mut started = false;
        for counter_idx in mask_iter(counter_idx_base, counter_idx_mask, state.total_counters_num) {
            if state.active_event[counter_idx] == PMU_EVENT_IDX_INVALID {
                continue;
            }
            started = true;
            if let Some(fw_idx) = state.fw_slot(counter_idx) {
                if state.fw_counter_state & (1 << fw_idx) != 0 {
                    return SbiRet::already_started();
                }
                if start_flags & start_flags::INIT_VALUE != 0 {
                    state.fw_counter[fw_idx] = initial_value;
                }
                state.fw_counter_state |= 1 << fw_idx;
            } else {
                if start_flags & start_flags::INIT_VALUE != 0 {
                    write_hw_counter(counter_idx, initial_value);
                }
                set_hw_counter_inhibit(counter_idx, false);
            }
        }
        if started {
            SbiRet::success(0)
        } else {
            SbiRet::invalid_param()
        }
    }

    /// SBI PMU `counter_stop`.
    pub fn counter_stop(
        &self,
        counter_idx_base: usize,
        counter_idx_mask: usize,
        stop_flags: usize,
    ) -> SbiRet {
        if stop_flags & stop_flags::TAKE_SNAPSHOT != 0 {
            return SbiRet::no_shmem();
        }
        let state = &mut hart_context_mut(current_hartindex()).pmu_state;
        let mut stopped = false;
        for counter_idx in mask_iter(counter_idx_base, counter_idx_mask, state.total_counters_num) {
            if state.active_event[counter_idx] == PMU_EVENT_IDX_INVALID {
                continue;
            }
            stopped = true;
            if let Some(fw_idx) = state.fw_slot(counter_idx) {
                if state.fw_counter_state & (1 << fw_idx) == 0 {
                    return SbiRet::already_stopped();
                }
                state.fw_counter_state &= !(1 << fw_idx);
            } else {
                set_hw_counter_inhibit(counter_idx, true);
            }
            if stop_flags & stop_flags::RESET != 0 {
                state.active_event[counter_idx] = PMU_EVENT_IDX_INVALID;
            }
        }
        if stopped {
            SbiRet::success(0)
        } else {
            SbiRet::invalid_param()
        }
    }

    /// SBI PMU `counter_fw_read`.
    pub fn counter_fw_read(&self, counter_idx: usize) -> SbiRet {
        let state = &hart_context(current_hartindex()).pmu_state;
        match state.fw_slot(counter_idx) {
            Some(fw_idx) => SbiRet::success(state.fw_counter[fw_idx] as usize),
            None => SbiRet::invalid_param(),
        }
    }

    /// SBI PMU `counter_fw_read_hi`: the upper half is always zero on
    /// a 64-bit platform.
    pub fn counter_fw_read_hi(&self, counter_idx: usize) -> SbiRet {
        let state = &hart_context(current_hartindex()).pmu_state;
        match state.fw_slot(counter_idx) {
            Some(_) => SbiRet::success(0),
            None => SbiRet::invalid_param(),
        }
    }

    fn find_firmware_counter(
        &self,
        state: &PmuState,
        counter_idx_base: usize,
        counter_idx_mask: usize,
    ) -> Option<usize> {
        mask_iter(counter_idx_base, counter_idx_mask, state.total_counters_num).find(|&idx| {
            state.fw_slot(idx).is_some() && state.active_event[idx] == PMU_EVENT_IDX_INVALID
        })
    }

    fn find_hardware_counter(
        &self,
        state: &PmuState,
        counter_idx_base: usize,
        counter_idx_mask: usize,
        event_idx: usize,
        event_data: u64,
    ) -> Option<usize> {
        let event_type_bits = (event_idx >> 16) & 0xf;
        let hw_mask: u32 = if event_type_bits == event_type::HARDWARE_RAW {
            self.raw_event_to_mhpmcounter
                .iter()
                .filter(|map| map.matches(event_data))
                .map(|map| map.counters_mask)
                .fold(0, |acc, mask| acc | mask)
        } else {
            self.event_to_mhpmcounter
                .iter()
                .filter(|map| map.matches(event_idx as u32))
                .map(|map| map.counters_mask)
                .fold(0, |acc, mask| acc | mask)
        };
        if hw_mask == 0 {
            return None;
        }

        let counter_idx = mask_iter(counter_idx_base, counter_idx_mask, state.hw_counters_num)
            .find(|&idx| {
                hw_mask & (1 << idx) != 0 && state.active_event[idx] == PMU_EVENT_IDX_INVALID
            })?;

        // Program the event selector; raw events carry it in the event
        // data, standard events go through the platform translation.
        let selector = if event_type_bits == event_type::HARDWARE_RAW {
            event_data
        } else {
            *self.event_to_mhpmevent.get(&(event_idx as u32))?
        };
        write_mhpmevent(counter_idx, selector);
        Some(counter_idx)
    }
}

fn mask_iter(base: usize, mask: usize, limit: usize) -> impl Iterator<Item = usize> {
    (0..usize::BITS as usize)
        .filter(move |bit| mask & (1 << bit) != 0)
        .map(move |bit| base + bit)
        .filter(move |idx| *idx < limit)
}

/// CSR offset of a hardware counter index: 0 -> cycle, 1 -> time,
/// 2 -> instret, then the populated mhpmcounters in mask order.
fn hw_counter_csr_offset(counter_idx: usize) -> usize {
    let mhpm_mask = hart_mhpm_mask(current_hartindex());
    let mut seen = 0;
    for bit in 0..HARDWARE_COUNTER_MAX {
        if mhpm_mask & (1 << bit) != 0 {
            if seen == counter_idx {
                return bit;
            }
            seen += 1;
        }
    }
    0
}

fn write_hw_counter(counter_idx: usize, value: u64) {
    match hw_counter_csr_offset(counter_idx) {
        0 => mcycle::write(value),
        2 => minstret::write(value),
        3 => {
            let mut trap_info = crate::sbi::early_trap::TrapInfo::default();
            unsafe {
                crate::sbi::early_trap::csr_write_allow::<CSR_MHPMCOUNTER3>(
                    &mut trap_info,
                    value as usize,
                )
            };
        }
        4 => {
            let mut trap_info = crate::sbi::early_trap::TrapInfo::default();
            unsafe {
                crate::sbi::early_trap::csr_write_allow::<CSR_MHPMCOUNTER4>(
                    &mut trap_info,
                    value as usize,
                )
            };
        }
        // Remaining counters keep their value; the time counter is
        // read-only anyway.
        _ => (),
    }
}

fn write_mhpmevent(counter_idx: usize, selector: u64) {
    let mut trap_info = crate::sbi::early_trap::TrapInfo::default();
    match hw_counter_csr_offset(counter_idx) {
        3 => unsafe {
            crate::sbi::early_trap::csr_write_allow::<CSR_MHPMEVENT3>(
                &mut trap_info,
                selector as usize,
            )
        },
        4 => unsafe {
            crate::sbi::early_trap::csr_write_allow::<CSR_MHPMEVENT4>(
                &mut trap_info,
                selector as usize,
            )
        },
        _ => (),
    }
}

/// Inhibit or release one hardware counter, where the hart supports it.
fn set_hw_counter_inhibit(counter_idx: usize, inhibit: bool) {
    if hart_privileged_version(current_hartindex()) < PrivilegedVersion::Version1_11 {
        return;
    }
    let bit = hw_counter_csr_offset(counter_idx);
    let mut word = mcountinhibit::read();
    if inhibit {
        word |= 1 << bit;
    } else {
        word &= !(1 << bit);
    }
    // Bit 1 (time) is hardwired to zero.
    word &= !0b10;
    mcountinhibit::write(word);
}

/// Bumps a running firmware counter bound to `firmware_event`.
///
/// Called from the hot paths (timer, IPI, fences, emulation) and a no-op
/// unless the supervisor configured a matching counter.
pub fn pmu_firmware_counter_increment(firmware_event: usize) {
    let Some(ctx) = crate::sbi::trap_stack::try_hart_context(current_hartindex()) else {
        return;
    };
    let state = unsafe {
        // Only the owning hart mutates its own PMU state.
        &mut *(core::ptr::from_ref(&ctx.pmu_state) as *mut PmuState)
    };
    let event_idx = (event_type::FIRMWARE << 16) | firmware_event;
    for fw_idx in 0..FIRMWARE_COUNTER_MAX {
        let counter_idx = state.hw_counters_num + fw_idx;
        if state.active_event[counter_idx] == event_idx
            && state.fw_counter_state & (1 << fw_idx) != 0
        {
            state.fw_counter[fw_idx] = state.fw_counter[fw_idx].wrapping_add(1);
        }
    }
}

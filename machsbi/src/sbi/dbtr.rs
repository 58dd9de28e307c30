use memprot::{Access, Mode};
use sbi_spec::binary::SbiRet;

use crate::riscv::csr::{CSR_TDATA1, CSR_TDATA2, CSR_TSELECT};
use crate::riscv::current_hartindex;
use crate::sbi::domain;
use crate::sbi::early_trap::{TrapInfo, csr_read_allow, csr_write_allow};
use crate::sbi::features::{Extension, hart_extension_probe};
use crate::sbi::trap_stack::hart_context_mut;

/// Triggers managed per hart; the Sdtrig probe may find fewer.
pub const MAX_TRIGGERS: usize = 8;

/// Trigger state word bits, mirrored to the supervisor via shmem.
mod tstate {
    /// The trigger is bound to a supervisor request.
    pub const MAPPED: usize = 1 << 0;
    /// A hardware trigger backs this entry.
    pub const HAVE_HW: usize = 1 << 1;
    /// The supervisor asked for the trigger to fire in U-mode.
    pub const U: usize = 1 << 2;
    /// The supervisor asked for the trigger to fire in S-mode.
    pub const S: usize = 1 << 3;
}

/// One shared-memory message slot, as exchanged with the supervisor.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct TrigMsg {
    tstate: usize,
    tdata1: usize,
    tdata2: usize,
    tdata3: usize,
}

#[derive(Clone, Copy, Default)]
struct Trigger {
    state: usize,
    tdata1: usize,
    tdata2: usize,
    tdata3: usize,
}

/// Per-hart debug trigger state.
pub struct DbtrState {
    shmem: Option<usize>,
    total: usize,
    triggers: [Trigger; MAX_TRIGGERS],
}

impl DbtrState {
    pub const fn new() -> Self {
        Self {
            shmem: None,
            total: 0,
            triggers: [Trigger {
                state: 0,
                tdata1: 0,
                tdata2: 0,
                tdata3: 0,
            }; MAX_TRIGGERS],
        }
    }
}

/// Counts usable hardware triggers by probing `tselect` write-read.
pub fn probe_triggers() -> usize {
    if !hart_extension_probe(current_hartindex(), Extension::Sdtrig) {
        return 0;
    }
    let mut trap_info = TrapInfo::default();
    let mut count = 0;
    for index in 0..MAX_TRIGGERS {
        unsafe {
            csr_write_allow::<CSR_TSELECT>(&mut trap_info, index);
            if trap_info.mcause != usize::MAX {
                break;
            }
            if csr_read_allow::<CSR_TSELECT>(&mut trap_info) != index
                || trap_info.mcause != usize::MAX
            {
                break;
            }
        }
        count += 1;
    }
    hart_context_mut(current_hartindex()).dbtr.total = count;
    count
}

/// Total triggers available on the current hart.
pub fn total_triggers() -> usize {
    hart_context_mut(current_hartindex()).dbtr.total
}

/// SBI DBTR `num_triggers`: with a nonzero filter only triggers of that
/// type are counted; the reference hart exposes one type, so the filter
/// either matches all or none.
pub fn num_trig(trig_tdata1: usize) -> SbiRet {
    let total = total_triggers();
    if trig_tdata1 == 0 {
        return SbiRet::success(total);
    }
    // mcontrol6 triggers report type 6 in tdata1[XLEN-1:XLEN-4].
    let wanted_type = trig_tdata1 >> (usize::BITS - 4);
    if wanted_type == 6 {
        SbiRet::success(total)
    } else {
        SbiRet::success(0)
    }
}

/// SBI DBTR `set_shmem`.
pub fn setup_shmem(frame: &crate::sbi::trap::TrapFrame, shmem_lo: usize, shmem_hi: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    if shmem_lo == usize::MAX && shmem_hi == usize::MAX {
        state.shmem = None;
        return SbiRet::success(0);
    }
    if shmem_hi != 0 {
        return SbiRet::invalid_address();
    }
    if shmem_lo & (core::mem::size_of::<TrigMsg>() - 1) != 0 {
        return SbiRet::invalid_address();
    }
    let mode = if frame.prev_mode() == crate::riscv::csr::mstatus::PRV_U {
        Mode::User
    } else {
        Mode::Supervisor
    };
    let len = MAX_TRIGGERS * core::mem::size_of::<TrigMsg>();
    if !domain::current_domain_check_range(shmem_lo, len, mode, Access::Read)
        || !domain::current_domain_check_range(shmem_lo, len, mode, Access::Write)
    {
        return SbiRet::invalid_address();
    }
    state.shmem = Some(shmem_lo);
    SbiRet::success(0)
}

fn shmem_slot(state: &DbtrState, index: usize) -> Option<*mut TrigMsg> {
    state
        .shmem
        .map(|base| (base + index * core::mem::size_of::<TrigMsg>()) as *mut TrigMsg)
}

/// Programs one hardware trigger.
fn program_trigger(index: usize, trigger: &Trigger, enable: bool) {
    let mut trap_info = TrapInfo::default();
    let tdata1 = if enable { trigger.tdata1 } else { 0 };
    unsafe {
        csr_write_allow::<CSR_TSELECT>(&mut trap_info, index);
        csr_write_allow::<CSR_TDATA1>(&mut trap_info, tdata1);
        csr_write_allow::<CSR_TDATA2>(&mut trap_info, trigger.tdata2);
    }
}

/// SBI DBTR `install_triggers`: reads `trig_count` configurations from
/// shared memory, claims free triggers and programs them.
pub fn install_trig(trig_count: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    if state.shmem.is_none() {
        return SbiRet::no_shmem();
    }
    if trig_count == 0 || trig_count > state.total {
        return SbiRet::invalid_param();
    }
    // All-or-nothing: check free capacity first.
    let free = (0..state.total)
        .filter(|i| state.triggers[*i].state & tstate::MAPPED == 0)
        .count();
    if free < trig_count {
        return SbiRet::failed();
    }

    for msg_index in 0..trig_count {
        let msg = unsafe { shmem_slot(state, msg_index).unwrap().read() };
        let slot = (0..state.total)
            .find(|i| state.triggers[*i].state & tstate::MAPPED == 0)
            .unwrap();
        let trigger = &mut state.triggers[slot];
        trigger.tdata1 = msg.tdata1;
        trigger.tdata2 = msg.tdata2;
        trigger.tdata3 = msg.tdata3;
        trigger.state = tstate::MAPPED
            | tstate::HAVE_HW
            | (msg.tstate & (tstate::U | tstate::S));
        program_trigger(slot, trigger, true);
        // Report the claimed index back through the same slot.
        unsafe {
            shmem_slot(state, msg_index).unwrap().write(TrigMsg {
                tstate: trigger.state | (slot << 4),
                tdata1: trigger.tdata1,
                tdata2: trigger.tdata2,
                tdata3: trigger.tdata3,
            });
        }
    }
    SbiRet::success(0)
}

/// SBI DBTR `read_triggers`.
pub fn read_trig(trig_idx_base: usize, trig_count: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    if state.shmem.is_none() {
        return SbiRet::no_shmem();
    }
    if trig_idx_base + trig_count > state.total {
        return SbiRet::invalid_param();
    }
    for i in 0..trig_count {
        let trigger = &state.triggers[trig_idx_base + i];
        unsafe {
            shmem_slot(state, i).unwrap().write(TrigMsg {
                tstate: trigger.state,
                tdata1: trigger.tdata1,
                tdata2: trigger.tdata2,
                tdata3: trigger.tdata3,
            });
        }
    }
    SbiRet::success(0)
}

/// SBI DBTR `update_triggers`: rewrites already mapped triggers from
/// shared memory.
pub fn update_trig(trig_count: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    if state.shmem.is_none() {
        return SbiRet::no_shmem();
    }
    if trig_count == 0 || trig_count > state.total {
        return SbiRet::invalid_param();
    }
    for msg_index in 0..trig_count {
        let msg = unsafe { shmem_slot(state, msg_index).unwrap().read() };
        let slot = (msg.tstate >> 4) & (MAX_TRIGGERS - 1);
        if slot >= state.total || state.triggers[slot].state & tstate::MAPPED == 0 {
            return SbiRet::invalid_param();
        }
        let trigger = &mut state.triggers[slot];
        trigger.tdata1 = msg.tdata1;
        trigger.tdata2 = msg.tdata2;
        trigger.tdata3 = msg.tdata3;
        program_trigger(slot, trigger, true);
    }
    SbiRet::success(0)
}

fn for_mask(
    state: &mut DbtrState,
    trig_idx_base: usize,
    trig_idx_mask: usize,
    mut f: impl FnMut(&mut Trigger, usize),
) -> SbiRet {
    for bit in 0..usize::BITS as usize {
        if trig_idx_mask & (1 << bit) == 0 {
            continue;
        }
        let index = trig_idx_base + bit;
        if index >= state.total {
            return SbiRet::invalid_param();
        }
        if state.triggers[index].state & tstate::MAPPED == 0 {
            return SbiRet::invalid_param();
        }
        let mut trigger = state.triggers[index];
        f(&mut trigger, index);
        state.triggers[index] = trigger;
    }
    SbiRet::success(0)
}

/// SBI DBTR `enable_triggers`.
pub fn enable_trig(trig_idx_base: usize, trig_idx_mask: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    for_mask(state, trig_idx_base, trig_idx_mask, |trigger, index| {
        program_trigger(index, trigger, true);
    })
}

/// SBI DBTR `disable_triggers`.
pub fn disable_trig(trig_idx_base: usize, trig_idx_mask: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    for_mask(state, trig_idx_base, trig_idx_mask, |trigger, index| {
        program_trigger(index, trigger, false);
    })
}

/// SBI DBTR `uninstall_triggers`.
pub fn uninstall_trig(trig_idx_base: usize, trig_idx_mask: usize) -> SbiRet {
    let state = &mut hart_context_mut(current_hartindex()).dbtr;
    for_mask(state, trig_idx_base, trig_idx_mask, |trigger, index| {
        program_trigger(index, &Trigger::default(), false);
        *trigger = Trigger::default();
    })
}

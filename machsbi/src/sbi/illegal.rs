use riscv::register::{mtval, scounteren};
use sbi_spec::pmu::firmware_event;

use crate::riscv::csr::*;
use crate::sbi::early_trap::{self, TrapInfo, csr_read_allow, csr_write_allow};
use crate::sbi::pmu::pmu_firmware_counter_increment;
use crate::sbi::timer;
use crate::sbi::trap::{TrapFrame, advance_pc, redirect};

/// `mcause` value of an illegal instruction exception.
const CAUSE_ILLEGAL_INSTRUCTION: usize = 2;

const OPCODE_MASK: usize = 0x7f;
const OPCODE_SYSTEM: usize = 0b111_0011;

const INSN_MATCH_WFI: usize = 0x10500073;

/// Illegal instruction trap entry.
///
/// Only SYSTEM-opcode instructions are candidates for emulation; every
/// other instruction goes back to the supervisor as a true illegal
/// instruction trap.
pub fn illegal_insn_handler(frame: &mut TrapFrame) {
    pmu_firmware_counter_increment(firmware_event::ILLEGAL_INSN);

    if frame.prev_mode() == mstatus::PRV_M {
        panic!("illegal instruction in M-mode at {:#x}", frame.mepc);
    }

    let mut insn = mtval::read();
    if insn & 3 != 3 {
        if insn == 0 {
            match early_trap::fetch_inst(frame.mepc) {
                Ok((fetched, _)) => insn = fetched,
                Err(trap_info) => {
                    redirect(frame, trap_info.mcause, trap_info.mtval);
                    return;
                }
            }
        }
        // Compressed instructions are never emulated here.
        if insn & 3 != 3 {
            truly_illegal_insn(frame, insn);
            return;
        }
    }

    if insn & OPCODE_MASK != OPCODE_SYSTEM {
        truly_illegal_insn(frame, insn);
        return;
    }
    system_opcode_insn(frame, insn);
}

fn truly_illegal_insn(frame: &mut TrapFrame, insn: usize) {
    redirect(frame, CAUSE_ILLEGAL_INSTRUCTION, insn);
}

/// Emulates CSR accesses of the SYSTEM opcode.
fn system_opcode_insn(frame: &mut TrapFrame, insn: usize) {
    // WFI traps as illegal when executed from VS/VU mode; the hypervisor
    // has to see it, not us.
    if frame.prev_virt() && insn == INSN_MATCH_WFI {
        truly_illegal_insn(frame, insn);
        return;
    }

    let rs1_num = (insn >> 15) & 0x1f;
    let rd_num = (insn >> 7) & 0x1f;
    let funct3 = (insn >> 12) & 0x7;
    let csr_num = (insn >> 20) as u16;
    let rs1_val = frame.gpr(rs1_num);

    let Some(csr_val) = emulate_csr_read(csr_num, frame) else {
        truly_illegal_insn(frame, insn);
        return;
    };

    let (new_csr_val, do_write) = match funct3 {
        1 => (rs1_val, true),
        2 => (csr_val | rs1_val, rs1_num != 0),
        3 => (csr_val & !rs1_val, rs1_num != 0),
        5 => (rs1_num, true),
        6 => (csr_val | rs1_num, rs1_num != 0),
        7 => (csr_val & !rs1_num, rs1_num != 0),
        _ => {
            truly_illegal_insn(frame, insn);
            return;
        }
    };

    if do_write && !emulate_csr_write(csr_num, frame, new_csr_val) {
        truly_illegal_insn(frame, insn);
        return;
    }

    frame.set_gpr(rd_num, csr_val);
    advance_pc(frame, 4);
}

/// Counter-enable word gating the calling mode; user mode reads go
/// through `scounteren`, supervisor reads are always emulated.
fn counter_enable(frame: &TrapFrame) -> usize {
    if frame.prev_mode() == mstatus::PRV_U {
        scounteren::read().bits()
    } else {
        usize::MAX
    }
}

fn guarded_read<const CSR: u16>() -> Option<usize> {
    let mut trap_info = TrapInfo::default();
    let value = unsafe { csr_read_allow::<CSR>(&mut trap_info) };
    (trap_info.mcause == usize::MAX).then_some(value)
}

fn guarded_write<const CSR: u16>(value: usize) -> bool {
    let mut trap_info = TrapInfo::default();
    unsafe { csr_write_allow::<CSR>(&mut trap_info, value) };
    trap_info.mcause == usize::MAX
}

/// Emulated CSR read; `None` means the access stays illegal.
fn emulate_csr_read(csr_num: u16, frame: &TrapFrame) -> Option<usize> {
    let cen = counter_enable(frame);

    match csr_num {
        CSR_CYCLE => {
            if cen & (1 << 0) == 0 {
                return None;
            }
            Some(mcycle::read() as usize)
        }
        CSR_TIME => {
            if cen & (1 << 1) == 0 {
                return None;
            }
            if frame.prev_virt() {
                Some(timer::virt_value() as usize)
            } else {
                Some(timer::value() as usize)
            }
        }
        CSR_INSTRET => {
            if cen & (1 << 2) == 0 {
                return None;
            }
            Some(minstret::read() as usize)
        }
        CSR_HPMCOUNTER3 => {
            if cen & (1 << 3) == 0 {
                return None;
            }
            guarded_read::<CSR_MHPMCOUNTER3>()
        }
        CSR_HPMCOUNTER4 => {
            if cen & (1 << 4) == 0 {
                return None;
            }
            guarded_read::<CSR_MHPMCOUNTER4>()
        }
        CSR_HTIMEDELTA => {
            // Only the non-virtualized supervisor owns the delta.
            if frame.prev_mode() == mstatus::PRV_S && !frame.prev_virt() {
                Some(timer::get_delta() as usize)
            } else {
                None
            }
        }
        CSR_MHPMEVENT3 => guarded_read::<CSR_MHPMEVENT3>(),
        CSR_MHPMEVENT4 => guarded_read::<CSR_MHPMEVENT4>(),
        _ => None,
    }
}

/// Emulated CSR write; `false` means the access stays illegal.
fn emulate_csr_write(csr_num: u16, frame: &TrapFrame, value: usize) -> bool {
    match csr_num {
        CSR_CYCLE => {
            mcycle::write(value as u64);
            true
        }
        CSR_INSTRET => {
            minstret::write(value as u64);
            true
        }
        CSR_HPMCOUNTER3 => guarded_write::<CSR_MHPMCOUNTER3>(value),
        CSR_HPMCOUNTER4 => guarded_write::<CSR_MHPMCOUNTER4>(value),
        CSR_HTIMEDELTA => {
            if frame.prev_mode() == mstatus::PRV_S && !frame.prev_virt() {
                timer::set_delta(value as u64);
                true
            } else {
                false
            }
        }
        CSR_MHPMEVENT3 => guarded_write::<CSR_MHPMEVENT3>(value),
        CSR_MHPMEVENT4 => guarded_write::<CSR_MHPMEVENT4>(value),
        _ => false,
    }
}

use riscv::register::mtval;
use riscv_decode::{Instruction, decode};
use sbi_spec::pmu::firmware_event;

use crate::sbi::early_trap::{self, unpriv_read, unpriv_write};
use crate::sbi::pmu::pmu_firmware_counter_increment;
use crate::sbi::trap::{TrapFrame, advance_pc, redirect, redirect_current};

enum VarType {
    Signed,
    UnSigned,
    /// Floating point target; the firmware image is built without the
    /// F/D extensions, so these go back to the supervisor untouched.
    Float,
}

struct LoadOp {
    rd: usize,
    var_type: VarType,
    len: usize,
}

struct StoreOp {
    rs2: usize,
    float: bool,
    len: usize,
}

/// Decodes the target register of a compressed load, if the instruction
/// is one of the RV64C load forms.
fn decode_compressed_load(insn: u16) -> Option<LoadOp> {
    let op = insn & 0b11;
    let funct3 = (insn >> 13) & 0b111;
    let rd_compact = ((insn >> 2) & 0b111) as usize + 8;
    let rd_full = ((insn >> 7) & 0b11111) as usize;
    match (op, funct3) {
        // c.lw / c.ld
        (0b00, 0b010) => Some(LoadOp {
            rd: rd_compact,
            var_type: VarType::Signed,
            len: 4,
        }),
        (0b00, 0b011) => Some(LoadOp {
            rd: rd_compact,
            var_type: VarType::Signed,
            len: 8,
        }),
        // c.fld
        (0b00, 0b001) => Some(LoadOp {
            rd: rd_compact,
            var_type: VarType::Float,
            len: 8,
        }),
        // c.lwsp / c.ldsp
        (0b10, 0b010) if rd_full != 0 => Some(LoadOp {
            rd: rd_full,
            var_type: VarType::Signed,
            len: 4,
        }),
        (0b10, 0b011) if rd_full != 0 => Some(LoadOp {
            rd: rd_full,
            var_type: VarType::Signed,
            len: 8,
        }),
        // c.fldsp
        (0b10, 0b001) => Some(LoadOp {
            rd: rd_full,
            var_type: VarType::Float,
            len: 8,
        }),
        _ => None,
    }
}

/// Decodes the source register of a compressed store.
fn decode_compressed_store(insn: u16) -> Option<StoreOp> {
    let op = insn & 0b11;
    let funct3 = (insn >> 13) & 0b111;
    let rs2_compact = ((insn >> 2) & 0b111) as usize + 8;
    let rs2_full = ((insn >> 2) & 0b11111) as usize;
    match (op, funct3) {
        // c.sw / c.sd
        (0b00, 0b110) => Some(StoreOp {
            rs2: rs2_compact,
            float: false,
            len: 4,
        }),
        (0b00, 0b111) => Some(StoreOp {
            rs2: rs2_compact,
            float: false,
            len: 8,
        }),
        // c.fsd
        (0b00, 0b101) => Some(StoreOp {
            rs2: rs2_compact,
            float: true,
            len: 8,
        }),
        // c.swsp / c.sdsp
        (0b10, 0b110) => Some(StoreOp {
            rs2: rs2_full,
            float: false,
            len: 4,
        }),
        (0b10, 0b111) => Some(StoreOp {
            rs2: rs2_full,
            float: false,
            len: 8,
        }),
        // c.fsdsp
        (0b10, 0b101) => Some(StoreOp {
            rs2: rs2_full,
            float: true,
            len: 8,
        }),
        _ => None,
    }
}

/// Fetches the trapping instruction, or redirects the fetch fault.
fn fetch_trapping_inst(frame: &mut TrapFrame) -> Option<(usize, usize)> {
    match early_trap::fetch_inst(frame.mepc) {
        Ok(pair) => Some(pair),
        Err(trap_info) => {
            redirect(frame, trap_info.mcause, trap_info.mtval);
            None
        }
    }
}

/// Misaligned load: assemble the value byte by byte with unprivileged
/// reads and retire the instruction by hand.
pub fn load_handler(frame: &mut TrapFrame) {
    pmu_firmware_counter_increment(firmware_event::MISALIGNED_LOAD);

    let addr = mtval::read();
    let Some((insn, insn_len)) = fetch_trapping_inst(frame) else {
        return;
    };

    let op = if insn_len == 2 {
        decode_compressed_load(insn as u16)
    } else {
        match decode(insn as u32) {
            Ok(Instruction::Lb(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Signed,
                len: 1,
            }),
            Ok(Instruction::Lbu(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::UnSigned,
                len: 1,
            }),
            Ok(Instruction::Lh(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Signed,
                len: 2,
            }),
            Ok(Instruction::Lhu(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::UnSigned,
                len: 2,
            }),
            Ok(Instruction::Lw(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Signed,
                len: 4,
            }),
            Ok(Instruction::Lwu(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::UnSigned,
                len: 4,
            }),
            Ok(Instruction::Ld(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Signed,
                len: 8,
            }),
            Ok(Instruction::Flw(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Float,
                len: 4,
            }),
            Ok(Instruction::Fld(i)) => Some(LoadOp {
                rd: i.rd() as usize,
                var_type: VarType::Float,
                len: 8,
            }),
            _ => None,
        }
    };

    let Some(LoadOp { rd, var_type, len }) = op else {
        // Not a load this handler understands; let the supervisor see
        // the original trap.
        redirect_current(frame);
        return;
    };
    if matches!(var_type, VarType::Float) {
        redirect_current(frame);
        return;
    }

    let raw_data = match unpriv_read(addr, len) {
        Ok(data) => data,
        Err(trap_info) => {
            // Surface the exact failing sub-access.
            redirect(frame, trap_info.mcause, trap_info.mtval);
            return;
        }
    };

    let read_data = match var_type {
        VarType::Signed => match len {
            1 => raw_data as i8 as usize,
            2 => raw_data as i16 as usize,
            4 => raw_data as i32 as usize,
            _ => raw_data,
        },
        VarType::UnSigned | VarType::Float => raw_data,
    };

    frame.set_gpr(rd, read_data);
    advance_pc(frame, insn_len);
}

/// Misaligned store: break the register value into bytes and store them
/// with unprivileged writes.
pub fn store_handler(frame: &mut TrapFrame) {
    pmu_firmware_counter_increment(firmware_event::MISALIGNED_STORE);

    let addr = mtval::read();
    let Some((insn, insn_len)) = fetch_trapping_inst(frame) else {
        return;
    };

    let op = if insn_len == 2 {
        decode_compressed_store(insn as u16)
    } else {
        match decode(insn as u32) {
            Ok(Instruction::Sb(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: false,
                len: 1,
            }),
            Ok(Instruction::Sh(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: false,
                len: 2,
            }),
            Ok(Instruction::Sw(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: false,
                len: 4,
            }),
            Ok(Instruction::Sd(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: false,
                len: 8,
            }),
            Ok(Instruction::Fsw(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: true,
                len: 4,
            }),
            Ok(Instruction::Fsd(i)) => Some(StoreOp {
                rs2: i.rs2() as usize,
                float: true,
                len: 8,
            }),
            _ => None,
        }
    };

    let Some(StoreOp { rs2, float, len }) = op else {
        redirect_current(frame);
        return;
    };
    if float {
        redirect_current(frame);
        return;
    }

    let raw_data = frame.gpr(rs2);
    let bytes = raw_data.to_le_bytes();
    if let Err(trap_info) = unpriv_write(addr, &bytes[..len]) {
        redirect(frame, trap_info.mcause, trap_info.mtval);
        return;
    }

    advance_pc(frame, insn_len);
}

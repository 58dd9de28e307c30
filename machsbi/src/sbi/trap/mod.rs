pub mod boot;
pub mod handler;

use core::arch::naked_asm;

use riscv::interrupt::machine::{Exception, Interrupt};
use riscv::register::{
    mcause::{self, Trap},
    mtval, scause, sepc, stval, stvec,
};

use crate::fail;
use crate::riscv::csr::mstatus::{MPP_MASK, MPP_SHIFT, PRV_M, PRV_S, SIE, SPIE, SPP};
use crate::sbi::ecall;
use crate::sbi::illegal;
use crate::sbi::misaligned;
use crate::sbi::sse;
use crate::sbi::timer;

/// `mcause` value of the double trap exception (Ssdbltrp).
const CAUSE_DOUBLE_TRAP: usize = 16;

/// Saved integer register file plus the privilege state needed to resume.
///
/// The layout mirrors the x-register numbering so the assembly save and
/// restore sequences use fixed `8 * n` offsets, and so a whole frame can
/// be copied when a hart switches domain context.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapFrame {
    pub zero: usize,
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
    pub mepc: usize,
    pub mstatus: usize,
}

/// Frame size in bytes, kept in sync with the entry assembly.
pub const TRAP_FRAME_SIZE: usize = core::mem::size_of::<TrapFrame>();

const _: () = assert!(TRAP_FRAME_SIZE == 34 * 8);

impl TrapFrame {
    /// Reads general purpose register `x{index}` from the frame.
    pub fn gpr(&self, index: usize) -> usize {
        match index {
            0 => 0,
            1 => self.ra,
            2 => self.sp,
            3 => self.gp,
            4 => self.tp,
            5 => self.t0,
            6 => self.t1,
            7 => self.t2,
            8 => self.s0,
            9 => self.s1,
            10 => self.a0,
            11 => self.a1,
            12 => self.a2,
            13 => self.a3,
            14 => self.a4,
            15 => self.a5,
            16 => self.a6,
            17 => self.a7,
            18 => self.s2,
            19 => self.s3,
            20 => self.s4,
            21 => self.s5,
            22 => self.s6,
            23 => self.s7,
            24 => self.s8,
            25 => self.s9,
            26 => self.s10,
            27 => self.s11,
            28 => self.t3,
            29 => self.t4,
            30 => self.t5,
            31 => self.t6,
            _ => panic!("invalid register index"),
        }
    }

    /// Writes general purpose register `x{index}` in the frame.
    pub fn set_gpr(&mut self, index: usize, value: usize) {
        match index {
            0 => (),
            1 => self.ra = value,
            2 => self.sp = value,
            3 => self.gp = value,
            4 => self.tp = value,
            5 => self.t0 = value,
            6 => self.t1 = value,
            7 => self.t2 = value,
            8 => self.s0 = value,
            9 => self.s1 = value,
            10 => self.a0 = value,
            11 => self.a1 = value,
            12 => self.a2 = value,
            13 => self.a3 = value,
            14 => self.a4 = value,
            15 => self.a5 = value,
            16 => self.a6 = value,
            17 => self.a7 = value,
            18 => self.s2 = value,
            19 => self.s3 = value,
            20 => self.s4 = value,
            21 => self.s5 = value,
            22 => self.s6 = value,
            23 => self.s7 = value,
            24 => self.s8 = value,
            25 => self.s9 = value,
            26 => self.s10 = value,
            27 => self.s11 = value,
            28 => self.t3 = value,
            29 => self.t4 = value,
            30 => self.t5 = value,
            31 => self.t6 = value,
            _ => panic!("invalid register index"),
        }
    }

    /// Privilege mode the trap came from.
    #[inline]
    pub fn prev_mode(&self) -> usize {
        (self.mstatus & MPP_MASK) >> MPP_SHIFT
    }

    /// Virtualization state the trap came from.
    #[inline]
    pub fn prev_virt(&self) -> bool {
        self.mstatus & crate::riscv::csr::mstatus::MPV != 0
    }
}

/// Machine trap entry point.
///
/// `mscratch` holds the hart's trap-stack top while the hart runs below
/// M-mode. On entry the stack pointers are swapped, a [`TrapFrame`] is
/// pushed, and the Rust handler runs with a pointer to it. The frame
/// always sits immediately below the trap-stack top, which is what the
/// domain context switch code relies on when it exchanges frames.
///
/// The only symbol placed in `.text.trap`; the linker script aligns the
/// section so the address is valid for a direct-mode `mtvec`.
#[unsafe(naked)]
#[unsafe(link_section = ".text.trap")]
pub(crate) unsafe extern "C" fn trap_entry() -> ! {
    naked_asm!(
        // sp <- trap stack top, mscratch <- interrupted sp
        "csrrw  sp, mscratch, sp",
        "addi   sp, sp, -{frame_size}",
        // Save every register but sp, which still sits in mscratch.
        "sd     ra, 1*8(sp)",
        "sd     gp, 3*8(sp)",
        "sd     tp, 4*8(sp)",
        "sd     t0, 5*8(sp)",
        "sd     t1, 6*8(sp)",
        "sd     t2, 7*8(sp)",
        "sd     s0, 8*8(sp)",
        "sd     s1, 9*8(sp)",
        "sd     a0, 10*8(sp)",
        "sd     a1, 11*8(sp)",
        "sd     a2, 12*8(sp)",
        "sd     a3, 13*8(sp)",
        "sd     a4, 14*8(sp)",
        "sd     a5, 15*8(sp)",
        "sd     a6, 16*8(sp)",
        "sd     a7, 17*8(sp)",
        "sd     s2, 18*8(sp)",
        "sd     s3, 19*8(sp)",
        "sd     s4, 20*8(sp)",
        "sd     s5, 21*8(sp)",
        "sd     s6, 22*8(sp)",
        "sd     s7, 23*8(sp)",
        "sd     s8, 24*8(sp)",
        "sd     s9, 25*8(sp)",
        "sd     s10, 26*8(sp)",
        "sd     s11, 27*8(sp)",
        "sd     t3, 28*8(sp)",
        "sd     t4, 29*8(sp)",
        "sd     t5, 30*8(sp)",
        "sd     t6, 31*8(sp)",
        // Stash the interrupted sp and give mscratch its value back.
        "csrr   t0, mscratch",
        "sd     t0, 2*8(sp)",
        "addi   t0, sp, {frame_size}",
        "csrw   mscratch, t0",
        "csrr   t0, mepc",
        "sd     t0, 32*8(sp)",
        "csrr   t0, mstatus",
        "sd     t0, 33*8(sp)",
        // Rust handler with the frame pointer.
        "mv     a0, sp",
        "call   {handler}",
        // Restore privilege state first, then the register file.
        "ld     t0, 32*8(sp)",
        "csrw   mepc, t0",
        "ld     t0, 33*8(sp)",
        "csrw   mstatus, t0",
        "ld     ra, 1*8(sp)",
        "ld     gp, 3*8(sp)",
        "ld     tp, 4*8(sp)",
        "ld     t0, 5*8(sp)",
        "ld     t1, 6*8(sp)",
        "ld     t2, 7*8(sp)",
        "ld     s0, 8*8(sp)",
        "ld     s1, 9*8(sp)",
        "ld     a0, 10*8(sp)",
        "ld     a1, 11*8(sp)",
        "ld     a2, 12*8(sp)",
        "ld     a3, 13*8(sp)",
        "ld     a4, 14*8(sp)",
        "ld     a5, 15*8(sp)",
        "ld     a6, 16*8(sp)",
        "ld     a7, 17*8(sp)",
        "ld     s2, 18*8(sp)",
        "ld     s3, 19*8(sp)",
        "ld     s4, 20*8(sp)",
        "ld     s5, 21*8(sp)",
        "ld     s6, 22*8(sp)",
        "ld     s7, 23*8(sp)",
        "ld     s8, 24*8(sp)",
        "ld     s9, 25*8(sp)",
        "ld     s10, 26*8(sp)",
        "ld     s11, 27*8(sp)",
        "ld     t3, 28*8(sp)",
        "ld     t4, 29*8(sp)",
        "ld     t5, 30*8(sp)",
        "ld     t6, 31*8(sp)",
        "ld     sp, 2*8(sp)",
        "mret",
        frame_size = const TRAP_FRAME_SIZE,
        handler = sym trap_handler,
    )
}

/// Top-level trap dispatch, running on the hart's M-mode trap stack.
pub(crate) extern "C" fn trap_handler(frame: &mut TrapFrame) {
    let cause = mcause::read();
    match cause.cause().try_into() {
        Ok(Trap::Interrupt(Interrupt::MachineSoft)) => handler::msoft_handler(frame),
        Ok(Trap::Interrupt(Interrupt::MachineTimer)) => timer::process(),
        Ok(Trap::Exception(Exception::SupervisorEnvCall)) => ecall::handle_ecall(frame),
        Ok(Trap::Exception(Exception::IllegalInstruction)) => illegal::illegal_insn_handler(frame),
        Ok(Trap::Exception(Exception::LoadMisaligned)) => misaligned::load_handler(frame),
        Ok(Trap::Exception(Exception::StoreMisaligned)) => misaligned::store_handler(frame),
        Ok(Trap::Exception(Exception::LoadFault | Exception::StoreFault)) => {
            redirect_current(frame)
        }
        Ok(trap) => {
            // Stray machine interrupts and M-mode faults cannot be
            // redirected; only supervisor exceptions can.
            if matches!(trap, Trap::Interrupt(_)) || frame.prev_mode() == PRV_M {
                fail::unsupported_trap(Some(trap));
            }
            redirect_current(frame)
        }
        Err(_) if cause.bits() == CAUSE_DOUBLE_TRAP => {
            if !sse::inject_double_trap(frame) {
                redirect_current(frame);
            }
        }
        Err(_) => fail::unsupported_trap(None),
    }
}

/// Redirects the trap in flight to the supervisor, preserving the live
/// `mcause`/`mtval` values.
pub fn redirect_current(frame: &mut TrapFrame) {
    redirect(frame, mcause::read().bits(), mtval::read());
}

/// Hands a trap to the supervisor's own vector.
///
/// Emulates the hardware trap entry: `sepc`/`scause`/`stval` describe the
/// faulting context, the `SIE -> SPIE`, `SPP` stack is pushed in the saved
/// `mstatus` image, and `mepc` is pointed at `stvec` so that `mret`
/// resumes inside the supervisor handler.
pub fn redirect(frame: &mut TrapFrame, cause: usize, tval: usize) {
    let prev_mode = frame.prev_mode();
    debug_assert!(prev_mode != PRV_M, "cannot redirect a machine-mode trap");

    unsafe {
        sepc::write(frame.mepc);
        scause::write(cause);
        stval::write(tval);
    }

    // stvec[1:0] encodes the mode; vectored interrupts enter at
    // base + 4 * cause.
    let tv = stvec::read().bits();
    let (tv_base, tv_mode) = (tv & !0b11, tv & 0b11);
    let interrupt_bit = 1 << (usize::BITS - 1);
    let target = if tv_mode == 1 && cause & interrupt_bit != 0 {
        tv_base + 4 * (cause & !interrupt_bit)
    } else {
        tv_base
    };

    let mut mstatus = frame.mstatus;
    // Push the supervisor interrupt-enable stack.
    if mstatus & SIE != 0 {
        mstatus |= SPIE;
    } else {
        mstatus &= !SPIE;
    }
    mstatus &= !SIE;
    // Record the faulting privilege and re-enter in S-mode.
    if prev_mode == PRV_S {
        mstatus |= SPP;
    } else {
        mstatus &= !SPP;
    }
    mstatus = (mstatus & !MPP_MASK) | (PRV_S << MPP_SHIFT);

    frame.mstatus = mstatus;
    frame.mepc = target;
}

/// Advances the saved `mepc` past the instruction that trapped.
#[inline]
pub fn advance_pc(frame: &mut TrapFrame, len: usize) {
    frame.mepc = frame.mepc.wrapping_add(len);
}

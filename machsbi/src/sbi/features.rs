use riscv::register::misa;
use seq_macro::seq;

use crate::riscv::csr::*;
use crate::riscv::current_hartindex;
use crate::sbi::early_trap::{TrapInfo, csr_read_allow, csr_swap, csr_write_allow};
use crate::sbi::pmu::PmuState;
use crate::sbi::trap_stack::{hart_context, hart_context_mut};

pub struct HartFeatures {
    extensions: [bool; Extension::COUNT],
    privileged_version: PrivilegedVersion,
    mhpm_mask: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegedVersion {
    Unknown = 0,
    Version1_10 = 1,
    Version1_11 = 2,
    Version1_12 = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    Sstc = 0,
    Hypervisor = 1,
    Sdtrig = 2,
}

impl Extension {
    pub const COUNT: usize = 3;

    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// Probes if a specific extension is supported for the given hart.
#[inline]
pub fn hart_extension_probe(hart_index: usize, ext: Extension) -> bool {
    hart_context(hart_index).features.extensions[ext.index()]
}

/// Gets the privileged version for the given hart.
#[inline]
pub fn hart_privileged_version(hart_index: usize) -> PrivilegedVersion {
    hart_context(hart_index).features.privileged_version
}

/// Gets the MHPM counter mask for the given hart.
#[inline]
pub fn hart_mhpm_mask(hart_index: usize) -> u32 {
    hart_context(hart_index).features.mhpm_mask
}

fn privileged_version_detection() {
    let mut current_priv_ver = PrivilegedVersion::Unknown;
    {
        if has_csr!(CSR_MCOUNTEREN) {
            current_priv_ver = PrivilegedVersion::Version1_10;
            if has_csr!(CSR_MCOUNTINHIBIT) {
                current_priv_ver = PrivilegedVersion::Version1_11;
                if has_csr!(CSR_MENVCFG) {
                    current_priv_ver = PrivilegedVersion::Version1_12;
                }
            }
        }
    }
    hart_context_mut(current_hartindex())
        .features
        .privileged_version = current_priv_ver;
}

fn extension_detection() {
    let isa = misa::read();
    let mut extensions = [false; Extension::COUNT];

    extensions[Extension::Hypervisor.index()] =
        isa.map(|isa| isa.has_extension('H')).unwrap_or(false);
    // Sstc has no misa bit; stimecmp only stops trapping once
    // menvcfg.STCE is on, so raise it before probing.
    if hart_privileged_version(current_hartindex()) >= PrivilegedVersion::Version1_12 {
        menvcfg::set_bits(menvcfg::STCE);
        extensions[Extension::Sstc.index()] = has_csr!(CSR_STIMECMP);
    }
    extensions[Extension::Sdtrig.index()] = has_csr!(CSR_TSELECT);

    hart_context_mut(current_hartindex()).features.extensions = extensions;
}

fn mhpm_detection() {
    // The standard specifies that mcycle, time and minstret must exist.
    let mut current_mhpm_mask: u32 = 0b111;
    let mut trap_info: TrapInfo = TrapInfo::default();

    fn check_mhpm_csr<const CSR_NUM: u16>(trap_info: *mut TrapInfo, mhpm_mask: &mut u32) {
        unsafe {
            let old_value = csr_read_allow::<CSR_NUM>(trap_info);
            if (*trap_info).mcause == usize::MAX {
                csr_write_allow::<CSR_NUM>(trap_info, 1);
                if (*trap_info).mcause == usize::MAX && csr_swap::<CSR_NUM>(old_value) == 1 {
                    (*mhpm_mask) |= 1 << (CSR_NUM - CSR_MCYCLE);
                }
            }
        }
    }

    macro_rules! m_check_mhpm_csr {
        ($csr_num:expr, $trap_info:expr, $value:expr) => {
            check_mhpm_csr::<$csr_num>($trap_info, $value)
        };
    }

    // CSR_MHPMCOUNTER3:   0xb03
    // CSR_MHPMCOUNTER31:  0xb1f
    seq!(csr_num in 0xb03..=0xb1f {
        m_check_mhpm_csr!(csr_num, &mut trap_info, &mut current_mhpm_mask);
    });

    hart_context_mut(current_hartindex()).features.mhpm_mask = current_mhpm_mask;
}

/// Detects privileged version, ISA extensions and performance counters
/// of the current hart, then rebuilds the PMU state that depends on the
/// detected counter mask.
pub fn hart_features_detection() {
    privileged_version_detection();
    extension_detection();
    mhpm_detection();
    hart_context_mut(current_hartindex()).pmu_state = PmuState::new();
}

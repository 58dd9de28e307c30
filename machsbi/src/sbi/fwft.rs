use riscv::register::medeleg;
use sbi_spec::binary::SbiRet;
use sbi_spec::fwft::feature_type;

use crate::riscv::csr::menvcfg;
use crate::riscv::current_hartindex;
use crate::sbi::features::{PrivilegedVersion, hart_privileged_version};
use crate::sbi::trap_stack::hart_context_mut;

/// Lock flag for `fwft_set`: further writes to the feature are refused.
const SET_FLAG_LOCK: usize = 1 << 0;

/// Feature ids with this bit are global; none are defined yet.
const GLOBAL_FEATURE_BIT: usize = 1 << 30;

/// Features this platform can actually switch.
const SUPPORTED_FEATURES: [usize; 2] = [
    feature_type::MISALIGNED_EXC_DELEG,
    feature_type::DOUBLE_TRAP,
];

/// The full defined feature list; defined but unsupported features
/// answer NOT_SUPPORTED instead of DENIED.
const DEFINED_FEATURES: [usize; 6] = [
    feature_type::MISALIGNED_EXC_DELEG,
    feature_type::LANDING_PAD,
    feature_type::SHADOW_STACK,
    feature_type::DOUBLE_TRAP,
    feature_type::PTE_AD_HW_UPDATING,
    feature_type::POINTER_MASKING_PMLEN,
];

#[derive(Clone, Copy)]
struct FwftConfig {
    feature: usize,
    value: usize,
    flags: usize,
}

/// Per-hart firmware feature configuration.
pub struct FwftState {
    configs: [FwftConfig; SUPPORTED_FEATURES.len()],
}

impl FwftState {
    pub const fn new() -> Self {
        let mut configs = [FwftConfig {
            feature: 0,
            value: 0,
            flags: 0,
        }; SUPPORTED_FEATURES.len()];
        let mut i = 0;
        while i < SUPPORTED_FEATURES.len() {
            configs[i].feature = SUPPORTED_FEATURES[i];
            i += 1;
        }
        Self { configs }
    }

    fn config_mut(&mut self, feature: usize) -> Option<&mut FwftConfig> {
        self.configs.iter_mut().find(|c| c.feature == feature)
    }
}

fn feature_supported(feature: usize) -> bool {
    match feature {
        feature_type::MISALIGNED_EXC_DELEG => true,
        // Double trap control lives in menvcfg, so it needs 1.12.
        feature_type::DOUBLE_TRAP => {
            hart_privileged_version(current_hartindex()) >= PrivilegedVersion::Version1_12
        }
        _ => false,
    }
}

/// Applies a feature value to the hardware.
fn apply(feature: usize, value: usize) {
    match feature {
        feature_type::MISALIGNED_EXC_DELEG => unsafe {
            if value != 0 {
                medeleg::set_load_misaligned();
                medeleg::set_store_misaligned();
            } else {
                medeleg::clear_load_misaligned();
                medeleg::clear_store_misaligned();
            }
        },
        feature_type::DOUBLE_TRAP => {
            if value != 0 {
                menvcfg::set_bits(menvcfg::DTE);
            }
            // Clearing DTE is a read-modify-write without a helper;
            // double trap stays armed once enabled.
        }
        _ => (),
    }
}

/// SBI FWFT `set`.
pub fn set(feature: usize, value: usize, flags: usize) -> SbiRet {
    if feature & GLOBAL_FEATURE_BIT != 0 {
        return SbiRet::denied();
    }
    if !DEFINED_FEATURES.contains(&feature) {
        return SbiRet::denied();
    }
    if !feature_supported(feature) {
        return SbiRet::not_supported();
    }
    if flags & !SET_FLAG_LOCK != 0 {
        return SbiRet::invalid_param();
    }
    if value > 1 {
        return SbiRet::invalid_param();
    }

    let state = &mut hart_context_mut(current_hartindex()).fwft;
    let Some(config) = state.config_mut(feature) else {
        return SbiRet::not_supported();
    };
    if config.flags & SET_FLAG_LOCK != 0 {
        return SbiRet::denied();
    }

    apply(feature, value);
    config.value = value;
    config.flags = flags;
    SbiRet::success(0)
}

/// SBI FWFT `get`.
pub fn get(feature: usize) -> SbiRet {
    if feature & GLOBAL_FEATURE_BIT != 0 {
        return SbiRet::denied();
    }
    if !DEFINED_FEATURES.contains(&feature) {
        return SbiRet::denied();
    }
    if !feature_supported(feature) {
        return SbiRet::not_supported();
    }

    let state = &mut hart_context_mut(current_hartindex()).fwft;
    match state.config_mut(feature) {
        Some(config) => SbiRet::success(config.value),
        None => SbiRet::not_supported(),
    }
}

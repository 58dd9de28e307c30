//! First-stage dynamic information handoff.
//!
//! The previous boot stage may pass a description of where to go next:
//! a magic-tagged structure whose physical address arrives in `a2`.

use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::BootInfo;
use crate::fail;

use riscv::register::mstatus;

/// Gets boot information from the nonstandard `a2` parameter.
///
/// Returns BootInfo containing next stage address and privilege mode.
pub fn get_boot_info(nonstandard_a2: usize) -> BootInfo {
    let dynamic_info = read_paddr(nonstandard_a2).unwrap_or_else(no_dynamic_info_available);
    let (mpp, next_addr) = mpp_next_addr(&dynamic_info).unwrap_or_else(invalid_dynamic_data);
    BootInfo {
        next_address: next_addr,
        mpp,
    }
}

/// Decides whether the current hart takes the cold boot path.
///
/// A valid dynamic information block may pin the boot hart; otherwise a
/// fetch-add lottery picks exactly one winner.
pub fn is_boot_hart(nonstandard_a2: usize) -> bool {
    static LOTTERY: AtomicUsize = AtomicUsize::new(0);
    match read_paddr(nonstandard_a2) {
        Ok(info) if info.boot_hart != usize::MAX => {
            info.boot_hart == crate::riscv::current_hartid()
        }
        _ => LOTTERY.fetch_add(1, Ordering::AcqRel) == 0,
    }
}

/// M-mode firmware dynamic information.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DynamicInfo {
    /// Dynamic information magic value.
    pub magic: usize,
    /// Version of dynamic information.
    pub version: usize,
    /// Address of the next boot-loading stage.
    pub next_addr: usize,
    /// RISC-V privilege mode of the next boot-loading stage.
    pub next_mode: usize,
    /// M-mode firmware options; definition varies between SBI
    /// implementations.
    pub options: usize,
    /// Boot hart ID of current environment.
    pub boot_hart: usize,
}

const DYNAMIC_INFO_INVALID_ADDRESSES: usize = 0x00000000;
/// "OSBI" in little endian.
pub(crate) const MAGIC: usize = 0x4942534f;
const SUPPORTED_VERSION: Range<usize> = 0..3;

/// Error type for dynamic info read failures.
pub struct DynamicReadError {
    pub bad_paddr: Option<usize>,
    pub bad_magic: Option<usize>,
    pub bad_version: Option<usize>,
}

/// Reads dynamic info from physical address.
pub fn read_paddr(paddr: usize) -> Result<DynamicInfo, DynamicReadError> {
    let mut error = DynamicReadError {
        bad_paddr: None,
        bad_magic: None,
        bad_version: None,
    };
    // Check pointer before dereference.
    if paddr == DYNAMIC_INFO_INVALID_ADDRESSES {
        error.bad_paddr = Some(paddr);
        return Err(error);
    }
    let ans = unsafe { *(paddr as *const DynamicInfo) };

    if ans.magic != MAGIC {
        error.bad_magic = Some(ans.magic);
    }
    if !SUPPORTED_VERSION.contains(&ans.version) {
        error.bad_version = Some(ans.version);
    }
    if error.bad_magic.is_some() || error.bad_version.is_some() {
        return Err(error);
    }
    Ok(ans)
}

/// Error type for dynamic info validation failures.
pub struct DynamicError<'a> {
    pub invalid_mpp: bool,
    pub invalid_next_addr: bool,
    pub bad_info: &'a DynamicInfo,
}

/// Validates and extracts privilege mode and next address from dynamic
/// info.
pub fn mpp_next_addr(info: &DynamicInfo) -> Result<(mstatus::MPP, usize), DynamicError<'_>> {
    let mut error = DynamicError {
        invalid_mpp: false,
        invalid_next_addr: false,
        bad_info: info,
    };

    // Fail safe: both checks run before errors are reported.
    let next_addr_valid = crate::cfg::DYNAMIC_NEXT_ADDR_RANGE
        .iter()
        .any(|range| range.contains(&info.next_addr));
    let mpp_valid = matches!(info.next_mode, 0 | 1 | 3);

    if !next_addr_valid {
        error.invalid_next_addr = true;
    }
    if !mpp_valid {
        error.invalid_mpp = true;
    }
    if !next_addr_valid || !mpp_valid {
        return Err(error);
    }

    let mpp = match info.next_mode {
        3 => mstatus::MPP::Machine,
        1 => mstatus::MPP::Supervisor,
        _ => mstatus::MPP::User,
    };

    Ok((mpp, info.next_addr))
}

/// Handles invalid dynamic information data by logging details and
/// hanging.
#[cold]
fn invalid_dynamic_data(err: DynamicError) -> (mstatus::MPP, usize) {
    error!("Invalid data in dynamic information:");
    if err.invalid_mpp {
        error!("* dynamic information contains invalid privilege mode");
    }
    if err.invalid_next_addr {
        error!("* dynamic information contains invalid next jump address");
    }
    let explain_next_mode = match err.bad_info.next_mode {
        3 => "Machine",
        1 => "Supervisor",
        0 => "User",
        _ => "Invalid",
    };
    error!(
        "@ help: dynamic information contains magic value 0x{:x}, version {}, next jump address 0x{:x}, next privilege mode {} ({}), options {:x}, boot hart ID {}",
        err.bad_info.magic,
        err.bad_info.version,
        err.bad_info.next_addr,
        err.bad_info.next_mode,
        explain_next_mode,
        err.bad_info.options,
        err.bad_info.boot_hart
    );
    fail::stop()
}

/// Handles missing dynamic information by logging details and hanging.
#[cold]
fn no_dynamic_info_available(err: DynamicReadError) -> DynamicInfo {
    if let Some(bad_paddr) = err.bad_paddr {
        error!(
            "No dynamic information available at address 0x{:x}",
            bad_paddr
        );
    } else {
        error!("No valid dynamic information available:");
        if let Some(bad_magic) = err.bad_magic {
            error!(
                "* tried to identify dynamic information, but found invalid magic number 0x{:x}",
                bad_magic
            );
        }
        if let Some(bad_version) = err.bad_version {
            error!(
                "* tried to identify version of dynamic information, but version {} is not supported",
                bad_version
            );
        }
    }
    fail::stop()
}

use alloc::boxed::Box;
use sbi_spec::binary::SbiRet;
use spin::Mutex;

/// Collaborative processor performance control backend.
///
/// Supplied by the platform; the firmware only validates and forwards
/// register accesses.
pub trait CppcDevice {
    /// Probes one CPPC register; `Ok(true)` means implemented.
    fn probe(&self, reg: u32) -> Result<bool, sbi_spec::binary::Error>;
    /// Reads a CPPC register.
    fn read(&self, reg: u32) -> Result<u64, sbi_spec::binary::Error>;
    /// Writes a CPPC register.
    fn write(&self, reg: u32, value: u64) -> Result<(), sbi_spec::binary::Error>;
}

/// SBI CPPC extension state.
pub struct SbiCppc {
    pub cppc_dev: Mutex<Box<dyn CppcDevice>>,
}

impl SbiCppc {
    pub fn new(cppc_dev: Mutex<Box<dyn CppcDevice>>) -> Self {
        Self { cppc_dev }
    }

    /// SBI CPPC `probe`.
    pub fn probe(&self, reg: usize) -> SbiRet {
        let Ok(reg) = u32::try_from(reg) else {
            return SbiRet::invalid_param();
        };
        match self.cppc_dev.lock().probe(reg) {
            Ok(implemented) => SbiRet::success(implemented as usize),
            Err(e) => e.into(),
        }
    }

    /// SBI CPPC `read`: low XLEN bits of the register.
    pub fn read(&self, reg: usize) -> SbiRet {
        let Ok(reg) = u32::try_from(reg) else {
            return SbiRet::invalid_param();
        };
        match self.cppc_dev.lock().read(reg) {
            Ok(value) => SbiRet::success(value as usize),
            Err(e) => e.into(),
        }
    }

    /// SBI CPPC `read_hi`: always zero on a 64-bit platform.
    pub fn read_hi(&self, reg: usize) -> SbiRet {
        let Ok(reg) = u32::try_from(reg) else {
            return SbiRet::invalid_param();
        };
        match self.cppc_dev.lock().probe(reg) {
            Ok(true) => SbiRet::success(0),
            Ok(false) => SbiRet::not_supported(),
            Err(e) => e.into(),
        }
    }

    /// SBI CPPC `write`.
    pub fn write(&self, reg: usize, value: u64) -> SbiRet {
        let Ok(reg) = u32::try_from(reg) else {
            return SbiRet::invalid_param();
        };
        match self.cppc_dev.lock().write(reg, value) {
            Ok(()) => SbiRet::success(0),
            Err(e) => e.into(),
        }
    }
}

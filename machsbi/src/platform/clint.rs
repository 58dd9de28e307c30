use aclint::SifiveClint;

use crate::sbi::ipi::IpiDevice;

/// MMIO wrapper around the SiFive CLINT serving both the IPI and timer
/// devices.
pub struct SifiveClintWrap {
    inner: *const SifiveClint,
}

impl SifiveClintWrap {
    pub fn new(base: usize) -> Self {
        Self {
            inner: base as *const SifiveClint,
        }
    }
}

impl IpiDevice for SifiveClintWrap {
    #[inline(always)]
    fn read_mtime(&self) -> u64 {
        unsafe { (*self.inner).read_mtime() }
    }

    #[inline(always)]
    fn write_mtime(&self, val: u64) {
        unsafe { (*self.inner).write_mtime(val) }
    }

    #[inline(always)]
    fn read_mtimecmp(&self, hart_idx: usize) -> u64 {
        unsafe { (*self.inner).read_mtimecmp(hart_idx) }
    }

    #[inline(always)]
    fn write_mtimecmp(&self, hart_idx: usize, val: u64) {
        unsafe { (*self.inner).write_mtimecmp(hart_idx, val) }
    }

    #[inline(always)]
    fn read_msip(&self, hart_idx: usize) -> bool {
        unsafe { (*self.inner).read_msip(hart_idx) }
    }

    #[inline(always)]
    fn set_msip(&self, hart_idx: usize) {
        unsafe { (*self.inner).set_msip(hart_idx) }
    }

    #[inline(always)]
    fn clear_msip(&self, hart_idx: usize) {
        unsafe { (*self.inner).clear_msip(hart_idx) }
    }
}

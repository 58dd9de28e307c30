use sifive_test_device::SifiveTestDevice;

use crate::sbi::reset::ResetDevice;

/// Reset device: the SiFive test device at its usual QEMU location.
pub struct SifiveTestDeviceWrap {
    inner: *const SifiveTestDevice,
}

impl SifiveTestDeviceWrap {
    pub fn new(base: usize) -> Self {
        Self {
            inner: base as *const SifiveTestDevice,
        }
    }
}

impl ResetDevice for SifiveTestDeviceWrap {
    #[inline]
    fn fail(&self, code: u16) -> ! {
        unsafe { (*self.inner).fail(code) }
    }

    #[inline]
    fn pass(&self) -> ! {
        unsafe { (*self.inner).pass() }
    }

    #[inline]
    fn reset(&self) -> ! {
        unsafe { (*self.inner).reset() }
    }
}

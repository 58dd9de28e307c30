use uart16550::Uart16550;

use crate::sbi::console::ConsoleDevice;

/// MMIO wrapper around an NS16550-compatible UART with byte registers.
pub struct Uart16550Wrap {
    inner: *const Uart16550<u8>,
}

impl Uart16550Wrap {
    pub fn new(base: usize) -> Self {
        Self {
            inner: base as *const Uart16550<u8>,
        }
    }
}

impl ConsoleDevice for Uart16550Wrap {
    fn read(&self, buf: &mut [u8]) -> usize {
        unsafe { (*self.inner).read(buf) }
    }

    fn write(&self, buf: &[u8]) -> usize {
        unsafe { (*self.inner).write(buf) }
    }
}

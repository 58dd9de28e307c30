use alloc::boxed::Box;
use core::fmt;
use memprot::{Access, Mode};
use sbi_spec::binary::SbiRet;
use spin::Mutex;

use crate::platform::PLATFORM;
use crate::riscv::csr::mstatus::PRV_U;
use crate::sbi::domain;
use crate::sbi::trap::TrapFrame;

/// Byte-oriented console device interface.
pub trait ConsoleDevice {
    /// Reads bytes into `buf`, returning how many were available.
    fn read(&self, buf: &mut [u8]) -> usize;
    /// Writes bytes from `buf`, returning how many were accepted.
    fn write(&self, buf: &[u8]) -> usize;
}

/// The registered console, shared by the debug console extension, the
/// legacy console calls and the firmware's own logging.
pub struct SbiConsole {
    inner: Mutex<Box<dyn ConsoleDevice>>,
}

impl SbiConsole {
    #[inline]
    pub fn new(inner: Mutex<Box<dyn ConsoleDevice>>) -> Self {
        Self { inner }
    }

    /// Writes one character; the legacy `console_putchar` call.
    #[inline]
    pub fn putchar(&self, c: usize) -> usize {
        let buf = [c as u8];
        let console = self.inner.lock();
        while console.write(&buf) == 0 {
            core::hint::spin_loop();
        }
        0
    }

    /// Reads one character if available; the legacy `console_getchar`
    /// call returns -1 when the receiver is empty.
    #[inline]
    pub fn getchar(&self) -> usize {
        let mut c = [0u8];
        if self.inner.lock().read(&mut c) == 1 {
            c[0] as usize
        } else {
            usize::MAX
        }
    }

    /// Writes out a supervisor buffer, returning the count transferred.
    fn write_bytes(&self, bytes: &[u8]) -> usize {
        let console = self.inner.lock();
        let mut done = 0;
        while done < bytes.len() {
            let count = console.write(&bytes[done..]);
            if count == 0 {
                break;
            }
            done += count;
        }
        done
    }

    /// Reads into a supervisor buffer, returning the count transferred.
    fn read_bytes(&self, bytes: &mut [u8]) -> usize {
        self.inner.lock().read(bytes)
    }
}

impl fmt::Write for SbiConsole {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Checks a DBCN buffer against the calling domain and returns it as a
/// byte slice. The supplied address is a supervisor physical address.
fn checked_buffer<'a>(
    frame: &TrapFrame,
    base: usize,
    len: usize,
    access: Access,
) -> Result<&'a mut [u8], SbiRet> {
    let mode = if frame.prev_mode() == PRV_U {
        Mode::User
    } else {
        Mode::Supervisor
    };
    if len == 0 {
        return Ok(&mut []);
    }
    if !domain::current_domain_check_range(base, len, mode, access) {
        return Err(SbiRet::invalid_param());
    }
    // The range is inside the calling domain and machine mode keeps full
    // access to domain memory, so a direct mapping is safe here.
    Ok(unsafe { core::slice::from_raw_parts_mut(base as *mut u8, len) })
}

/// SBI DBCN `console_write`.
pub fn console_write(frame: &TrapFrame, num_bytes: usize, base_lo: usize, base_hi: usize) -> SbiRet {
    // Physical addresses above XLEN bits are not reachable from M-mode.
    if base_hi != 0 {
        return SbiRet::failed();
    }
    let Some(console) = (unsafe { PLATFORM.sbi.console.as_ref() }) else {
        return SbiRet::not_supported();
    };
    match checked_buffer(frame, base_lo, num_bytes, Access::Read) {
        Ok(buf) => SbiRet::success(console.write_bytes(buf)),
        Err(e) => e,
    }
}

/// SBI DBCN `console_read`.
pub fn console_read(frame: &TrapFrame, num_bytes: usize, base_lo: usize, base_hi: usize) -> SbiRet {
    if base_hi != 0 {
        return SbiRet::failed();
    }
    let Some(console) = (unsafe { PLATFORM.sbi.console.as_ref() }) else {
        return SbiRet::not_supported();
    };
    match checked_buffer(frame, base_lo, num_bytes, Access::Write) {
        Ok(buf) => SbiRet::success(console.read_bytes(buf)),
        Err(e) => e,
    }
}

/// SBI DBCN `console_write_byte`.
pub fn console_write_byte(byte: usize) -> SbiRet {
    match unsafe { PLATFORM.sbi.console.as_ref() } {
        Some(console) => {
            console.putchar(byte & 0xff);
            SbiRet::success(0)
        }
        None => SbiRet::not_supported(),
    }
}

/// Legacy `console_putchar`.
pub fn putchar(c: usize) -> usize {
    match unsafe { PLATFORM.sbi.console.as_ref() } {
        Some(console) => console.putchar(c),
        None => usize::MAX,
    }
}

/// Legacy `console_getchar`.
pub fn getchar() -> usize {
    match unsafe { PLATFORM.sbi.console.as_ref() } {
        Some(console) => console.getchar(),
        None => usize::MAX,
    }
}

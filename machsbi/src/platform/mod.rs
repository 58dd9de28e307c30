mod clint;
mod console;
mod reset;

use alloc::boxed::Box;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::cfg;
use crate::sbi::Sbi;
use crate::sbi::console::SbiConsole;
use crate::sbi::cppc::SbiCppc;
use crate::sbi::ecall::EcallResult;
use crate::sbi::ipi::SbiIpi;
use crate::sbi::logger;
use crate::sbi::pmu::{EventToCounterMap, RawEventToCounterMap, SbiPmu};
use crate::sbi::reset::SbiReset;
use crate::sbi::suspend::SbiSuspend;
use crate::sbi::trap::TrapFrame;
use self::platform_ecall::EID_PLATFORM_DOMAIN;

pub struct BoardInfo {
    pub memory_range: Option<Range<usize>>,
    pub console: Option<usize>,
    pub reset: Option<usize>,
    pub ipi: Option<usize>,
    pub cpu_num: Option<usize>,
}

impl BoardInfo {
    pub const fn new() -> Self {
        BoardInfo {
            memory_range: None,
            console: None,
            reset: None,
            ipi: None,
            cpu_num: None,
        }
    }
}

pub struct Platform {
    pub info: BoardInfo,
    pub sbi: Sbi,
    pub ready: AtomicBool,
}

impl Platform {
    pub const fn new() -> Self {
        Platform {
            info: BoardInfo::new(),
            sbi: Sbi::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// Builds the device set of the reference platform from the static
    /// board configuration and brings up console logging.
    pub fn init(&mut self) {
        self.info.memory_range = Some(cfg::MEMORY_RANGE_START..cfg::MEMORY_RANGE_END);
        self.info.console = Some(cfg::UART_BASE);
        self.info.ipi = Some(cfg::CLINT_BASE);
        self.info.reset = Some(cfg::TEST_DEVICE_BASE);
        self.info.cpu_num = Some(cfg::NUM_HART_MAX);

        self.sbi_console_init();
        logger::Logger::init().unwrap();
        info!("Starting machine-mode SBI environment.");

        self.sbi_ipi_init();
        self.sbi_reset_init();
        self.sbi_susp_init();
        self.sbi_pmu_init();
        self.sbi_cppc_init();
    }

    /// Publishes the platform to the secondary harts.
    pub fn set_ready(&self) {
        self.ready.swap(true, Ordering::Release);
    }

    fn sbi_console_init(&mut self) {
        self.sbi.console = self.info.console.map(|base| {
            SbiConsole::new(Mutex::new(Box::new(console::Uart16550Wrap::new(base))))
        });
    }

    fn sbi_ipi_init(&mut self) {
        self.sbi.ipi = self.info.ipi.map(|base| {
            SbiIpi::new(
                Mutex::new(Box::new(clint::SifiveClintWrap::new(base))),
                self.info.cpu_num.unwrap_or(cfg::NUM_HART_MAX),
            )
        });
    }

    fn sbi_reset_init(&mut self) {
        self.sbi.reset = self
            .info
            .reset
            .map(|base| SbiReset::new(Mutex::new(Box::new(reset::SifiveTestDeviceWrap::new(base)))));
    }

    fn sbi_susp_init(&mut self) {
        // The test device cannot sleep; suspend degrades to the HSM
        // non-retentive path, which only needs a working IPI device.
        if self.sbi.ipi.is_some() {
            self.sbi.susp = Some(SbiSuspend::new(None));
        }
    }

    fn sbi_pmu_init(&mut self) {
        let mut pmu = SbiPmu::new();
        // Fixed counter bindings of every hart.
        pmu.insert_event_to_mhpmcounter(EventToCounterMap::new(0b001, 0x1, 0x1));
        pmu.insert_event_to_mhpmcounter(EventToCounterMap::new(0b100, 0x2, 0x2));
        // Generic hardware events share the programmable counters.
        pmu.insert_event_to_mhpmcounter(EventToCounterMap::new(0b11000, 0x3, 0xA));
        for event in 0x3..=0xAu32 {
            pmu.insert_event_to_mhpmevent(event, event as u64);
        }
        // Raw selectors go straight into mhpmevent.
        pmu.insert_raw_event_to_mhpmcounter(RawEventToCounterMap::new(0b11000, 0, 0));
        self.sbi.pmu = Some(pmu);
    }

    fn sbi_cppc_init(&mut self) {
        // No performance controller on the reference platform.
        self.sbi.cppc = Option::<SbiCppc>::None;
    }

    pub fn print_board_info(&self) {
        info!("{:<30}: machsbi reference platform", "Platform Name");
        info!(
            "{:<30}: {}",
            "Platform HART Count",
            self.info.cpu_num.unwrap_or(0)
        );
        if let Some(base) = self.info.console {
            info!("{:<30}: Uart16550 (Base Address: 0x{:x})", "Console Device", base);
        }
        if let Some(base) = self.info.ipi {
            info!("{:<30}: SiFive CLINT (Base Address: 0x{:x})", "IPI/Timer Device", base);
        }
        if let Some(base) = self.info.reset {
            info!("{:<30}: SiFive Test (Base Address: 0x{:x})", "Reset Device", base);
        }
        if let Some(range) = &self.info.memory_range {
            info!("{:<30}: 0x{:x} - 0x{:x}", "Memory range", range.start, range.end);
        }
    }
}

#[allow(unused)]
impl Platform {
    pub fn have_console(&self) -> bool {
        self.sbi.console.is_some()
    }

    pub fn have_reset(&self) -> bool {
        self.sbi.reset.is_some()
    }

    pub fn have_ipi(&self) -> bool {
        self.sbi.ipi.is_some()
    }

    pub fn have_pmu(&self) -> bool {
        self.sbi.pmu.is_some()
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

pub(crate) static mut PLATFORM: Platform = Platform::new();

/// Platform vendor extension ids.
pub mod platform_ecall {
    /// Domain management window of the reference platform.
    pub const EID_PLATFORM_DOMAIN: usize = 0x0900_0000;
    /// Enter the domain named in `a0`.
    pub const FID_DOMAIN_ENTER: usize = 0;
    /// Return to the caller domain.
    pub const FID_DOMAIN_EXIT: usize = 1;
}

/// Whether the platform provides a vendor extension handler.
pub fn vendor_ext_available() -> bool {
    true
}

/// Vendor extension provider of the reference platform: domain context
/// switching for supervisor-domain aware guests.
///
/// The caller's saved frame is completed (return values, advanced
/// `mepc`) before the switch, so the call finishes the moment the
/// domain is re-entered.
pub fn vendor_ext_provider(
    extid: usize,
    funcid: usize,
    frame: &mut TrapFrame,
) -> Option<EcallResult> {
    use crate::sbi::domain_context;
    use platform_ecall::{FID_DOMAIN_ENTER, FID_DOMAIN_EXIT};
    use sbi_spec::binary::SbiRet;

    if extid != EID_PLATFORM_DOMAIN {
        return None;
    }

    match funcid {
        FID_DOMAIN_ENTER => {
            let target = frame.a0;
            let pre_mepc = frame.mepc;
            frame.a0 = 0;
            frame.a1 = 0;
            frame.mepc = frame.mepc.wrapping_add(4);
            let ret = domain_context::context_enter(frame, target);
            if ret.is_ok() {
                Some(EcallResult::skip())
            } else {
                frame.mepc = pre_mepc;
                Some(ret.into())
            }
        }
        FID_DOMAIN_EXIT => {
            let pre_mepc = frame.mepc;
            frame.a0 = 0;
            frame.a1 = 0;
            frame.mepc = frame.mepc.wrapping_add(4);
            let ret = domain_context::context_exit(frame);
            if ret.is_ok() {
                Some(EcallResult::skip())
            } else {
                frame.mepc = pre_mepc;
                Some(ret.into())
            }
        }
        _ => Some(SbiRet::not_supported().into()),
    }
}

use core::sync::atomic::{AtomicU8, Ordering};

use riscv::register::mstatus;

use crate::sbi::dbtr::DbtrState;
use crate::sbi::features::HartFeatures;
use crate::sbi::fwft::FwftState;
use crate::sbi::hsm::HsmCell;
use crate::sbi::mpxy::MpxyShmem;
use crate::sbi::pmu::PmuState;
use crate::sbi::rfence::RFenceCell;
use crate::sbi::sse::SseLocalState;
use crate::sbi::timer::TimerState;

/// Per-hart firmware state, carved from the bottom of the hart's stack.
///
/// Every subsystem that needs a per-hart slot owns a typed field here;
/// slots are initialized once on the hart's first pass through boot and
/// reset selectively on non-retentive resume.
pub(crate) struct HartContext {
    /// Hart state management cell containing next stage boot info.
    pub hsm: HsmCell<NextStage>,
    /// Remote fence synchronization cell.
    pub rfence: RFenceCell,
    /// Pending inter-processor event bits.
    pub ipi_type: AtomicU8,
    /// Detected hart features.
    pub features: HartFeatures,
    /// Performance monitoring state.
    pub pmu_state: PmuState,
    /// Timer broker state, including the supervisor time delta.
    pub timer: TimerState,
    /// Firmware feature (FWFT) per-hart configuration.
    pub fwft: FwftState,
    /// Software event (SSE) per-hart state.
    pub sse: SseLocalState,
    /// Message proxy shared-memory window.
    pub mpxy: MpxyShmem,
    /// Debug trigger state.
    pub dbtr: DbtrState,
}

impl HartContext {
    /// Initialize the hart context on first boot.
    #[inline]
    pub fn init(&mut self) {
        self.hsm = HsmCell::new();
        self.rfence = RFenceCell::new();
        self.ipi_type.store(0, Ordering::Relaxed);
        self.timer = TimerState::new();
        self.fwft = FwftState::new();
        self.sse = SseLocalState::new();
        self.mpxy = MpxyShmem::new();
        self.dbtr = DbtrState::new();
        self.pmu_state = PmuState::new();
    }

    /// Drop transient state before a non-retentive resume.
    #[inline]
    pub fn reset(&mut self) {
        self.ipi_type.store(0, Ordering::Relaxed);
        self.rfence = RFenceCell::new();
        self.pmu_state = PmuState::new();
        self.sse = SseLocalState::new();
        self.mpxy = MpxyShmem::new();
    }
}

/// Information needed to boot into the next execution stage.
#[derive(Debug)]
pub struct NextStage {
    /// Starting address to jump to.
    pub start_addr: usize,
    /// Opaque value passed to next stage.
    pub opaque: usize,
    /// Privilege mode for next stage.
    pub next_mode: mstatus::MPP,
}

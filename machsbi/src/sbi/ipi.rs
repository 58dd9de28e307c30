use alloc::boxed::Box;
use core::sync::atomic::Ordering;
use hartmask::HartMask;
use sbi_spec::binary::SbiRet;
use spin::Mutex;

use crate::cfg::NUM_HART_MAX;
use crate::platform::PLATFORM;
use crate::riscv::{current_hartid, current_hartindex, hartid_to_hartindex, hartindex_to_hartid};
use crate::sbi::domain;
use crate::sbi::hsm::remote_hsm;
use crate::sbi::pmu::pmu_firmware_counter_increment;
use crate::sbi::rfence::{self, RFenceContext};
use crate::sbi::trap::handler::halt;
use crate::sbi::trap_stack::hart_context;
use sbi_spec::pmu::firmware_event;

/// IPI type for supervisor software interrupt.
pub(crate) const IPI_TYPE_SSOFT: u8 = 1 << 0;
/// IPI type for memory fence operations.
pub(crate) const IPI_TYPE_FENCE: u8 = 1 << 1;
/// IPI type for halting the target hart before a reset.
pub(crate) const IPI_TYPE_HALT: u8 = 1 << 2;
/// IPI type for injecting a pending software event.
pub(crate) const IPI_TYPE_SSE: u8 = 1 << 3;

/// Trait defining interface for inter-processor interrupt device.
#[allow(unused)]
pub trait IpiDevice {
    /// Read machine time value.
    fn read_mtime(&self) -> u64;
    /// Write machine time value.
    fn write_mtime(&self, val: u64);
    /// Read machine timer compare value for given hart.
    fn read_mtimecmp(&self, hart_idx: usize) -> u64;
    /// Write machine timer compare value for given hart.
    fn write_mtimecmp(&self, hart_idx: usize, val: u64);
    /// Read machine software interrupt pending bit for given hart.
    fn read_msip(&self, hart_idx: usize) -> bool;
    /// Set machine software interrupt pending bit for given hart.
    fn set_msip(&self, hart_idx: usize);
    /// Clear machine software interrupt pending bit for given hart.
    fn clear_msip(&self, hart_idx: usize);
}

/// SBI IPI fan-out over the platform's IPI device.
pub struct SbiIpi {
    /// The hardware IPI and timer device.
    pub ipi_dev: Mutex<Box<dyn IpiDevice>>,
    /// Number of harts wired to the device.
    pub max_hart_id: usize,
}

impl SbiIpi {
    #[inline]
    pub fn new(ipi_dev: Mutex<Box<dyn IpiDevice>>, max_hart_id: usize) -> Self {
        Self {
            ipi_dev,
            max_hart_id,
        }
    }

    /// SBI `send_ipi`: raise a supervisor software interrupt on every
    /// targeted hart of the caller's domain. Fire and forget.
    pub fn send_ipi(&self, hmask: usize, hbase: usize) -> SbiRet {
        pmu_firmware_counter_increment(firmware_event::IPI_SENT);
        let targets = match self.validate_mask(hmask, hbase) {
            Ok(mask) => mask,
            Err(e) => return e,
        };

        for hart_index in targets.iter() {
            let hartid = hartindex_to_hartid(hart_index);
            if set_ipi_type(hartid, IPI_TYPE_SSOFT) == 0 {
                self.set_msip(hartid);
            }
        }
        SbiRet::success(0)
    }

    /// Publishes a fence descriptor to every targeted hart, kicks them,
    /// and waits until each one has executed the fence.
    ///
    /// The descriptor is enqueued (release, under the queue lock) before
    /// the event bit is set, so a receiver that observes the bit also
    /// observes the payload.
    pub fn send_fence(&self, hmask: usize, hbase: usize, ctx: RFenceContext) -> SbiRet {
        let current_hart = current_hartid();
        let targets = match self.validate_mask(hmask, hbase) {
            Ok(mask) => mask,
            Err(e) => return e,
        };

        for hart_index in targets.iter() {
            let hartid = hartindex_to_hartid(hart_index);
            let Some(remote) = rfence::remote_rfence(hart_index) else {
                continue;
            };
            rfence::local_rfence().unwrap().add();
            remote.set(ctx);
            if hartid != current_hart {
                if set_ipi_type(hartid, IPI_TYPE_FENCE) == 0 {
                    self.set_msip(hartid);
                }
            }
        }

        // The source helps drain, including its own queue, until every
        // destination has signalled completion.
        while !rfence::local_rfence().unwrap().is_sync() {
            rfence::rfence_single_handler();
        }

        SbiRet::success(0)
    }

    /// Broadcasts the halt event to every other hart; used on the way
    /// into system reset and shutdown.
    pub fn send_halt_to_others(&self) {
        let current_hart = current_hartid();
        for hart_index in 0..self.max_hart_id.min(NUM_HART_MAX) {
            let hartid = hartindex_to_hartid(hart_index);
            if hartid == current_hart {
                continue;
            }
            let Some(remote) = remote_hsm(hartid) else {
                continue;
            };
            if !remote.allow_ipi() {
                continue;
            }
            if set_ipi_type(hartid, IPI_TYPE_HALT) == 0 {
                self.set_msip(hartid);
            }
        }
    }

    /// Resolves the SBI `(mask, base)` pair against the platform and the
    /// caller's domain.
    ///
    /// Mask bits beyond the platform's harts are ignored, not rejected:
    /// the legacy calls hand in all-ones masks to mean "every hart". A
    /// hart that is not runnable in the caller's domain, or cannot take
    /// an IPI right now, is silently skipped.
    fn validate_mask(&self, hmask: usize, hbase: usize) -> Result<HartMask, SbiRet> {
        let hart_count = self.max_hart_id.min(NUM_HART_MAX);
        let mut targets = HartMask::from_mask_base(hmask, hbase);
        targets.and(&domain::current_domain_hart_mask());
        let mut filtered = HartMask::new();
        for hart_index in targets.iter() {
            if hart_index >= hart_count {
                continue;
            }
            let hartid = hartindex_to_hartid(hart_index);
            // Harts currently bound to another domain are invisible.
            if !domain::current_domain_can_run(hartid) {
                continue;
            }
            match remote_hsm(hartid) {
                Some(remote) if remote.allow_ipi() => filtered.set(hart_index),
                _ => (),
            }
        }
        Ok(filtered)
    }

    /// Get lower 64 bits of machine time.
    #[inline]
    pub fn get_time(&self) -> u64 {
        self.ipi_dev.lock().read_mtime()
    }

    /// Set machine software interrupt pending for hart.
    #[inline]
    pub fn set_msip(&self, hartid: usize) {
        self.ipi_dev.lock().set_msip(hartid_to_hartindex(hartid));
    }

    /// Clear machine software interrupt pending for hart.
    #[inline]
    pub fn clear_msip(&self, hartid: usize) {
        self.ipi_dev.lock().clear_msip(hartid_to_hartindex(hartid));
    }

    /// Write machine timer compare value for hart.
    #[inline]
    pub fn write_mtimecmp(&self, hartid: usize, val: u64) {
        self.ipi_dev
            .lock()
            .write_mtimecmp(hartid_to_hartindex(hartid), val);
    }

    /// Clear all pending interrupts for current hart.
    #[inline]
    pub fn clear(&self) {
        let hartid = current_hartid();
        let ipi_dev = self.ipi_dev.lock();
        ipi_dev.clear_msip(hartid_to_hartindex(hartid));
        ipi_dev.write_mtimecmp(hartid_to_hartindex(hartid), u64::MAX);
    }
}

/// Set IPI event bits for the specified hart, returning the old word.
pub fn set_ipi_type(hartid: usize, event_id: u8) -> u8 {
    hart_context(hartid_to_hartindex(hartid))
        .ipi_type
        .fetch_or(event_id, Ordering::Release)
}

/// Get and reset the IPI event word for the current hart.
pub fn get_and_reset_ipi_type() -> u8 {
    hart_context(current_hartindex())
        .ipi_type
        .swap(0, Ordering::Acquire)
}

/// Clear machine software interrupt pending for current hart.
#[inline]
pub fn clear_msip() {
    match unsafe { PLATFORM.sbi.ipi.as_ref() } {
        Some(ipi) => ipi.clear_msip(current_hartid()),
        None => error!("SBI or IPI device not initialized"),
    }
}

/// Clear the supervisor software interrupt of the current hart; serves
/// the legacy `clear_ipi` call.
#[inline]
pub fn clear_smode() {
    unsafe {
        riscv::register::mip::clear_ssoft();
    }
}

/// Clear all pending interrupts for current hart.
#[inline]
pub fn clear_all() {
    match unsafe { PLATFORM.sbi.ipi.as_ref() } {
        Some(ipi) => ipi.clear(),
        None => error!("SBI or IPI device not initialized"),
    }
}

/// Drains pending IPI events outside the trap path (suspend wake-up).
///
/// A pending software-event injection cannot be delivered without a trap
/// frame, so its bit is put back and MSIP re-raised; the injection then
/// happens through the regular trap path right after the caller returns
/// to supervisor mode.
pub fn drain_pending_events() {
    let ipi_type = get_and_reset_ipi_type();
    if ipi_type & IPI_TYPE_SSOFT != 0 {
        unsafe {
            riscv::register::mip::set_ssoft();
        }
    }
    if ipi_type & IPI_TYPE_FENCE != 0 {
        rfence::rfence_handler();
    }
    if ipi_type & IPI_TYPE_HALT != 0 {
        halt();
    }
    if ipi_type & IPI_TYPE_SSE != 0 {
        let hartid = current_hartid();
        set_ipi_type(hartid, IPI_TYPE_SSE);
        if let Some(ipi) = unsafe { PLATFORM.sbi.ipi.as_ref() } {
            ipi.set_msip(hartid);
        }
    }
}

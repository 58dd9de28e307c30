use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    sync::atomic::{AtomicUsize, Ordering},
};
use riscv::register::mstatus::MPP;
use sbi_spec::binary::SbiRet;
use sbi_spec::hsm::hart_state;

use crate::platform::PLATFORM;
use crate::riscv::{current_hartid, current_hartindex, hartid_to_hartindex};
use crate::sbi::domain;
use crate::sbi::hart_context::NextStage;
use crate::sbi::trap::boot::boot;
use crate::sbi::trap_stack::{hart_context_mut, try_hart_context};

/// Special state indicating a hart is in the process of starting.
const HART_STATE_START_PENDING_EXT: usize = usize::MAX;

type HsmState = AtomicUsize;

/// Cell for managing hart state and shared data between harts.
///
/// The state word is the per-hart state machine; the inner option carries
/// the next-stage payload from the starting hart to the started one.
pub(crate) struct HsmCell<T> {
    status: HsmState,
    inner: UnsafeCell<Option<T>>,
}

impl<T> HsmCell<T> {
    /// Creates a new HsmCell with STOPPED state and no inner data.
    pub const fn new() -> Self {
        Self {
            status: HsmState::new(hart_state::STOPPED),
            inner: UnsafeCell::new(None),
        }
    }

    /// Gets a local view of this cell for the current hart.
    ///
    /// # Safety
    ///
    /// Caller must ensure this cell belongs to the current hart.
    #[inline]
    pub unsafe fn local(&self) -> LocalHsmCell<'_, T> {
        LocalHsmCell(self)
    }

    /// Gets a remote view of this cell for accessing from other harts.
    #[inline]
    pub fn remote(&self) -> RemoteHsmCell<'_, T> {
        RemoteHsmCell(self)
    }
}

/// View of HsmCell for operations on the current hart.
pub struct LocalHsmCell<'a, T>(&'a HsmCell<T>);

/// View of HsmCell for operations from other harts.
pub struct RemoteHsmCell<'a, T>(&'a HsmCell<T>);

unsafe impl<T: Send> Sync for HsmCell<T> {}
unsafe impl<T: Send> Send for HsmCell<T> {}

impl<T> LocalHsmCell<'_, T> {
    /// Attempts to transition this hart from START_PENDING to STARTED.
    ///
    /// Returns the start payload on success, otherwise the current state.
    #[inline]
    pub fn start(&self) -> Result<T, usize> {
        loop {
            match self.0.status.compare_exchange(
                hart_state::START_PENDING,
                hart_state::STARTED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break Ok(unsafe { (*self.0.inner.get()).take().unwrap() }),
                Err(HART_STATE_START_PENDING_EXT) => spin_loop(),
                Err(s) => break Err(s),
            }
        }
    }

    /// Transitions this hart to STOPPED, through STOP_PENDING.
    #[inline]
    pub fn stop(&self) {
        self.0
            .status
            .store(hart_state::STOP_PENDING, Ordering::Relaxed);
        self.0.status.store(hart_state::STOPPED, Ordering::Release)
    }

    /// Transitions this hart to SUSPENDED, through SUSPEND_PENDING.
    #[inline]
    pub fn suspend(&self) {
        self.0
            .status
            .store(hart_state::SUSPEND_PENDING, Ordering::Relaxed);
        self.0
            .status
            .store(hart_state::SUSPENDED, Ordering::Release)
    }

    /// Transitions this hart back to STARTED after a retentive resume.
    #[inline]
    pub fn resume(&self) {
        self.0
            .status
            .store(hart_state::RESUME_PENDING, Ordering::Relaxed);
        self.0.status.store(hart_state::STARTED, Ordering::Release)
    }
}

impl<T: core::fmt::Debug> RemoteHsmCell<'_, T> {
    /// Attempts to start a stopped hart by providing startup data.
    ///
    /// Returns true if successful, false if hart was not STOPPED.
    #[inline]
    pub fn start(&self, t: T) -> bool {
        if self
            .0
            .status
            .compare_exchange(
                hart_state::STOPPED,
                HART_STATE_START_PENDING_EXT,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            unsafe { *self.0.inner.get() = Some(t) };
            self.0
                .status
                .store(hart_state::START_PENDING, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Attempts to resume a suspended hart by providing resume data.
    ///
    /// Returns true if successful, false if hart was not SUSPENDED.
    #[inline]
    pub fn resume(&self, t: T) -> bool {
        if self
            .0
            .status
            .compare_exchange(
                hart_state::SUSPENDED,
                HART_STATE_START_PENDING_EXT,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            unsafe { *self.0.inner.get() = Some(t) };
            self.0
                .status
                .store(hart_state::START_PENDING, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Gets the current state of the hart.
    #[inline]
    pub fn get_status(&self) -> usize {
        match self.0.status.load(Ordering::Relaxed) {
            HART_STATE_START_PENDING_EXT => hart_state::START_PENDING,
            normal => normal,
        }
    }

    /// Checks if hart can receive IPIs (must be STARTED or SUSPENDED).
    #[inline]
    pub fn allow_ipi(&self) -> bool {
        matches!(
            self.0.status.load(Ordering::Relaxed),
            hart_state::STARTED | hart_state::SUSPENDED
        )
    }
}

/// Gets the local HSM cell for the current hart.
pub(crate) fn local_hsm() -> LocalHsmCell<'static, NextStage> {
    unsafe { try_hart_context(current_hartindex()).unwrap().hsm.local() }
}

/// Gets a remote view of the current hart's HSM cell.
pub(crate) fn local_remote_hsm() -> RemoteHsmCell<'static, NextStage> {
    try_hart_context(current_hartindex()).unwrap().hsm.remote()
}

/// Gets a remote view of any hart's HSM cell.
pub(crate) fn remote_hsm(hart_id: usize) -> Option<RemoteHsmCell<'static, NextStage>> {
    try_hart_context(hartid_to_hartindex(hart_id)).map(|ctx| ctx.hsm.remote())
}

/// SBI HSM hart_start: queue a start request and kick the target.
///
/// Only valid from STOPPED, only for harts the caller's domain may run.
pub fn hart_start(hartid: usize, start_addr: usize, opaque: usize) -> SbiRet {
    if !domain::current_domain_can_run(hartid) {
        return SbiRet::invalid_param();
    }
    match remote_hsm(hartid) {
        Some(remote) => {
            if remote.start(NextStage {
                start_addr,
                opaque,
                next_mode: MPP::Supervisor,
            }) {
                unsafe {
                    PLATFORM.sbi.ipi.as_ref().unwrap().set_msip(hartid);
                }
                SbiRet::success(0)
            } else {
                match remote.get_status() {
                    hart_state::STARTED => SbiRet::already_available(),
                    _ => SbiRet::invalid_state(),
                }
            }
        }
        None => SbiRet::invalid_param(),
    }
}

/// SBI HSM hart_stop: never returns; the hart parks in the stop-wait
/// loop until the next start request.
pub fn hart_stop() -> ! {
    local_hsm().stop();
    unsafe {
        riscv::register::mie::clear_msoft();
        boot();
    }
}

/// SBI HSM hart_get_status, evaluated in the caller's domain view.
pub fn hart_get_status(hartid: usize) -> SbiRet {
    if !domain::current_domain_can_run(hartid) {
        return SbiRet::invalid_param();
    }
    match remote_hsm(hartid) {
        Some(remote) => SbiRet::success(remote.get_status()),
        None => SbiRet::invalid_param(),
    }
}

/// SBI HSM hart_suspend.
///
/// Retentive suspend parks the hart in place with WFI; non-retentive
/// suspend flushes the hart context and re-enters through the boot path
/// at `resume_addr`.
pub fn hart_suspend(suspend_type: u32, resume_addr: usize, opaque: usize) -> SbiRet {
    use sbi_spec::hsm::suspend_type::{NON_RETENTIVE, RETENTIVE};

    if !matches!(suspend_type, NON_RETENTIVE | RETENTIVE) {
        return SbiRet::invalid_param();
    }

    local_hsm().suspend();
    unsafe {
        PLATFORM
            .sbi
            .ipi
            .as_ref()
            .unwrap()
            .clear_msip(current_hartid());
        riscv::register::mie::set_msoft();
    }
    riscv::asm::wfi();

    match suspend_type {
        RETENTIVE => {
            local_hsm().resume();
            // Service whatever woke the hart before returning to S-mode.
            crate::sbi::ipi::drain_pending_events();
            SbiRet::success(0)
        }
        NON_RETENTIVE => hart_resume(current_hartid(), resume_addr, opaque),
        _ => SbiRet::invalid_param(),
    }
}

/// Non-retentive resume: reset the hart-local context and re-enter the
/// boot funnel at the caller-provided address.
fn hart_resume(hartid: usize, resume_addr: usize, opaque: usize) -> SbiRet {
    match remote_hsm(hartid) {
        Some(remote) => {
            if remote.resume(NextStage {
                start_addr: resume_addr,
                opaque,
                next_mode: MPP::Supervisor,
            }) {
                hart_context_mut(hartid_to_hartindex(hartid)).reset();
                unsafe {
                    boot();
                }
            } else {
                SbiRet::failed()
            }
        }
        None => SbiRet::failed(),
    }
}

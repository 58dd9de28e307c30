use alloc::boxed::Box;
use core::sync::atomic::{Ordering, fence};
use sbi_spec::binary::SbiRet;

use crate::riscv::csr::*;
use crate::riscv::current_hartindex;
use crate::sbi::domain::{self, Domain};
use crate::sbi::early_trap::csr_swap;
use crate::sbi::hsm;
use crate::sbi::trap::TrapFrame;

/// Saved supervisor execution state of one `(hart, domain)` pair.
///
/// Exactly one context per hart is live at any instant; the others hold
/// the S-mode CSR image and trap frame their domain last ran with. The
/// `prev` field forms the caller chain for nested enters.
#[derive(Default)]
pub struct DomainContext {
    sstatus: usize,
    sie: usize,
    stvec: usize,
    sscratch: usize,
    sepc: usize,
    scause: usize,
    stval: usize,
    sip: usize,
    satp: usize,
    scounteren: usize,
    senvcfg: usize,
    regs: TrapFrame,
    prev: Option<usize>,
    initialized: bool,
}

/// Makes sure `dom` has a context slot allocated for the current hart.
fn ensure_context(dom: &'static Domain) -> bool {
    let hart_index = current_hartindex();
    if !dom.possible_harts.test(hart_index) {
        return false;
    }
    let mut slot = dom.contexts[hart_index].lock();
    if slot.is_none() {
        *slot = Some(Box::new(DomainContext::default()));
    }
    true
}

/// Switches the current hart from `cur` to `next`.
///
/// Saves the live supervisor CSRs and the trap frame into `cur`'s
/// context, restores `next`'s, and reassigns the hart. When `next` has
/// never run here, the boot hart synthesizes a cold entry into the
/// domain and any other hart parks in the stop-wait loop.
fn switch_context(frame: &mut TrapFrame, cur: &'static Domain, next: &'static Domain) {
    let hart_index = current_hartindex();

    // Membership and PMP first: from here on the hart sees `next`'s
    // memory.
    domain::assign_current_hart(next);
    crate::sbi::pmp::disable_all();
    domain::pmp_configure_current_hart();

    let mut cur_slot = cur.contexts[hart_index].lock();
    let mut next_slot = next.contexts[hart_index].lock();
    let cur_ctx = cur_slot.as_mut().expect("current domain context missing");
    let next_ctx = next_slot.as_mut().expect("next domain context missing");

    unsafe {
        cur_ctx.sstatus = csr_swap::<CSR_SSTATUS>(next_ctx.sstatus);
        cur_ctx.sie = csr_swap::<CSR_SIE>(next_ctx.sie);
        cur_ctx.stvec = csr_swap::<CSR_STVEC>(next_ctx.stvec);
        cur_ctx.sscratch = csr_swap::<CSR_SSCRATCH>(next_ctx.sscratch);
        cur_ctx.sepc = csr_swap::<CSR_SEPC>(next_ctx.sepc);
        cur_ctx.scause = csr_swap::<CSR_SCAUSE>(next_ctx.scause);
        cur_ctx.stval = csr_swap::<CSR_STVAL>(next_ctx.stval);
        cur_ctx.sip = csr_swap::<CSR_SIP>(next_ctx.sip);
        cur_ctx.satp = csr_swap::<CSR_SATP>(next_ctx.satp);
        cur_ctx.scounteren = csr_swap::<CSR_SCOUNTEREN>(next_ctx.scounteren);
        cur_ctx.senvcfg = csr_swap::<CSR_SENVCFG>(next_ctx.senvcfg);
    }

    // All supervisor state changes become visible before the frames
    // move.
    fence(Ordering::SeqCst);

    cur_ctx.regs = *frame;
    *frame = next_ctx.regs;
    cur_ctx.initialized = true;

    if !next_ctx.initialized {
        drop(next_slot);
        drop(cur_slot);
        if crate::riscv::current_hartid() == next.boot_hartid {
            // First entry: synthesize the cold entry the domain was
            // configured with.
            let mut mstatus_val: usize;
            unsafe {
                core::arch::asm!("csrr {}, mstatus", out(reg) mstatus_val, options(nomem));
            }
            mstatus_val = (mstatus_val & !mstatus::MPP_MASK)
                | ((next.next_mode as usize) << mstatus::MPP_SHIFT);
            mstatus_val |= mstatus::MPIE;
            *frame = TrapFrame::default();
            frame.mstatus = mstatus_val;
            frame.mepc = next.next_addr;
            frame.a0 = crate::riscv::current_hartid();
            frame.a1 = next.next_arg1;
        } else {
            // Not this domain's boot hart: wait for an explicit start.
            hsm::hart_stop();
        }
    }
}

/// Enters a target domain on the current hart.
pub fn context_enter(frame: &mut TrapFrame, dom_index: usize) -> SbiRet {
    let cur = domain::current_domain();
    let Some(next) = domain::get(dom_index) else {
        return SbiRet::invalid_param();
    };
    if next.index == cur.index {
        return SbiRet::invalid_param();
    }
    if !ensure_context(cur) || !ensure_context(next) {
        return SbiRet::denied();
    }

    {
        let hart_index = current_hartindex();
        let mut slot = next.contexts[hart_index].lock();
        slot.as_mut().unwrap().prev = Some(cur.index);
    }

    switch_context(frame, cur, next);
    SbiRet::success(0)
}

/// Leaves the current domain, returning to the caller that entered it.
///
/// Without a recorded caller the hart first offers itself to a not yet
/// started sibling domain, and otherwise falls back to the root domain.
pub fn context_exit(frame: &mut TrapFrame) -> SbiRet {
    let hart_index = current_hartindex();
    let cur = domain::current_domain();

    // First exit on this hart: materialize contexts for every domain
    // that may run here.
    for dom in domain::domains() {
        ensure_context(*dom);
    }
    if !ensure_context(cur) {
        return SbiRet::denied();
    }

    let prev = cur.contexts[hart_index].lock().as_mut().unwrap().prev.take();

    let next = match prev {
        Some(index) => domain::get(index),
        None => {
            // Prefer an uninitialized sibling, then the root domain.
            let sibling = domain::domains().iter().copied().find(|dom| {
                dom.index != 0
                    && dom.index != cur.index
                    && dom.possible_harts.test(hart_index)
                    && dom.contexts[hart_index]
                        .lock()
                        .as_ref()
                        .map(|ctx| !ctx.initialized)
                        .unwrap_or(false)
            });
            sibling.or_else(|| domain::get(0))
        }
    };

    match next {
        Some(next) if next.index != cur.index => {
            switch_context(frame, cur, next);
            SbiRet::success(0)
        }
        _ => SbiRet::invalid_state(),
    }
}

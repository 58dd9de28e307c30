use memprot::{Access, Mode};
use sbi_spec::binary::SbiRet;

use crate::riscv::csr::mstatus::{SIE, SPP};
use crate::riscv::{current_hartid, hartid_to_hartindex};
use crate::sbi::domain::{self, Domain};
use crate::sbi::domain_data::{self, DataHandle, DomainData};
use crate::sbi::ipi;
use crate::sbi::trap::TrapFrame;
use crate::sbi::trap_stack::{hart_context_mut, try_hart_context};
use spin::{Mutex, Once};

/// Software event identifiers served by this firmware.
pub mod event_id {
    /// Local double trap event.
    pub const LOCAL_DOUBLE_TRAP: usize = 0x0000_0001;
    /// Local software-injected event.
    pub const LOCAL_SOFTWARE: usize = 0xffff_0000;
    /// Global software-injected event, one instance per domain.
    pub const GLOBAL_SOFTWARE: usize = 0xffff_8000;

    pub const GLOBAL_BIT: usize = 0x0000_8000;
}

/// Software event attribute ids.
pub mod attr {
    pub const STATUS: usize = 0;
    pub const PRIO: usize = 1;
    pub const CONFIG: usize = 2;
    pub const PREFERRED_HART: usize = 3;
    pub const ENTRY_PC: usize = 4;
    pub const ENTRY_ARG: usize = 5;
    pub const INTERRUPTED_SEPC: usize = 6;
    pub const INTERRUPTED_FLAGS: usize = 7;
    pub const INTERRUPTED_A6: usize = 8;
    pub const INTERRUPTED_A7: usize = 9;
}

/// Event lifecycle states.
mod status {
    pub const UNUSED: usize = 0;
    pub const REGISTERED: usize = 1;
    pub const ENABLED: usize = 2;
    pub const RUNNING: usize = 3;
}

/// Interrupted-state flag bits, mirrored from the saved `mstatus`.
mod interrupted_flags {
    pub const SPP: usize = 1 << 0;
    pub const SPIE: usize = 1 << 2;
}

/// One software event instance.
#[derive(Clone, Copy)]
pub struct SseEvent {
    pub event_id: usize,
    status: usize,
    prio: usize,
    entry_pc: usize,
    entry_arg: usize,
    pending: bool,
    saved_sepc: usize,
    saved_flags: usize,
    saved_a6: usize,
    saved_a7: usize,
}

impl SseEvent {
    pub const fn new(event_id: usize) -> Self {
        Self {
            event_id,
            status: status::UNUSED,
            prio: 0,
            entry_pc: 0,
            entry_arg: 0,
            pending: false,
            saved_sepc: 0,
            saved_flags: 0,
            saved_a6: 0,
            saved_a7: 0,
        }
    }
}

/// Per-hart software event state: the local events plus the hart mask
/// state machine.
pub struct SseLocalState {
    events: [SseEvent; 2],
    masked: bool,
}

impl SseLocalState {
    pub const fn new() -> Self {
        Self {
            events: [
                SseEvent::new(event_id::LOCAL_DOUBLE_TRAP),
                SseEvent::new(event_id::LOCAL_SOFTWARE),
            ],
            masked: false,
        }
    }
}

/// Per-domain global software event, allocated through the domain data
/// framework so every domain owns an independent instance.
struct SseGlobalState {
    event: Mutex<SseEvent>,
    /// Hart the event is routed to.
    preferred_hart: Mutex<usize>,
}

static GLOBAL_HANDLE: Once<DataHandle> = Once::new();

static GLOBAL_DATA: DomainData = DomainData {
    size: core::mem::size_of::<SseGlobalState>(),
    setup: Some(global_setup),
    cleanup: None,
};

fn global_setup(dom: &'static Domain, ptr: *mut u8) {
    let state = ptr as *mut SseGlobalState;
    unsafe {
        state.write(SseGlobalState {
            event: Mutex::new(SseEvent::new(event_id::GLOBAL_SOFTWARE)),
            preferred_hart: Mutex::new(dom.boot_hartid),
        });
    }
}

/// Registers the per-domain global event storage. Cold boot only.
pub fn init() {
    let handle = domain_data::register(&GLOBAL_DATA).expect("sse domain data registration");
    GLOBAL_HANDLE.call_once(|| handle);
}

fn global_state(dom: &'static Domain) -> Option<&'static SseGlobalState> {
    let handle = *GLOBAL_HANDLE.get()?;
    domain_data::data_ptr(dom, handle).map(|ptr| unsafe { &*(ptr as *const SseGlobalState) })
}

fn is_global(event: usize) -> bool {
    event & event_id::GLOBAL_BIT != 0
}

/// Runs `f` on the named event of the current hart's view.
fn with_event<R>(event: usize, f: impl FnOnce(&mut SseEvent) -> R) -> Option<R> {
    if is_global(event) {
        if event != event_id::GLOBAL_SOFTWARE {
            return None;
        }
        let state = global_state(domain::current_domain())?;
        let mut guard = state.event.lock();
        Some(f(&mut guard))
    } else {
        let local = &mut hart_context_mut(crate::riscv::current_hartindex()).sse;
        local
            .events
            .iter_mut()
            .find(|e| e.event_id == event)
            .map(f)
    }
}

/// SBI SSE `read_attrs`: copies attribute values into supervisor memory.
pub fn read_attrs(
    frame: &TrapFrame,
    event: usize,
    base_attr_id: usize,
    attr_count: usize,
    out_lo: usize,
    out_hi: usize,
) -> SbiRet {
    if out_hi != 0 || attr_count == 0 {
        return SbiRet::invalid_param();
    }
    let len = attr_count * core::mem::size_of::<usize>();
    let mode = prev_mode(frame);
    if !domain::current_domain_check_range(out_lo, len, mode, Access::Write) {
        return SbiRet::invalid_address();
    }
    let result = with_event(event, |e| {
        for i in 0..attr_count {
            let value = match base_attr_id + i {
                attr::STATUS => e.status | ((e.pending as usize) << 2),
                attr::PRIO => e.prio,
                attr::CONFIG => 0,
                attr::PREFERRED_HART => current_hartid(),
                attr::ENTRY_PC => e.entry_pc,
                attr::ENTRY_ARG => e.entry_arg,
                attr::INTERRUPTED_SEPC => e.saved_sepc,
                attr::INTERRUPTED_FLAGS => e.saved_flags,
                attr::INTERRUPTED_A6 => e.saved_a6,
                attr::INTERRUPTED_A7 => e.saved_a7,
                _ => return SbiRet::bad_range(),
            };
            unsafe {
                ((out_lo + i * core::mem::size_of::<usize>()) as *mut usize).write(value);
            }
        }
        SbiRet::success(0)
    });
    result.unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `write_attrs`: only the priority attribute is writable here.
pub fn write_attrs(
    frame: &TrapFrame,
    event: usize,
    base_attr_id: usize,
    attr_count: usize,
    in_lo: usize,
    in_hi: usize,
) -> SbiRet {
    if in_hi != 0 || attr_count == 0 {
        return SbiRet::invalid_param();
    }
    let len = attr_count * core::mem::size_of::<usize>();
    let mode = prev_mode(frame);
    if !domain::current_domain_check_range(in_lo, len, mode, Access::Read) {
        return SbiRet::invalid_address();
    }
    let result = with_event(event, |e| {
        for i in 0..attr_count {
            let value = unsafe { ((in_lo + i * core::mem::size_of::<usize>()) as *const usize).read() };
            match base_attr_id + i {
                attr::PRIO => {
                    if e.status != status::UNUSED && e.status != status::REGISTERED {
                        return SbiRet::invalid_state();
                    }
                    e.prio = value;
                }
                attr::CONFIG => (),
                attr::STATUS
                | attr::PREFERRED_HART
                | attr::ENTRY_PC
                | attr::ENTRY_ARG
                | attr::INTERRUPTED_SEPC
                | attr::INTERRUPTED_FLAGS
                | attr::INTERRUPTED_A6
                | attr::INTERRUPTED_A7 => return SbiRet::denied(),
                _ => return SbiRet::bad_range(),
            }
        }
        SbiRet::success(0)
    });
    result.unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `register`.
pub fn register(event: usize, entry_pc: usize, entry_arg: usize) -> SbiRet {
    if entry_pc & 1 != 0 {
        return SbiRet::invalid_param();
    }
    with_event(event, |e| {
        if e.status != status::UNUSED {
            return SbiRet::invalid_state();
        }
        e.entry_pc = entry_pc;
        e.entry_arg = entry_arg;
        e.status = status::REGISTERED;
        SbiRet::success(0)
    })
    .unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `unregister`.
pub fn unregister(event: usize) -> SbiRet {
    with_event(event, |e| {
        if e.status != status::REGISTERED {
            return SbiRet::invalid_state();
        }
        *e = SseEvent::new(e.event_id);
        SbiRet::success(0)
    })
    .unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `enable`.
pub fn enable(event: usize) -> SbiRet {
    with_event(event, |e| {
        if e.status != status::REGISTERED {
            return SbiRet::invalid_state();
        }
        e.status = status::ENABLED;
        SbiRet::success(0)
    })
    .unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `disable`.
pub fn disable(event: usize) -> SbiRet {
    with_event(event, |e| {
        if e.status != status::ENABLED {
            return SbiRet::invalid_state();
        }
        e.status = status::REGISTERED;
        SbiRet::success(0)
    })
    .unwrap_or_else(SbiRet::invalid_param)
}

/// SBI SSE `complete`: leaves the running handler and restores the
/// interrupted context.
pub fn complete(frame: &mut TrapFrame) -> SbiRet {
    let finished = with_running_event(|e| {
        e.status = status::ENABLED;
        (e.saved_sepc, e.saved_flags, e.saved_a6, e.saved_a7)
    });
    let Some((sepc, flags, a6, a7)) = finished else {
        return SbiRet::invalid_state();
    };

    frame.mepc = sepc;
    frame.a6 = a6;
    frame.a7 = a7;
    // Delivery cleared SIE; hand the interrupted enable state back.
    let mut mstatus = frame.mstatus & !(SPP | SIE);
    if flags & interrupted_flags::SPP != 0 {
        mstatus |= SPP;
    }
    if flags & interrupted_flags::SPIE != 0 {
        mstatus |= SIE;
    }
    frame.mstatus = mstatus;
    SbiRet::success(0)
}

fn with_running_event<R>(f: impl FnOnce(&mut SseEvent) -> R) -> Option<R> {
    // Local events first, then the domain's global event.
    let local = &mut hart_context_mut(crate::riscv::current_hartindex()).sse;
    if let Some(e) = local
        .events
        .iter_mut()
        .find(|e| e.status == status::RUNNING)
    {
        return Some(f(e));
    }
    let state = global_state(domain::current_domain())?;
    let mut guard = state.event.lock();
    if guard.status == status::RUNNING {
        Some(f(&mut guard))
    } else {
        None
    }
}

/// SBI SSE `inject`.
pub fn inject(frame: &mut TrapFrame, event: usize, hartid: usize) -> SbiRet {
    if is_global(event) {
        let ret = with_event(event, |e| {
            if e.status == status::UNUSED {
                return SbiRet::invalid_state();
            }
            e.pending = true;
            SbiRet::success(0)
        })
        .unwrap_or_else(SbiRet::invalid_param);
        if ret.is_ok() {
            let target = global_state(domain::current_domain())
                .map(|s| *s.preferred_hart.lock())
                .unwrap_or_else(current_hartid);
            kick(target, frame);
        }
        return ret;
    }

    if !domain::current_domain_can_run(hartid) {
        return SbiRet::invalid_param();
    }
    if hartid == current_hartid() {
        let ret = with_event(event, |e| {
            if e.status == status::UNUSED {
                return SbiRet::invalid_state();
            }
            e.pending = true;
            SbiRet::success(0)
        })
        .unwrap_or_else(SbiRet::invalid_param);
        if ret.is_ok() {
            process_pending_events(frame);
        }
        ret
    } else {
        let Some(ctx) = try_hart_context(hartid_to_hartindex(hartid)) else {
            return SbiRet::invalid_param();
        };
        let local = unsafe {
            // Setting the pending flag of a remote event races only with
            // the owning hart consuming it, which is benign.
            &mut *(core::ptr::from_ref(&ctx.sse) as *mut SseLocalState)
        };
        match local.events.iter_mut().find(|e| e.event_id == event) {
            Some(e) if e.status != status::UNUSED => {
                e.pending = true;
                kick(hartid, frame);
                SbiRet::success(0)
            }
            Some(_) => SbiRet::invalid_state(),
            None => SbiRet::invalid_param(),
        }
    }
}

fn kick(hartid: usize, frame: &mut TrapFrame) {
    use crate::platform::PLATFORM;
    if hartid == current_hartid() {
        process_pending_events(frame);
        return;
    }
    if ipi::set_ipi_type(hartid, ipi::IPI_TYPE_SSE) == 0 {
        if let Some(ipi_dev) = unsafe { PLATFORM.sbi.ipi.as_ref() } {
            ipi_dev.set_msip(hartid);
        }
    }
}

/// SBI SSE `hart_mask` / `hart_unmask`.
pub fn hart_mask() -> SbiRet {
    let local = &mut hart_context_mut(crate::riscv::current_hartindex()).sse;
    if local.masked {
        return SbiRet::already_stopped();
    }
    local.masked = true;
    SbiRet::success(0)
}

pub fn hart_unmask(frame: &mut TrapFrame) -> SbiRet {
    let local = &mut hart_context_mut(crate::riscv::current_hartindex()).sse;
    if !local.masked {
        return SbiRet::already_started();
    }
    local.masked = false;
    process_pending_events(frame);
    SbiRet::success(0)
}

/// Delivers the highest-priority pending enabled event, if any, by
/// rewriting the trap frame to enter the registered handler.
pub fn process_pending_events(frame: &mut TrapFrame) {
    let hart_index = crate::riscv::current_hartindex();
    if hart_context_mut(hart_index).sse.masked {
        return;
    }
    // Only one event may run at a time per hart.
    let local = &mut hart_context_mut(hart_index).sse;
    if local.events.iter().any(|e| e.status == status::RUNNING) {
        return;
    }

    for i in 0..local.events.len() {
        let e = &mut local.events[i];
        if e.pending && e.status == status::ENABLED {
            e.pending = false;
            e.status = status::RUNNING;
            deliver(frame, e);
            return;
        }
    }

    if let Some(state) = global_state(domain::current_domain()) {
        if *state.preferred_hart.lock() == current_hartid() {
            let mut guard = state.event.lock();
            if guard.pending && guard.status == status::ENABLED {
                guard.pending = false;
                guard.status = status::RUNNING;
                deliver(frame, &mut guard);
            }
        }
    }
}

/// Saves the interrupted supervisor context into the event and points
/// the frame at the handler: `a6` carries the event id, `a7` the
/// registered argument.
fn deliver(frame: &mut TrapFrame, e: &mut SseEvent) {
    let mut flags = 0;
    if frame.mstatus & SPP != 0 {
        flags |= interrupted_flags::SPP;
    }
    if frame.mstatus & SIE != 0 {
        flags |= interrupted_flags::SPIE;
    }
    e.saved_sepc = frame.mepc;
    e.saved_flags = flags;
    e.saved_a6 = frame.a6;
    e.saved_a7 = frame.a7;

    frame.mepc = e.entry_pc;
    frame.a6 = e.event_id;
    frame.a7 = e.entry_arg;
    // The handler starts in S-mode with interrupts off.
    frame.mstatus = (frame.mstatus & !SIE) | SPP;
}

/// Routes a double trap exception into the local double trap event.
/// Returns false when no handler is registered and the trap should be
/// redirected instead.
pub fn inject_double_trap(frame: &mut TrapFrame) -> bool {
    let local = &mut hart_context_mut(crate::riscv::current_hartindex()).sse;
    let Some(e) = local
        .events
        .iter_mut()
        .find(|e| e.event_id == event_id::LOCAL_DOUBLE_TRAP)
    else {
        return false;
    };
    if e.status != status::ENABLED || local.masked {
        return false;
    }
    e.pending = true;
    process_pending_events(frame);
    true
}

fn prev_mode(frame: &TrapFrame) -> Mode {
    if frame.prev_mode() == crate::riscv::csr::mstatus::PRV_U {
        Mode::User
    } else {
        Mode::Supervisor
    }
}

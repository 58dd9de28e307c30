use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use hartmask::HartMask;
use memprot::{Access, MemRegion, Mode, RegionList, compute_pmp_program, flags};
use riscv::register::mstatus::MPP;
use spin::{Mutex, Once};

use crate::cfg;
use crate::fail;
use crate::riscv::{current_hartindex, hartid_to_hartindex};
use crate::sbi::domain_context::DomainContext;
use crate::sbi::domain_data::DOMAIN_MAX_DATA_PTRS;
use crate::sbi::pmp;

/// An isolated execution environment: a set of harts plus the physical
/// memory they may touch.
///
/// Domains are built once during cold boot and immutable afterwards,
/// except for hart assignment and the lazily created per-hart contexts.
pub struct Domain {
    pub index: usize,
    pub name: &'static str,
    /// Harts permitted to run in this domain.
    pub possible_harts: HartMask,
    /// Harts currently running in this domain; always a subset of
    /// `possible_harts`, and a partition across all domains.
    pub assigned_harts: Mutex<HartMask>,
    /// The domain's view of physical memory.
    pub regions: RegionList,
    /// Next-stage entry point for the domain's boot hart.
    pub next_addr: usize,
    pub next_arg1: usize,
    pub next_mode: MPP,
    pub boot_hartid: usize,
    /// Whether SRST from this domain may reset the whole system.
    pub system_reset_allowed: bool,
    /// Per-hart saved execution contexts, created on first switch.
    pub(crate) contexts: Vec<Mutex<Option<Box<DomainContext>>>>,
    /// Opaque per-domain data slots, managed by `domain_data`.
    pub(crate) data_ptrs: Mutex<[usize; DOMAIN_MAX_DATA_PTRS]>,
}

impl Domain {
    fn new(
        index: usize,
        name: &'static str,
        possible_harts: HartMask,
        regions: RegionList,
        next_addr: usize,
        next_arg1: usize,
        next_mode: MPP,
        boot_hartid: usize,
        system_reset_allowed: bool,
    ) -> Self {
        let mut contexts = Vec::with_capacity(cfg::NUM_HART_MAX);
        contexts.resize_with(cfg::NUM_HART_MAX, || Mutex::new(None));
        Self {
            index,
            name,
            possible_harts,
            assigned_harts: Mutex::new(HartMask::new()),
            regions,
            next_addr,
            next_arg1,
            next_mode,
            boot_hartid,
            system_reset_allowed,
            contexts,
            data_ptrs: Mutex::new([0; DOMAIN_MAX_DATA_PTRS]),
        }
    }
}

static DOMAINS: Once<Vec<&'static Domain>> = Once::new();

/// Domain index each hart currently runs in, indexed by hart index.
/// Index 0 is the root domain, which matches the zero initialization.
static HART_DOMAIN: [AtomicUsize; cfg::NUM_HART_MAX] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ROOT: AtomicUsize = AtomicUsize::new(0);
    [ROOT; cfg::NUM_HART_MAX]
};

/// Builds the root domain (and the optional isolated domain) during cold
/// boot. `fw_range` is the firmware image span to carve out of every
/// domain.
pub fn init(
    fw_range: core::ops::Range<usize>,
    next_addr: usize,
    next_arg1: usize,
    next_mode: MPP,
    boot_hartid: usize,
) {
    let fw_region = firmware_region(&fw_range);
    let clint_region = MemRegion::new(
        cfg::CLINT_BASE,
        log2_ceil(cfg::CLINT_SIZE),
        flags::M_READABLE | flags::M_WRITABLE | flags::MMIO,
    )
    .unwrap_or_else(|_| fatal("invalid CLINT region"));

    let mut all_harts = HartMask::new();
    for hart_index in 0..cfg::NUM_HART_MAX {
        all_harts.set(hart_index);
    }

    let mut domains: Vec<&'static Domain> = Vec::new();

    // Root domain: every hart, full memory behind the firmware and
    // device carve-outs.
    let mut root_regions = RegionList::new();
    add_region(&mut root_regions, fw_region);
    add_region(&mut root_regions, clint_region);
    if cfg::SECURE_DOMAIN_ENABLE {
        // The isolated domain's memory is invisible to the root guest.
        add_region(
            &mut root_regions,
            MemRegion::new(cfg::SECURE_DOMAIN_BASE, cfg::SECURE_DOMAIN_ORDER, flags::M_RWX)
                .unwrap_or_else(|_| fatal("invalid isolated domain region")),
        );
    }
    add_region(
        &mut root_regions,
        MemRegion::new(0, usize::BITS, flags::SU_RWX | flags::M_RWX).unwrap(),
    );

    // The root domain may observe every hart; what a caller may drive
    // is additionally gated by the hart-to-domain binding.
    domains.push(Box::leak(Box::new(Domain::new(
        0,
        "root",
        all_harts,
        root_regions,
        next_addr,
        next_arg1,
        next_mode,
        boot_hartid,
        true,
    ))));

    if cfg::SECURE_DOMAIN_ENABLE {
        let mut secure_regions = RegionList::new();
        add_region(&mut secure_regions, fw_region);
        add_region(&mut secure_regions, clint_region);
        add_region(
            &mut secure_regions,
            MemRegion::new(
                cfg::SECURE_DOMAIN_BASE,
                cfg::SECURE_DOMAIN_ORDER,
                flags::SU_RWX | flags::M_RWX,
            )
            .unwrap_or_else(|_| fatal("invalid isolated domain region")),
        );
        // No wildcard region: anything outside the domain's memory
        // faults in S/U mode.

        let boot_hart_index = hartid_to_hartindex(cfg::SECURE_DOMAIN_BOOT_HART);
        let secure = Box::leak(Box::new(Domain::new(
            1,
            "secure",
            HartMask::of(boot_hart_index),
            secure_regions,
            cfg::SECURE_DOMAIN_ENTRY,
            0,
            MPP::Supervisor,
            cfg::SECURE_DOMAIN_BOOT_HART,
            false,
        )));
        HART_DOMAIN[boot_hart_index].store(1, Ordering::Relaxed);
        domains.push(secure);
    }

    DOMAINS.call_once(|| domains);
}

fn add_region(list: &mut RegionList, region: MemRegion) {
    if list.add(region).is_err() {
        fatal("conflicting domain memory regions");
    }
}

fn firmware_region(fw_range: &core::ops::Range<usize>) -> MemRegion {
    let size = fw_range.end - fw_range.start;
    let order = log2_ceil(size).max(12);
    MemRegion::new(fw_range.start, order, flags::M_RWX)
        .unwrap_or_else(|_| fatal("firmware image is not region-alignable"))
}

fn log2_ceil(size: usize) -> u32 {
    if size.is_power_of_two() {
        size.trailing_zeros()
    } else {
        usize::BITS - size.leading_zeros()
    }
}

#[cold]
fn fatal(msg: &str) -> ! {
    error!("domain setup failed: {}", msg);
    fail::stop()
}

/// All registered domains; valid after cold boot domain init.
pub fn domains() -> &'static [&'static Domain] {
    DOMAINS.get().expect("domains not initialized")
}

pub fn get(index: usize) -> Option<&'static Domain> {
    domains().get(index).copied()
}

/// The domain the current hart runs in.
pub fn current_domain() -> &'static Domain {
    domains()[HART_DOMAIN[current_hartindex()].load(Ordering::Relaxed)]
}

/// Records a domain switch of the current hart; the caller reprograms
/// PMP and swaps the supervisor state.
pub(crate) fn set_current_domain(index: usize) {
    HART_DOMAIN[current_hartindex()].store(index, Ordering::Relaxed);
}

/// True when the caller's domain may observe and drive `hartid`.
pub fn current_domain_can_run(hartid: usize) -> bool {
    let hart_index = hartid_to_hartindex(hartid);
    let dom = current_domain();
    dom.possible_harts.test(hart_index)
        && HART_DOMAIN
            .get(hart_index)
            .map(|d| d.load(Ordering::Relaxed) == dom.index)
            .unwrap_or(false)
}

/// Harts addressable from the current domain.
pub fn current_domain_hart_mask() -> HartMask {
    current_domain().possible_harts
}

/// Checks an address range in the current domain's memory view.
pub fn current_domain_check_range(base: usize, len: usize, mode: Mode, access: Access) -> bool {
    current_domain().regions.check_range(base, len, mode, access)
}

/// Moves the current hart's assignment into `dom`, preserving the
/// partition across all domains.
pub(crate) fn assign_current_hart(dom: &'static Domain) {
    let hart_index = current_hartindex();
    for other in domains() {
        if other.index != dom.index {
            other.assigned_harts.lock().clear(hart_index);
        }
    }
    dom.assigned_harts.lock().set(hart_index);
    set_current_domain(dom.index);
}

/// Programs the current hart's PMP from its domain's region list.
pub fn pmp_configure_current_hart() {
    let dom = current_domain();
    match compute_pmp_program(&dom.regions, cfg::PMP_ENTRY_COUNT) {
        Ok(entries) => pmp::program(&entries),
        Err(_) => fatal("domain needs more PMP entries than the hart has"),
    }
}

/// Marks the current hart as running in its configured domain and
/// enforces that domain's memory view. Called on every pass through the
/// boot funnel.
pub fn activate_current_hart() {
    let dom = current_domain();
    assign_current_hart(dom);
    pmp_configure_current_hart();
}

/// Queues the start request for every secondary domain's boot hart.
/// Runs once on the cold boot hart after every subsystem is up.
pub fn startup_secondary_domains() {
    use crate::platform::PLATFORM;
    use crate::sbi::hart_context::NextStage;
    use crate::sbi::hsm::remote_hsm;

    for dom in domains().iter().skip(1) {
        if let Some(remote) = remote_hsm(dom.boot_hartid) {
            if remote.start(NextStage {
                start_addr: dom.next_addr,
                opaque: dom.next_arg1,
                next_mode: dom.next_mode,
            }) {
                info!(
                    "Starting domain {} on hart {} at {:#x}",
                    dom.name, dom.boot_hartid, dom.next_addr
                );
                unsafe {
                    PLATFORM.sbi.ipi.as_ref().unwrap().set_msip(dom.boot_hartid);
                }
            }
        }
    }
}

use cqueue::{CircularQueue, QueueError};
use sbi_spec::binary::SbiRet;
use sbi_spec::pmu::firmware_event;
use spin::Mutex;

use crate::cfg::{PAGE_SIZE, TLB_FLUSH_LIMIT};
use crate::platform::PLATFORM;
use crate::riscv::current_hartindex;
use crate::sbi::features::{Extension, hart_extension_probe};
use crate::sbi::pmu::pmu_firmware_counter_increment;
use crate::sbi::trap_stack::try_hart_context;
use core::arch::asm;
use core::sync::atomic::{AtomicU32, Ordering};

/// Depth of each hart's fence queue.
const RFENCE_QUEUE_DEPTH: usize = 8;

/// Cell for managing remote fence operations between harts.
pub(crate) struct RFenceCell {
    // Queue of fence operations tagged with the source hart index.
    queue: Mutex<CircularQueue<(RFenceContext, usize), RFENCE_QUEUE_DEPTH>>,
    // Counter of target harts this hart still waits on.
    wait_sync_count: AtomicU32,
}

/// Context information for a remote fence operation.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RFenceContext {
    /// Start address of memory region to fence.
    pub start_addr: usize,
    /// Size of memory region to fence.
    pub size: usize,
    /// Address space ID.
    pub asid: usize,
    /// Virtual machine ID.
    pub vmid: usize,
    /// Type of fence operation.
    pub op: RFenceType,
}

/// Types of remote fence operations supported.
#[derive(Clone, Copy, Debug)]
pub enum RFenceType {
    /// Instruction fence.
    FenceI,
    /// Supervisor fence for virtual memory.
    SFenceVma,
    /// Supervisor fence for virtual memory with ASID.
    SFenceVmaAsid,
    /// Hypervisor fence for guest physical memory with VMID.
    HFenceGvmaVmid,
    /// Hypervisor fence for guest physical memory.
    HFenceGvma,
    /// Hypervisor fence for guest virtual memory with ASID.
    HFenceVvmaAsid,
    /// Hypervisor fence for guest virtual memory.
    HFenceVvma,
}

impl RFenceCell {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(CircularQueue::new()),
            wait_sync_count: AtomicU32::new(0),
        }
    }

    /// Gets a local view of this fence cell for the current hart.
    #[inline]
    pub fn local(&self) -> LocalRFenceCell<'_> {
        LocalRFenceCell(self)
    }

    /// Gets a remote view of this fence cell for other harts.
    #[inline]
    pub fn remote(&self) -> RemoteRFenceCell<'_> {
        RemoteRFenceCell(self)
    }
}

unsafe impl Sync for RFenceCell {}
unsafe impl Send for RFenceCell {}

/// View of RFenceCell for operations on the current hart.
pub struct LocalRFenceCell<'a>(&'a RFenceCell);

/// View of RFenceCell for operations from other harts.
pub struct RemoteRFenceCell<'a>(&'a RFenceCell);

/// Gets the local fence cell for the current hart.
pub(crate) fn local_rfence() -> Option<LocalRFenceCell<'static>> {
    try_hart_context(current_hartindex()).map(|ctx| ctx.rfence.local())
}

/// Gets the remote fence cell for a specific hart index.
pub(crate) fn remote_rfence(hart_index: usize) -> Option<RemoteRFenceCell<'static>> {
    try_hart_context(hart_index).map(|ctx| ctx.rfence.remote())
}

impl LocalRFenceCell<'_> {
    /// True when every targeted hart has executed this hart's fences.
    pub fn is_sync(&self) -> bool {
        self.0.wait_sync_count.load(Ordering::Acquire) == 0
    }

    /// Accounts one more outstanding target.
    pub fn add(&self) {
        self.0.wait_sync_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_empty(&self) -> bool {
        self.0.queue.lock().is_empty()
    }

    /// Takes the next fence operation off this hart's queue.
    pub fn get(&self) -> Option<(RFenceContext, usize)> {
        self.0.queue.lock().dequeue().ok()
    }
}

impl RemoteRFenceCell<'_> {
    /// Publishes a fence operation to this cell's queue.
    ///
    /// If the destination queue is full, the sending hart drains its own
    /// queue while spinning: another hart may be blocked on us the same
    /// way, and interleaved service is what breaks the cycle.
    pub fn set(&self, ctx: RFenceContext) {
        let source = current_hartindex();
        loop {
            let mut queue = self.0.queue.lock();
            match queue.enqueue((ctx, source)) {
                Ok(_) => return,
                Err(QueueError::Full) => {
                    drop(queue);
                    rfence_single_handler();
                }
                Err(_) => panic!("unable to push fence ops to queue"),
            }
        }
    }

    /// Signals the source hart that one fence has been executed.
    pub fn sub(&self) {
        self.0.wait_sync_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Validates address range for fence operations.
#[inline(always)]
fn validate_address_range(start_addr: usize, size: usize) -> Result<usize, SbiRet> {
    if size > usize::MAX - start_addr {
        return Err(SbiRet::invalid_address());
    }
    Ok(size)
}

/// Builds the descriptor and runs the fan-out for one RFENCE call.
fn remote_fence_process(rfence_ctx: RFenceContext, hmask: usize, hbase: usize) -> SbiRet {
    unsafe { PLATFORM.sbi.ipi.as_ref() }
        .unwrap()
        .send_fence(hmask, hbase, rfence_ctx)
}

/// SBI `remote_fence_i`.
pub fn remote_fence_i(hmask: usize, hbase: usize) -> SbiRet {
    pmu_firmware_counter_increment(firmware_event::FENCE_I_SENT);
    remote_fence_process(
        RFenceContext {
            start_addr: 0,
            size: 0,
            asid: 0,
            vmid: 0,
            op: RFenceType::FenceI,
        },
        hmask,
        hbase,
    )
}

/// SBI `remote_sfence_vma`.
pub fn remote_sfence_vma(hmask: usize, hbase: usize, start_addr: usize, size: usize) -> SbiRet {
    pmu_firmware_counter_increment(firmware_event::SFENCE_VMA_SENT);
    let flush_size = match validate_address_range(start_addr, size) {
        Ok(size) => size,
        Err(e) => return e,
    };
    remote_fence_process(
        RFenceContext {
            start_addr,
            size: flush_size,
            asid: 0,
            vmid: 0,
            op: RFenceType::SFenceVma,
        },
        hmask,
        hbase,
    )
}

/// SBI `remote_sfence_vma_asid`.
pub fn remote_sfence_vma_asid(
    hmask: usize,
    hbase: usize,
    start_addr: usize,
    size: usize,
    asid: usize,
) -> SbiRet {
    pmu_firmware_counter_increment(firmware_event::SFENCE_VMA_ASID_SENT);
    let flush_size = match validate_address_range(start_addr, size) {
        Ok(size) => size,
        Err(e) => return e,
    };
    remote_fence_process(
        RFenceContext {
            start_addr,
            size: flush_size,
            asid,
            vmid: 0,
            op: RFenceType::SFenceVmaAsid,
        },
        hmask,
        hbase,
    )
}

/// SBI `remote_hfence_gvma[_vmid]` and `remote_hfence_vvma[_asid]`.
///
/// Only available when the hart implements the hypervisor extension.
pub fn remote_hfence(
    op: RFenceType,
    hmask: usize,
    hbase: usize,
    start_addr: usize,
    size: usize,
    id: usize,
) -> SbiRet {
    if !hart_extension_probe(current_hartindex(), Extension::Hypervisor) {
        return SbiRet::not_supported();
    }
    let flush_size = match validate_address_range(start_addr, size) {
        Ok(size) => size,
        Err(e) => return e,
    };
    let (asid, vmid) = match op {
        RFenceType::HFenceVvmaAsid => (id, 0),
        RFenceType::HFenceGvmaVmid => (0, id),
        _ => (0, 0),
    };
    remote_fence_process(
        RFenceContext {
            start_addr,
            size: flush_size,
            asid,
            vmid,
            op,
        },
        hmask,
        hbase,
    )
}

/// True when the descriptor asks for a whole-address-space flush, either
/// explicitly or because the range is beyond the platform flush limit.
#[inline]
fn flush_all(ctx: &RFenceContext) -> bool {
    (ctx.start_addr == 0 && ctx.size == 0) || ctx.size == usize::MAX || ctx.size > TLB_FLUSH_LIMIT
}

/// Executes one queued fence operation, if any.
#[inline]
pub fn rfence_single_handler() {
    let Some(local) = local_rfence() else {
        return;
    };
    let Some((ctx, source)) = local.get() else {
        return;
    };
    match ctx.op {
        RFenceType::FenceI => {
            pmu_firmware_counter_increment(firmware_event::FENCE_I_RECEIVED);
            unsafe {
                asm!("fence.i");
            }
        }
        RFenceType::SFenceVma => {
            pmu_firmware_counter_increment(firmware_event::SFENCE_VMA_RECEIVED);
            if flush_all(&ctx) {
                unsafe {
                    asm!("sfence.vma");
                }
            } else {
                for offset in (0..ctx.size).step_by(PAGE_SIZE) {
                    let addr = ctx.start_addr + offset;
                    unsafe {
                        asm!("sfence.vma {}", in(reg) addr);
                    }
                }
            }
        }
        RFenceType::SFenceVmaAsid => {
            pmu_firmware_counter_increment(firmware_event::SFENCE_VMA_ASID_RECEIVED);
            let asid = ctx.asid;
            if flush_all(&ctx) {
                unsafe {
                    asm!("sfence.vma x0, {}", in(reg) asid);
                }
            } else {
                for offset in (0..ctx.size).step_by(PAGE_SIZE) {
                    let addr = ctx.start_addr + offset;
                    unsafe {
                        asm!("sfence.vma {}, {}", in(reg) addr, in(reg) asid);
                    }
                }
            }
        }
        RFenceType::HFenceGvma | RFenceType::HFenceGvmaVmid => {
            pmu_firmware_counter_increment(firmware_event::HFENCE_GVMA_RECEIVED);
            // hfence.gvma gaddr, vmid (.insn: the assembler has no
            // mnemonic without the target H feature)
            if flush_all(&ctx) {
                unsafe {
                    asm!(".insn r 0x73, 0x0, 0x31, x0, x0, x0");
                }
            } else {
                let vmid = ctx.vmid;
                for offset in (0..ctx.size).step_by(PAGE_SIZE) {
                    let gaddr = (ctx.start_addr + offset) >> 2;
                    unsafe {
                        asm!(
                            ".insn r 0x73, 0x0, 0x31, x0, {}, {}",
                            in(reg) gaddr,
                            in(reg) vmid,
                        );
                    }
                }
            }
        }
        RFenceType::HFenceVvma | RFenceType::HFenceVvmaAsid => {
            pmu_firmware_counter_increment(firmware_event::HFENCE_VVMA_RECEIVED);
            // hfence.vvma vaddr, asid
            if flush_all(&ctx) {
                unsafe {
                    asm!(".insn r 0x73, 0x0, 0x11, x0, x0, x0");
                }
            } else {
                let asid = ctx.asid;
                for offset in (0..ctx.size).step_by(PAGE_SIZE) {
                    let vaddr = ctx.start_addr + offset;
                    unsafe {
                        asm!(
                            ".insn r 0x73, 0x0, 0x11, x0, {}, {}",
                            in(reg) vaddr,
                            in(reg) asid,
                        );
                    }
                }
            }
        }
    }
    if let Some(remote) = remote_rfence(source) {
        remote.sub();
    }
}

/// Process all pending remote fence operations.
#[inline]
pub fn rfence_handler() {
    while let Some(local) = local_rfence() {
        if local.is_empty() {
            break;
        }
        rfence_single_handler();
    }
}

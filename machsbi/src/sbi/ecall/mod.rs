pub mod base;
pub mod cppc;
pub mod dbcn;
pub mod dbtr;
pub mod fwft;
pub mod hsm;
pub mod legacy;
pub mod mpxy;
pub mod pmu;
pub mod rfnc;
pub mod spi;
pub mod srst;
pub mod sse;
pub mod susp;
pub mod time;
pub mod vendor;

use core::ops::RangeInclusive;

use extable::ExtensionTable;
use sbi_spec::binary::SbiRet;
use spin::Once;

use crate::fail;
use crate::sbi::trap::{TrapFrame, advance_pc};

/// Outcome of one extension handler invocation.
///
/// `skip_regs_update` is set by handlers that already arranged the
/// return state themselves: the legacy shim, diverging calls that came
/// back through a context switch, and anything that replaced the trap
/// frame wholesale.
pub struct EcallResult {
    pub ret: SbiRet,
    pub skip_regs_update: bool,
}

impl EcallResult {
    /// A result that leaves the trap frame exactly as the handler
    /// arranged it.
    pub const fn skip() -> Self {
        Self {
            ret: SbiRet::success(0),
            skip_regs_update: true,
        }
    }
}

impl From<SbiRet> for EcallResult {
    fn from(ret: SbiRet) -> Self {
        Self {
            ret,
            skip_regs_update: false,
        }
    }
}

/// One SBI extension: an inclusive extension-id range plus the handler
/// and probe behavior behind it.
pub trait SbiExtension: Sync {
    fn name(&self) -> &'static str;

    /// The extension-id range this extension serves.
    fn extid_range(&self) -> RangeInclusive<usize>;

    /// Availability gate consulted once at registration time; an
    /// extension whose backing device is missing never registers.
    fn available(&self) -> bool {
        true
    }

    /// Refines `probe_extension` output; only consulted for registered
    /// extensions.
    fn probe(&self, _extid: usize) -> usize {
        1
    }

    fn handle(&self, extid: usize, funcid: usize, frame: &mut TrapFrame) -> EcallResult;
}

/// Every extension this firmware can offer, in registration order.
static EXTENSIONS: &[&'static dyn SbiExtension] = &[
    &legacy::Legacy,
    &base::Base,
    &time::Time,
    &spi::Spi,
    &rfnc::Rfnc,
    &hsm::Hsm,
    &srst::Srst,
    &dbcn::Dbcn,
    &pmu::Pmu,
    &susp::Susp,
    &cppc::Cppc,
    &fwft::Fwft,
    &dbtr::Dbtr,
    &sse::Sse,
    &mpxy::Mpxy,
    &vendor::Vendor,
];

static REGISTRY: Once<ExtensionTable<&'static dyn SbiExtension>> = Once::new();

/// Builds the dispatch table from every available extension. Cold boot
/// only; overlapping id ranges are a firmware bug and fatal.
pub fn init() {
    REGISTRY.call_once(|| {
        let mut table = ExtensionTable::new();
        for ext in EXTENSIONS {
            if !ext.available() {
                debug!("extension {} unavailable, skipped", ext.name());
                continue;
            }
            let range = ext.extid_range();
            if table.register(*range.start(), *range.end(), *ext).is_err() {
                error!("extension {} overlaps a registered id range", ext.name());
                fail::stop();
            }
        }
        table
    });
}

/// Finds the registered extension serving `extid`.
pub fn find_extension(extid: usize) -> Option<&'static dyn SbiExtension> {
    REGISTRY.get().and_then(|table| table.find(extid)).copied()
}

/// `probe_extension` of the Base extension: registry lookup refined by
/// the extension's own probe hook.
pub fn probe_extension(extid: usize) -> usize {
    match find_extension(extid) {
        Some(ext) => ext.probe(extid),
        None => sbi_spec::base::UNAVAILABLE_EXTENSION,
    }
}

/// Supervisor `ecall` entry: dispatch on `a7`/`a6`, write the result to
/// `a0`/`a1` and step over the `ecall` instruction.
pub fn handle_ecall(frame: &mut TrapFrame) {
    let (extid, funcid) = (frame.a7, frame.a6);
    let result = match find_extension(extid) {
        Some(ext) => ext.handle(extid, funcid, frame),
        None => SbiRet::not_supported().into(),
    };
    if !result.skip_regs_update {
        frame.a0 = result.ret.error;
        frame.a1 = result.ret.value;
        advance_pc(frame, 4);
    }
}

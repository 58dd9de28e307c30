use core::alloc::Layout;
use spin::Mutex;

use crate::sbi::domain::{self, Domain};

/// Number of opaque per-domain data slots.
pub const DOMAIN_MAX_DATA_PTRS: usize = 32;

/// A per-domain data registration.
///
/// Subsystems register once at cold boot; the framework allocates a
/// zeroed block of `size` bytes for every domain and hands the slot
/// index back as a typed handle.
pub struct DomainData {
    pub size: usize,
    pub setup: Option<fn(&'static Domain, *mut u8)>,
    pub cleanup: Option<fn(&'static Domain, *mut u8)>,
}

/// Handle returned by [`register`]; resolves to a pointer per domain.
#[derive(Clone, Copy, Debug)]
pub struct DataHandle(usize);

struct Registry {
    used: u32,
    entries: [Option<&'static DomainData>; DOMAIN_MAX_DATA_PTRS],
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    used: 0,
    entries: [None; DOMAIN_MAX_DATA_PTRS],
});

/// Error type for domain data registration.
#[derive(Debug)]
pub enum DataError {
    /// All data slot indices are taken.
    NoSpace,
    /// Zero-sized registration.
    InvalidParam,
    /// Allocation failed.
    NoMem,
}

/// Registers a per-domain data block and materializes it for every
/// registered domain. Cold-boot only.
pub fn register(data: &'static DomainData) -> Result<DataHandle, DataError> {
    if data.size == 0 {
        return Err(DataError::InvalidParam);
    }

    let mut registry = REGISTRY.lock();
    let Some(index) = (0..DOMAIN_MAX_DATA_PTRS).find(|i| registry.used & (1 << i) == 0) else {
        return Err(DataError::NoSpace);
    };
    registry.used |= 1 << index;
    registry.entries[index] = Some(data);
    drop(registry);

    for dom in domain::domains() {
        setup_one(dom, data, index)?;
    }
    Ok(DataHandle(index))
}

fn setup_one(dom: &'static Domain, data: &'static DomainData, index: usize) -> Result<(), DataError> {
    let layout = Layout::from_size_align(data.size, 16).map_err(|_| DataError::InvalidParam)?;
    let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(DataError::NoMem);
    }
    if let Some(setup) = data.setup {
        setup(dom, ptr);
    }
    dom.data_ptrs.lock()[index] = ptr as usize;
    Ok(())
}

/// Resolves a handle to the data block of one domain.
pub fn data_ptr(dom: &Domain, handle: DataHandle) -> Option<*mut u8> {
    let addr = dom.data_ptrs.lock()[handle.0];
    if addr == 0 { None } else { Some(addr as *mut u8) }
}

/// Tears down one registration across all domains.
#[allow(unused)]
pub fn unregister(data: &'static DomainData, handle: DataHandle) {
    for dom in domain::domains() {
        let mut ptrs = dom.data_ptrs.lock();
        let addr = ptrs[handle.0];
        if addr != 0 {
            if let Some(cleanup) = data.cleanup {
                cleanup(dom, addr as *mut u8);
            }
            let layout = Layout::from_size_align(data.size, 16).unwrap();
            unsafe { alloc::alloc::dealloc(addr as *mut u8, layout) };
            ptrs[handle.0] = 0;
        }
    }
    let mut registry = REGISTRY.lock();
    registry.used &= !(1 << handle.0);
    registry.entries[handle.0] = None;
}

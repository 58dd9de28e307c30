pub mod csr;

/// Returns the current hart (hardware thread) ID.
#[inline]
pub fn current_hartid() -> usize {
    riscv::register::mhartid::read()
}

/// Dense hart index of the current hart.
///
/// The reference platform numbers harts contiguously from zero, so the
/// index equals the hart ID. Keep every mask and per-hart table access
/// going through these two helpers so a platform with sparse IDs only
/// has to change this module.
#[inline]
pub fn current_hartindex() -> usize {
    hartid_to_hartindex(current_hartid())
}

/// Converts a hardware hart ID to a dense hart index.
#[inline]
pub const fn hartid_to_hartindex(hartid: usize) -> usize {
    hartid
}

/// Converts a dense hart index back to the hardware hart ID.
#[inline]
pub const fn hartindex_to_hartid(hartindex: usize) -> usize {
    hartindex
}

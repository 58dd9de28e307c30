use static_toml::static_toml;

/// The address where the firmware is linked to start.
pub const SBI_LINK_START_ADDRESS: usize = 0x80000000;

static_toml! {
    const CONFIG = include_toml!("config.toml");
}

/// Maximum number of supported harts.
pub const NUM_HART_MAX: usize = CONFIG.num_hart_max as usize;
/// Stack size per hart (hardware thread) in bytes.
pub const STACK_SIZE_PER_HART: usize = CONFIG.stack_size_per_hart as usize;
/// Heap size of the firmware.
pub const HEAP_SIZE: usize = CONFIG.heap_size as usize;
/// Platform page size.
pub const PAGE_SIZE: usize = CONFIG.page_size as usize;
/// Log level.
pub const LOG_LEVEL: &str = CONFIG.log_level;
/// TLB_FLUSH_LIMIT defines the TLB refresh range limit.
/// If a remote fence covers more than this, the whole TLB is flushed.
pub const TLB_FLUSH_LIMIT: usize = CONFIG.tlb_flush_limit as usize;
/// PMP entries implemented by each hart.
pub const PMP_ENTRY_COUNT: usize = CONFIG.pmp_entry_count as usize;

/// UART MMIO window.
pub const UART_BASE: usize = CONFIG.uart_base as usize;
pub const UART_SIZE: usize = CONFIG.uart_size as usize;
/// CLINT MMIO window.
pub const CLINT_BASE: usize = CONFIG.clint_base as usize;
pub const CLINT_SIZE: usize = CONFIG.clint_size as usize;
/// SiFive test device used for reset and shutdown.
pub const TEST_DEVICE_BASE: usize = CONFIG.test_device_base as usize;

/// Main memory range handed to the supervisor.
pub const MEMORY_RANGE_START: usize = CONFIG.memory_range_start as usize;
pub const MEMORY_RANGE_END: usize = CONFIG.memory_range_end as usize;

/// Address for jump mode.
#[cfg(feature = "jump")]
pub const JUMP_ADDRESS: usize = CONFIG.jump_address as usize;

/// Optional isolated domain configuration.
pub const SECURE_DOMAIN_ENABLE: bool = CONFIG.secure_domain_enable;
pub const SECURE_DOMAIN_BASE: usize = CONFIG.secure_domain_base as usize;
pub const SECURE_DOMAIN_ORDER: u32 = CONFIG.secure_domain_order as u32;
pub const SECURE_DOMAIN_ENTRY: usize = CONFIG.secure_domain_entry as usize;
pub const SECURE_DOMAIN_BOOT_HART: usize = CONFIG.secure_domain_boot_hart as usize;

/// Valid next-stage jump ranges for the dynamic information handoff.
pub const DYNAMIC_NEXT_ADDR_RANGE: [core::ops::Range<usize>; 1] =
    [MEMORY_RANGE_START..MEMORY_RANGE_END];

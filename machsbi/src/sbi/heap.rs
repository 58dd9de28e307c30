use crate::cfg::HEAP_SIZE;
use buddy_system_allocator::LockedHeap;

#[unsafe(link_section = ".bss.heap")]
static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap<15> = LockedHeap::<15>::empty();

pub fn sbi_heap_init() {
    unsafe {
        HEAP_ALLOCATOR
            .lock()
            .init(HEAP.as_ptr() as usize, HEAP_SIZE);
    }
}

/// Heap accounting: `(used, free, reserved)` bytes.
#[allow(unused)]
pub fn heap_stats() -> (usize, usize, usize) {
    let heap = HEAP_ALLOCATOR.lock();
    let used = heap.stats_alloc_actual();
    let total = heap.stats_total_bytes();
    (used, total - used, HEAP_SIZE - total)
}

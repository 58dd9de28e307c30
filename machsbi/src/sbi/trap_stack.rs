use crate::cfg::{NUM_HART_MAX, STACK_SIZE_PER_HART};
use crate::sbi::hart_context::HartContext;

/// Root stack array for all harts, placed in the BSS stack section.
#[unsafe(link_section = ".bss.stack")]
pub(crate) static mut ROOT_STACK: [Stack; NUM_HART_MAX] = [Stack::ZERO; NUM_HART_MAX];

// Make sure stack addresses stay aligned.
const _: () = assert!(STACK_SIZE_PER_HART % core::mem::align_of::<Stack>() == 0);

/// Computes the trap-stack top for the current hart into `sp`.
///
/// Naked so it can run before any Rust frame exists; the entry and boot
/// assembly call it with nothing but a valid `mhartid`.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn locate() {
    core::arch::naked_asm!(
        "   la   sp, {stack}               // Load stack base address
            li   t0, {per_hart_stack_size} // Load stack size per hart
            csrr t1, mhartid               // Get current hart ID
            addi t1, t1, 1                 // Add 1 to hart ID
         1: add  sp, sp, t0                // Calculate stack pointer
            addi t1, t1, -1                // Decrement counter
            bnez t1, 1b                    // Loop if not zero
            ret
        ",
        per_hart_stack_size = const STACK_SIZE_PER_HART,
        stack               =   sym ROOT_STACK,
    )
}

pub fn hart_context_mut(hart_index: usize) -> &'static mut HartContext {
    unsafe { ROOT_STACK.get_mut(hart_index).unwrap().hart_context_mut() }
}

pub fn hart_context(hart_index: usize) -> &'static HartContext {
    unsafe { ROOT_STACK.get(hart_index).unwrap().hart_context() }
}

pub fn try_hart_context(hart_index: usize) -> Option<&'static HartContext> {
    unsafe { ROOT_STACK.get(hart_index).map(|s| s.hart_context()) }
}

/// Stack type for each hart.
///
/// Memory layout:
/// - Bottom: HartContext struct.
/// - Middle: working stack space for the hart.
/// - Top: trap frame pushed by the entry trampoline.
///
/// `mscratch` always holds the top of the current hart's stack.
#[repr(C, align(128))]
pub(crate) struct Stack([u8; STACK_SIZE_PER_HART]);

impl Stack {
    const ZERO: Self = Self([0; STACK_SIZE_PER_HART]);

    /// Gets mutable reference to hart context at bottom of stack.
    #[inline]
    pub fn hart_context_mut(&mut self) -> &mut HartContext {
        unsafe { &mut *self.0.as_mut_ptr().cast() }
    }

    /// Gets immutable reference to hart context at bottom of stack.
    #[inline]
    pub fn hart_context(&self) -> &HartContext {
        unsafe { &*self.0.as_ptr().cast() }
    }
}

// The hart context must fit under the stack with room to spare.
const _: () = assert!(core::mem::size_of::<HartContext>() < STACK_SIZE_PER_HART / 2);

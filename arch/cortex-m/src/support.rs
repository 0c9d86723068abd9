// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Barriers, sleep and the stack pointer/CONTROL primitives.
//!
//! Off target these compile to host stand-ins so the rest of the crate can be
//! unit tested: barriers become compiler fences and the stack primitives
//! panic, since there is no sensible host behavior for them.

use kernel::platform::privilege::StackPrimitives;

#[cfg(all(target_arch = "arm", target_os = "none"))]
use core::arch::asm;

/// CONTROL register bits.
pub mod control {
    /// Thread mode is unprivileged.
    pub const NPRIV: u32 = 1 << 0;
    /// Thread mode runs on the process stack.
    pub const SPSEL: u32 = 1 << 1;
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline(always)]
/// NOP instruction
pub fn nop() {
    // SAFETY: nop has no side effects.
    unsafe {
        asm!("nop", options(nomem, nostack, preserves_flags));
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline(always)]
/// WFI instruction
pub unsafe fn wfi() {
    // SAFETY: the caller has interrupts set up to wake the core.
    unsafe {
        asm!("wfi", options(nomem, preserves_flags));
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline(always)]
/// Data synchronization barrier
pub fn dsb() {
    // SAFETY: a barrier only orders memory accesses.
    unsafe {
        asm!("dsb 0xF", options(nostack, preserves_flags));
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline(always)]
/// Instruction synchronization barrier
pub fn isb() {
    // SAFETY: a barrier only flushes the pipeline.
    unsafe {
        asm!("isb 0xF", options(nostack, preserves_flags));
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
fn control() -> u32 {
    let control: u32;
    // SAFETY: reading CONTROL has no side effects.
    unsafe {
        asm!("mrs {}, CONTROL", out(reg) control, options(nomem, nostack, preserves_flags));
    }
    control
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
fn set_control(control: u32) {
    // SAFETY: CONTROL only selects the thread mode privilege and stack. The
    // isb makes the change visible to the very next instruction.
    unsafe {
        asm!(
            "msr CONTROL, {}",
            "isb",
            in(reg) control,
            options(nostack, preserves_flags)
        );
    }
}

// Mock implementations for tests on Travis-CI.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
/// NOP instruction (mock)
pub fn nop() {
    unimplemented!()
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
/// WFI instruction (mock)
pub unsafe fn wfi() {
    unimplemented!()
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
/// Data synchronization barrier (host stand-in)
pub fn dsb() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
/// Instruction synchronization barrier (host stand-in)
pub fn isb() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// The stack and privilege primitives of the running core.
///
/// Switching thread mode onto the process stack moves `sp` itself, so
/// [`enable_separate_stacks`] does it in one assembly sequence that ends by
/// branching to the continuation: no compiled code runs between the switch
/// and the continuation's first instruction.
///
/// [`enable_separate_stacks`]: StackPrimitives::enable_separate_stacks
pub struct CortexMStack(());

impl CortexMStack {
    /// # Safety
    ///
    /// Must only be used on the core it describes, from thread mode or
    /// handlers that expect thread mode state to change underneath them.
    pub const unsafe fn new() -> CortexMStack {
        CortexMStack(())
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
impl StackPrimitives for CortexMStack {
    fn unprivileged_mode(&self) {
        set_control(control() | control::NPRIV);
    }

    fn privileged_mode(&self) {
        set_control(control() & !control::NPRIV);
    }

    fn set_process_stack_pointer(&self, address: u32) {
        // SAFETY: PSP is not the active stack pointer until SPSEL is set.
        unsafe {
            asm!("msr PSP, {}", in(reg) address, options(nomem, nostack, preserves_flags));
        }
    }

    fn process_stack_pointer(&self) -> u32 {
        let psp: u32;
        // SAFETY: reading PSP has no side effects.
        unsafe {
            asm!("mrs {}, PSP", out(reg) psp, options(nomem, nostack, preserves_flags));
        }
        psp
    }

    fn main_stack_pointer(&self) -> u32 {
        let msp: u32;
        // SAFETY: reading MSP has no side effects.
        unsafe {
            asm!("mrs {}, MSP", out(reg) msp, options(nomem, nostack, preserves_flags));
        }
        msp
    }

    fn enable_separate_stacks(&self, thread: extern "C" fn() -> !) -> ! {
        let control = control() | control::SPSEL;
        // SAFETY: PSP was programmed by the caller. After the write to
        // CONTROL, `sp` is PSP; the isb makes that visible before the branch,
        // and the continuation never returns into the frames left on MSP.
        unsafe {
            asm!(
                "msr CONTROL, {control}",
                "isb",
                "bx {thread}",
                control = in(reg) control,
                thread = in(reg) thread,
                options(noreturn)
            );
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
impl StackPrimitives for CortexMStack {
    fn unprivileged_mode(&self) {
        unimplemented!()
    }

    fn privileged_mode(&self) {
        unimplemented!()
    }

    fn set_process_stack_pointer(&self, _address: u32) {
        unimplemented!()
    }

    fn process_stack_pointer(&self) -> u32 {
        unimplemented!()
    }

    fn main_stack_pointer(&self) -> u32 {
        unimplemented!()
    }

    fn enable_separate_stacks(&self, _thread: extern "C" fn() -> !) -> ! {
        unimplemented!()
    }
}

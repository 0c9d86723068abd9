// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Moving thread mode between privileged and unprivileged execution.
//!
//! The register-level mechanics live in the architecture crate behind
//! [`StackPrimitives`]; [`PrivilegeController`] only enforces the order in
//! which they are used: the restricted context gets its own stack before it
//! is ever entered.
//!
//! Moving thread mode onto its own stack changes `sp` under the running
//! code, so it is never done in the middle of a call chain. Instead the
//! switch hands control to a continuation that never returns:
//!
//! ```text
//! main (main stack)                         thread (process stack)
//! -----------------                         ----------------------
//! set_stack_base(top)
//! run_on_process_stack(thread)   ---->      commit, enter_unprivileged, ...
//! ```

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::platform::fault::ExceptionFrame;
use crate::platform::mpu::Mode;

/// The stack pointer and privilege operations provided by the architecture.
pub trait StackPrimitives {
    /// Drops thread mode to unprivileged execution.
    fn unprivileged_mode(&self);

    /// Returns thread mode to privileged execution. Only effective when
    /// called from a handler or from already privileged code.
    fn privileged_mode(&self);

    fn set_process_stack_pointer(&self, address: u32);

    fn process_stack_pointer(&self) -> u32;

    fn main_stack_pointer(&self) -> u32;

    /// Makes thread mode run on the process stack, leaving the main stack to
    /// handlers, and continues in `thread`.
    ///
    /// Frames built on the main stack up to this call are never returned
    /// to. They stay intact, since handlers only push below them.
    fn enable_separate_stacks(&self, thread: extern "C" fn() -> !) -> !;

    /// Snapshot of the exception frame stacked at `stack`.
    ///
    /// # Safety
    ///
    /// `stack` must be the address of a frame stacked by the hardware on
    /// exception entry, that is still live.
    unsafe fn read_frame(&self, stack: u32) -> ExceptionFrame {
        // SAFETY: guaranteed by the caller.
        unsafe { ExceptionFrame::capture(stack as usize as *const u32) }
    }
}

/// Stack base value meaning "not set yet". Address 0 is never a stack top.
const NO_STACK_BASE: u32 = 0;

/// Demotes thread mode onto a dedicated stack and back.
///
/// The state is atomic so a board can keep the controller in a `static`
/// shared by the code before and after the stack switch.
pub struct PrivilegeController<'a, P: StackPrimitives> {
    primitives: &'a P,
    stack_base: AtomicU32,
    unprivileged: AtomicBool,
}

impl<'a, P: StackPrimitives> PrivilegeController<'a, P> {
    /// Execution starts privileged, on the main stack.
    pub const fn new(primitives: &'a P) -> PrivilegeController<'a, P> {
        PrivilegeController {
            primitives,
            stack_base: AtomicU32::new(NO_STACK_BASE),
            unprivileged: AtomicBool::new(false),
        }
    }

    /// Gives thread mode its own stack starting at `address` (the stack grows
    /// down from there). Thread mode moves onto it with
    /// [`run_on_process_stack`].
    ///
    /// Must be called before the first [`enter_unprivileged`].
    ///
    /// [`run_on_process_stack`]: PrivilegeController::run_on_process_stack
    /// [`enter_unprivileged`]: PrivilegeController::enter_unprivileged
    pub fn set_stack_base(&self, address: u32) {
        debug_assert!(address % 8 == 0, "process stack must be 8 byte aligned");
        debug_assert!(address != NO_STACK_BASE, "process stack cannot start at 0");
        self.primitives.set_process_stack_pointer(address);
        self.stack_base.store(address, Ordering::Relaxed);
        log::debug!("process stack base set to {:#010x}", address);
    }

    /// Moves thread mode onto the stack given to [`set_stack_base`] and
    /// continues in `thread`. The caller's frames are left behind on the
    /// main stack.
    ///
    /// [`set_stack_base`]: PrivilegeController::set_stack_base
    pub fn run_on_process_stack(&self, thread: extern "C" fn() -> !) -> ! {
        debug_assert!(
            self.stack_base().is_some(),
            "set_stack_base must precede run_on_process_stack"
        );
        log::debug!("thread mode moving to the process stack");
        self.primitives.enable_separate_stacks(thread)
    }

    /// Drops thread mode to unprivileged execution. From here on the MPU
    /// decides what the thread can reach.
    pub fn enter_unprivileged(&self) {
        debug_assert!(
            self.stack_base().is_some(),
            "set_stack_base must precede enter_unprivileged"
        );
        log::debug!("entering unprivileged thread mode");
        self.primitives.unprivileged_mode();
        self.unprivileged.store(true, Ordering::Relaxed);
    }

    /// Asks for privileged thread mode again. Only takes effect from handler
    /// or privileged code; hardware ignores the request from unprivileged
    /// thread mode.
    pub fn enter_privileged(&self) {
        self.primitives.privileged_mode();
        self.unprivileged.store(false, Ordering::Relaxed);
    }

    /// The process stack pointer as it is right now.
    pub fn current_stack_pointer(&self) -> u32 {
        self.primitives.process_stack_pointer()
    }

    pub fn main_stack_pointer(&self) -> u32 {
        self.primitives.main_stack_pointer()
    }

    pub fn stack_base(&self) -> Option<u32> {
        match self.stack_base.load(Ordering::Relaxed) {
            NO_STACK_BASE => None,
            address => Some(address),
        }
    }

    /// Thread mode as last requested through this controller.
    pub fn mode(&self) -> Mode {
        if self.unprivileged.load(Ordering::Relaxed) {
            Mode::Unprivileged
        } else {
            Mode::Privileged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};
    use std::vec::Vec;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Unprivileged,
        Privileged,
        SetPsp(u32),
        SeparateStacks,
    }

    #[derive(Default)]
    struct Primitives {
        calls: RefCell<Vec<Call>>,
        psp: Cell<u32>,
    }

    impl StackPrimitives for Primitives {
        fn unprivileged_mode(&self) {
            self.calls.borrow_mut().push(Call::Unprivileged);
        }
        fn privileged_mode(&self) {
            self.calls.borrow_mut().push(Call::Privileged);
        }
        fn set_process_stack_pointer(&self, address: u32) {
            self.psp.set(address);
            self.calls.borrow_mut().push(Call::SetPsp(address));
        }
        fn process_stack_pointer(&self) -> u32 {
            self.psp.get()
        }
        fn main_stack_pointer(&self) -> u32 {
            0x2000_0400
        }
        fn enable_separate_stacks(&self, _thread: extern "C" fn() -> !) -> ! {
            self.calls.borrow_mut().push(Call::SeparateStacks);
            panic!("thread mode left on the process stack");
        }
    }

    extern "C" fn thread() -> ! {
        unreachable!("the host primitives never branch to the thread")
    }

    #[test]
    fn stack_is_set_up_before_demotion() {
        let primitives = Primitives::default();
        let controller = PrivilegeController::new(&primitives);
        assert_eq!(controller.mode(), Mode::Privileged);
        assert_eq!(controller.stack_base(), None);

        controller.set_stack_base(0x2000_8000);
        // Programming the stack does not move onto it.
        assert_eq!(*primitives.calls.borrow(), [Call::SetPsp(0x2000_8000)]);
        controller.enter_unprivileged();

        assert_eq!(controller.stack_base(), Some(0x2000_8000));
        assert_eq!(controller.mode(), Mode::Unprivileged);
        assert_eq!(controller.current_stack_pointer(), 0x2000_8000);
        assert_eq!(controller.main_stack_pointer(), 0x2000_0400);
        assert_eq!(
            *primitives.calls.borrow(),
            [Call::SetPsp(0x2000_8000), Call::Unprivileged]
        );
    }

    #[test]
    fn switching_stacks_does_not_return() {
        let primitives = Primitives::default();
        let controller = PrivilegeController::new(&primitives);
        controller.set_stack_base(0x2000_8000);

        let switched = panic::catch_unwind(AssertUnwindSafe(|| {
            controller.run_on_process_stack(thread)
        }));
        assert!(switched.is_err());
        assert_eq!(
            *primitives.calls.borrow(),
            [Call::SetPsp(0x2000_8000), Call::SeparateStacks]
        );
    }

    #[test]
    fn privileged_again() {
        let primitives = Primitives::default();
        let controller = PrivilegeController::new(&primitives);
        controller.set_stack_base(0x2000_8000);
        controller.enter_unprivileged();
        controller.enter_privileged();

        assert_eq!(controller.mode(), Mode::Privileged);
        assert_eq!(primitives.calls.borrow().last(), Some(&Call::Privileged));
    }

    #[test]
    #[should_panic(expected = "set_stack_base must precede enter_unprivileged")]
    #[cfg(debug_assertions)]
    fn demotion_without_stack_is_a_bug() {
        let primitives = Primitives::default();
        PrivilegeController::new(&primitives).enter_unprivileged();
    }
}

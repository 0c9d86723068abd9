// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Host stand-ins for the MPU, the System Control Block and the stack
//! primitives, for unit tests here and in board crates (`test_utils`
//! feature).
//!
//! They model the register behavior the rest of the crate relies on, such as
//! write-one-to-clear fault status, and record enough to check what was
//! written.

use core::cell::Cell;

use kernel::platform::fault::ExceptionFrame;
use kernel::platform::privilege::StackPrimitives;
use kernel::utilities::registers::{FieldValue, LocalRegisterCopy};

use crate::mpu::{Attributes, BaseAddress, Control, RegionRegisters};
use crate::scb::{FaultStatus, FaultStatusRegisters};
use crate::support::control;

/// Upper bound on the region slots a [`RecordingMpu`] can hold.
pub const MAX_REGIONS: usize = 16;

const MEMFAULTPENDED: u32 = 1 << 13;
const FAULT_HANDLERS_ENABLED: u32 = 0b111 << 16;

/// Register contents of a [`RecordingMpu`] at one point in time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MpuSnapshot {
    pub base_addresses: [u32; MAX_REGIONS],
    pub attributes: [u32; MAX_REGIONS],
    pub control: u32,
}

/// An MPU register file that remembers what was written to it.
pub struct RecordingMpu {
    data_regions: usize,
    base_addresses: [Cell<u32>; MAX_REGIONS],
    attributes: [Cell<u32>; MAX_REGIONS],
    control: Cell<u32>,
    writes: Cell<usize>,
}

impl RecordingMpu {
    /// An MPU with `data_regions` slots, all switched off.
    pub fn new(data_regions: usize) -> RecordingMpu {
        RecordingMpu {
            data_regions: data_regions.min(MAX_REGIONS),
            base_addresses: core::array::from_fn(|_| Cell::new(0)),
            attributes: core::array::from_fn(|_| Cell::new(0)),
            control: Cell::new(0),
            writes: Cell::new(0),
        }
    }

    /// Number of region writes so far.
    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn control(&self) -> u32 {
        self.control.get()
    }

    /// Raw RASR of slot `number`.
    pub fn attributes_of(&self, number: usize) -> u32 {
        self.attributes[number].get()
    }

    /// Raw RBAR of slot `number`.
    pub fn base_address_of(&self, number: usize) -> u32 {
        self.base_addresses[number].get()
    }

    pub fn snapshot(&self) -> MpuSnapshot {
        MpuSnapshot {
            base_addresses: core::array::from_fn(|number| self.base_addresses[number].get()),
            attributes: core::array::from_fn(|number| self.attributes[number].get()),
            control: self.control.get(),
        }
    }
}

impl RegionRegisters for RecordingMpu {
    fn data_regions(&self) -> usize {
        self.data_regions
    }

    fn write_region(&self, number: usize, base_address: BaseAddress, attributes: Attributes) {
        assert!(number < self.data_regions, "write to missing region {number}");
        self.base_addresses[number].set(base_address.get());
        self.attributes[number].set(attributes.get());
        self.writes.set(self.writes.get() + 1);
    }

    fn read_region(&self, number: usize) -> (BaseAddress, Attributes) {
        (
            LocalRegisterCopy::new(self.base_addresses[number].get()),
            LocalRegisterCopy::new(self.attributes[number].get()),
        )
    }

    fn write_control(&self, value: FieldValue<u32, Control::Register>) {
        self.control.set(value.value);
    }

    fn read_control(&self) -> LocalRegisterCopy<u32, Control::Register> {
        LocalRegisterCopy::new(self.control.get())
    }
}

/// A System Control Block with write-one-to-clear fault status.
#[derive(Default)]
pub struct FakeScb {
    fault_status: Cell<u32>,
    hard_fault_status: Cell<u32>,
    memory_fault_address: Cell<u32>,
    bus_fault_address: Cell<u32>,
    handler_control: Cell<u32>,
    pendsv_requests: Cell<usize>,
}

impl FakeScb {
    pub fn new() -> FakeScb {
        FakeScb::default()
    }

    /// Latches a memory management fault: sets `status` in MMFSR, the
    /// faulting address and the pending bit.
    pub fn raise_memory_fault(&self, status: u32, address: u32) {
        self.fault_status
            .set(self.fault_status.get() | (status & 0xFF));
        self.memory_fault_address.set(address);
        self.handler_control
            .set(self.handler_control.get() | MEMFAULTPENDED);
    }

    pub fn set_fault_status(&self, status: u32) {
        self.fault_status.set(status);
    }

    pub fn set_hard_fault_status(&self, status: u32) {
        self.hard_fault_status.set(status);
    }

    pub fn set_bus_fault_address(&self, address: u32) {
        self.bus_fault_address.set(address);
    }

    /// Raw CFSR.
    pub fn fault_status_bits(&self) -> u32 {
        self.fault_status.get()
    }

    pub fn pendsv_requests(&self) -> usize {
        self.pendsv_requests.get()
    }

    /// Whether memory management, bus and usage faults have their own
    /// handlers.
    pub fn fault_handlers_enabled(&self) -> bool {
        self.handler_control.get() & FAULT_HANDLERS_ENABLED == FAULT_HANDLERS_ENABLED
    }
}

impl FaultStatusRegisters for FakeScb {
    fn fault_status(&self) -> FaultStatus {
        LocalRegisterCopy::new(self.fault_status.get())
    }

    fn clear_fault_status(&self, flags: u32) {
        self.fault_status.set(self.fault_status.get() & !flags);
    }

    fn hard_fault_status(&self) -> u32 {
        self.hard_fault_status.get()
    }

    fn memory_fault_address(&self) -> u32 {
        self.memory_fault_address.get()
    }

    fn bus_fault_address(&self) -> u32 {
        self.bus_fault_address.get()
    }

    fn memory_fault_pending(&self) -> bool {
        self.handler_control.get() & MEMFAULTPENDED != 0
    }

    fn clear_memory_fault_pending(&self) {
        self.handler_control
            .set(self.handler_control.get() & !MEMFAULTPENDED);
    }

    fn pend_sv(&self) {
        self.pendsv_requests.set(self.pendsv_requests.get() + 1);
    }

    fn enable_fault_handlers(&self) {
        self.handler_control
            .set(self.handler_control.get() | FAULT_HANDLERS_ENABLED);
    }
}

/// Stack primitives backed by plain values, with a scripted exception frame.
#[derive(Default)]
pub struct ScriptedStack {
    process_stack_pointer: Cell<u32>,
    main_stack_pointer: Cell<u32>,
    control: Cell<u32>,
    frame: Cell<ExceptionFrame>,
    frame_read_from: Cell<Option<u32>>,
}

impl ScriptedStack {
    pub fn new() -> ScriptedStack {
        ScriptedStack::default()
    }

    pub fn set_main_stack_pointer(&self, address: u32) {
        self.main_stack_pointer.set(address);
    }

    /// The frame every `read_frame` returns.
    pub fn script_frame(&self, frame: ExceptionFrame) {
        self.frame.set(frame);
    }

    /// Address of the last `read_frame`.
    pub fn frame_read_from(&self) -> Option<u32> {
        self.frame_read_from.get()
    }

    pub fn is_unprivileged(&self) -> bool {
        self.control.get() & control::NPRIV != 0
    }

    pub fn uses_process_stack(&self) -> bool {
        self.control.get() & control::SPSEL != 0
    }
}

impl StackPrimitives for ScriptedStack {
    fn unprivileged_mode(&self) {
        self.control.set(self.control.get() | control::NPRIV);
    }

    fn privileged_mode(&self) {
        self.control.set(self.control.get() & !control::NPRIV);
    }

    fn set_process_stack_pointer(&self, address: u32) {
        self.process_stack_pointer.set(address);
    }

    fn process_stack_pointer(&self) -> u32 {
        self.process_stack_pointer.get()
    }

    fn main_stack_pointer(&self) -> u32 {
        self.main_stack_pointer.get()
    }

    /// Records the switch, then panics in place of branching to `thread`.
    fn enable_separate_stacks(&self, _thread: extern "C" fn() -> !) -> ! {
        self.control.set(self.control.get() | control::SPSEL);
        panic!("thread mode moved onto the process stack");
    }

    unsafe fn read_frame(&self, stack: u32) -> ExceptionFrame {
        self.frame_read_from.set(Some(stack));
        self.frame.get()
    }
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Fault handler bodies for the Cortex-M.
//!
//! Bus, usage and hard faults are captured and reported on the spot. Memory
//! management faults are split in two: the MemManage handler only captures
//! the record and acknowledges the hardware, then pends PendSV, whose handler
//! reports what was captured.
//!
//! The exception frame is read from whichever stack the interrupted code was
//! running on, as recorded in the `EXC_RETURN` value the handler was entered
//! with. Handler entry code passes it in as a [`TrapEntry`].

use kernel::deferred_call::{DeferredCall, DeferredSource};
use kernel::platform::fault::{AccessViolations, FaultKind, FaultRecord, StackPointers};
use kernel::platform::privilege::StackPrimitives;
use kernel::report::{self, ReportSink};
use kernel::utilities::StaticRef;

use crate::scb::{self, ConfigurableFaultStatus, FaultStatusRegisters};

/// Memory management status bits that the MemManage handler acknowledges.
/// The access violation bits are left for the deferred stage.
const MEMORY_MANAGEMENT_HOUSEKEEPING: u32 = 0xFF & !AccessViolations::all().bits();

/// `EXC_RETURN` bit set when the interrupted code ran on the process stack.
const EXC_RETURN_PROCESS_STACK: u32 = 1 << 2;

/// The state a handler was entered with, captured by its entry code before
/// any of it is clobbered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrapEntry {
    exc_return: u32,
    main_stack: u32,
}

impl TrapEntry {
    /// `exc_return` is `lr` on handler entry, `main_stack` is `msp` before
    /// the handler pushed anything.
    pub const fn new(exc_return: u32, main_stack: u32) -> TrapEntry {
        TrapEntry {
            exc_return,
            main_stack,
        }
    }

    pub const fn exc_return(&self) -> u32 {
        self.exc_return
    }

    pub const fn main_stack(&self) -> u32 {
        self.main_stack
    }

    /// Whether the frame was stacked on the process stack. Otherwise it is
    /// on the main stack, at [`main_stack`](TrapEntry::main_stack).
    pub const fn from_process_stack(&self) -> bool {
        self.exc_return & EXC_RETURN_PROCESS_STACK != 0
    }
}

pub struct FaultDispatcher<'a, S: FaultStatusRegisters + 'static, P: StackPrimitives> {
    scb: StaticRef<S>,
    stack: &'a P,
    deferred: &'a DeferredCall<FaultRecord>,
}

impl<'a, S: FaultStatusRegisters + 'static, P: StackPrimitives> FaultDispatcher<'a, S, P> {
    pub const fn new(
        scb: StaticRef<S>,
        stack: &'a P,
        deferred: &'a DeferredCall<FaultRecord>,
    ) -> FaultDispatcher<'a, S, P> {
        FaultDispatcher {
            scb,
            stack,
            deferred,
        }
    }

    /// Gives memory management, bus and usage faults their own handlers.
    /// Without this they escalate to hard fault.
    pub fn enable_fault_handlers(&self) {
        self.scb.enable_fault_handlers();
        log::debug!("memory management, bus and usage fault handlers enabled");
    }

    /// Snapshots the faulting context.
    ///
    /// # Safety
    ///
    /// `entry` must describe the entry to the running handler, so that the
    /// stack it selects addresses the frame stacked for it.
    unsafe fn capture(
        &self,
        entry: TrapEntry,
        kind: FaultKind,
        status: u32,
        data_address: Option<u32>,
    ) -> FaultRecord {
        let stack_pointers = StackPointers {
            process: self.stack.process_stack_pointer(),
            main: entry.main_stack(),
        };
        let frame_address = if entry.from_process_stack() {
            stack_pointers.process
        } else {
            stack_pointers.main
        };
        // SAFETY: guaranteed by the caller.
        let frame = unsafe { self.stack.read_frame(frame_address) };
        FaultRecord::decode(kind, &frame, stack_pointers, status, data_address)
    }

    // Reports go straight to the sink; the log only gets a trace line, since
    // a board logger may share the sink's device.
    fn report(&self, sink: &mut dyn ReportSink, record: &FaultRecord) {
        log::trace!(
            "{} at pc {:#010x}, status {:#010x}",
            record.kind,
            record.program_counter,
            record.status
        );
        report::report_fault(sink, record);
    }

    /// Body of the BusFault handler. Reports and returns.
    ///
    /// # Safety
    ///
    /// Must only be called from the BusFault handler, with the state it was
    /// entered with.
    pub unsafe fn bus_fault(&self, entry: TrapEntry, sink: &mut dyn ReportSink) -> FaultRecord {
        let status = scb::bus_status(self.scb.fault_status());
        // SAFETY: called from the handler, so the frame is live.
        let record = unsafe { self.capture(entry, FaultKind::Bus, status, None) };
        self.report(sink, &record);
        record
    }

    /// Body of the UsageFault handler. Reports and returns.
    ///
    /// # Safety
    ///
    /// Must only be called from the UsageFault handler, with the state it
    /// was entered with.
    pub unsafe fn usage_fault(&self, entry: TrapEntry, sink: &mut dyn ReportSink) -> FaultRecord {
        let status = scb::usage_status(self.scb.fault_status());
        // SAFETY: called from the handler, so the frame is live.
        let record = unsafe { self.capture(entry, FaultKind::Usage, status, None) };
        self.report(sink, &record);
        record
    }

    /// Body of the HardFault handler. Reports; the caller must not resume
    /// the faulted context.
    ///
    /// A hard fault escalated from another handler finds its frame on the
    /// main stack, which `entry` accounts for.
    ///
    /// # Safety
    ///
    /// Must only be called from the HardFault handler, with the state it was
    /// entered with.
    pub unsafe fn hard_fault(&self, entry: TrapEntry, sink: &mut dyn ReportSink) -> FaultRecord {
        let status = self.scb.hard_fault_status();
        // SAFETY: called from the handler, so the frame is live.
        let record = unsafe { self.capture(entry, FaultKind::Hard, status, None) };
        self.report(sink, &record);
        record
    }

    /// Body of the MemManage handler: the first of the two stages.
    ///
    /// Captures the record, including the faulting data address if the
    /// hardware latched one, acknowledges the pending fault and every
    /// status bit it saw except the access violations, and pends PendSV to
    /// run [`service_deferred`](FaultDispatcher::service_deferred).
    ///
    /// # Safety
    ///
    /// Must only be called from the MemManage handler, with the state it was
    /// entered with.
    pub unsafe fn memory_protection_fault(&self, entry: TrapEntry) -> FaultRecord {
        let status = self.scb.fault_status();
        let data_address = if status.is_set(ConfigurableFaultStatus::MMARVALID) {
            Some(self.scb.memory_fault_address())
        } else {
            None
        };
        let observed = scb::memory_management_status(status);
        // SAFETY: called from the handler, so the frame is live.
        let record =
            unsafe { self.capture(entry, FaultKind::MemoryProtection, observed, data_address) };

        // MMFAR is only read while MMARVALID is still set.
        self.scb.clear_memory_fault_pending();
        let housekeeping = observed & MEMORY_MANAGEMENT_HOUSEKEEPING;
        if housekeeping != 0 {
            self.scb.clear_fault_status(housekeeping);
        }

        self.deferred.post(DeferredSource::MEMORY_PROTECTION, record);
        self.scb.pend_sv();
        record
    }

    /// Body of the PendSV handler: the second stage.
    ///
    /// Clears whichever access violation flags are set and reports them,
    /// followed by the record queued by the first stage. The memory
    /// protection path is named whenever the first stage asked for the
    /// service, even if the fault it captured set no violation flag. Running
    /// it again with nothing new pending reports only the service line.
    pub fn service_deferred(&self, sink: &mut dyn ReportSink) -> AccessViolations {
        let observed = AccessViolations::classify(scb::memory_management_status(
            self.scb.fault_status(),
        ));
        if !observed.is_empty() {
            self.scb.clear_fault_status(observed.bits());
        }

        let (sources, queued) = match self.deferred.take() {
            Some(work) => (work.sources, work.payload),
            None => (DeferredSource::empty(), None),
        };
        let dropped = self.deferred.take_dropped();
        if dropped != 0 {
            log::warn!("{} memory protection records dropped", dropped);
        }
        if let Some(record) = queued.as_ref() {
            log::trace!(
                "{} at pc {:#010x}, data address {:?}",
                record.kind,
                record.program_counter,
                record.faulting_data_address
            );
        }
        report::report_deferred(sink, sources, observed, queued.as_ref());
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeScb, ScriptedStack};
    use kernel::platform::fault::ExceptionFrame;

    const DACCVIOL: u32 = 1 << 1;
    const IACCVIOL: u32 = 1 << 0;
    const MSTKERR: u32 = 1 << 4;
    const MMARVALID: u32 = 1 << 7;

    /// Entered from thread mode on the process stack.
    const FROM_THREAD: TrapEntry = TrapEntry::new(0xFFFF_FFFD, 0x2000_1000);

    const FRAME: ExceptionFrame = ExceptionFrame::from_words([
        0x2000_0000,
        0,
        0x11,
        0x22,
        0x33,
        0x0000_0411,
        0x0000_0A3C,
        0x0100_0000,
    ]);

    struct Fixture {
        scb: &'static FakeScb,
        stack: ScriptedStack,
        deferred: DeferredCall<FaultRecord>,
    }

    impl Fixture {
        fn new() -> Fixture {
            let stack = ScriptedStack::new();
            stack.set_process_stack_pointer(0x2000_7FE0);
            stack.script_frame(FRAME);
            Fixture {
                scb: Box::leak(Box::new(FakeScb::new())),
                stack,
                deferred: DeferredCall::new(),
            }
        }

        fn dispatcher(&self) -> FaultDispatcher<'_, FakeScb, ScriptedStack> {
            // SAFETY: leaked, so it outlives the dispatcher.
            FaultDispatcher::new(unsafe { StaticRef::new(self.scb) }, &self.stack, &self.deferred)
        }
    }

    #[test]
    fn unprivileged_write_reports_faulting_address() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture.scb.raise_memory_fault(DACCVIOL | MMARVALID, 0x2000_0000);

        // SAFETY: the fake stack scripts the frame.
        let record = unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
        assert_eq!(record.kind, FaultKind::MemoryProtection);
        assert_eq!(record.faulting_data_address, Some(0x2000_0000));
        assert_eq!(record.program_counter, 0x0A3C);
        assert_eq!(record.stack_pointers.process, 0x2000_7FE0);
        assert_eq!(fixture.stack.frame_read_from(), Some(0x2000_7FE0));

        // Stage one acknowledged everything but the violation and asked for
        // stage two.
        assert!(!fixture.scb.memory_fault_pending());
        assert_eq!(fixture.scb.fault_status_bits(), DACCVIOL);
        assert_eq!(fixture.scb.pendsv_requests(), 1);
        assert!(fixture.deferred.is_pending());

        let mut out = String::new();
        let violations = dispatcher.service_deferred(&mut out);
        assert_eq!(violations, AccessViolations::DATA);
        assert_eq!(fixture.scb.fault_status_bits(), 0);
        assert!(out.starts_with("PendSV service\r\nCalled from MPU\r\ndata access\r\n"));
        assert!(out.contains("MFault flags: 0x00000082\r\n"));
        assert!(out.contains("Offending data address: 0x20000000\r\n"));

        // Nothing left the second time round.
        let mut again = String::new();
        assert!(dispatcher.service_deferred(&mut again).is_empty());
        assert_eq!(again, "PendSV service\r\n");
    }

    #[test]
    fn two_faults_carry_distinct_addresses() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();

        let mut addresses = Vec::new();
        for address in [0x2000_1FFC, 0x2000_0000] {
            fixture.scb.raise_memory_fault(DACCVIOL | MMARVALID, address);
            // SAFETY: the fake stack scripts the frame.
            let record = unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
            addresses.push(record.faulting_data_address);
            let mut out = String::new();
            dispatcher.service_deferred(&mut out);
        }
        assert_eq!(addresses, [Some(0x2000_1FFC), Some(0x2000_0000)]);
    }

    #[test]
    fn address_ignored_unless_valid() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture.scb.raise_memory_fault(IACCVIOL, 0xDEAD_BEEF);

        // SAFETY: the fake stack scripts the frame.
        let record = unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
        assert_eq!(record.faulting_data_address, None);

        let mut out = String::new();
        assert_eq!(dispatcher.service_deferred(&mut out), AccessViolations::INSTRUCTION);
        assert!(out.contains("instruction access\r\n"));
        assert!(!out.contains("data access"));
        assert!(!out.contains("Offending data address"));
    }

    #[test]
    fn both_violations_are_cleared_independently() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture
            .scb
            .raise_memory_fault(IACCVIOL | DACCVIOL | MSTKERR | MMARVALID, 0x2000_0000);

        // SAFETY: the fake stack scripts the frame.
        unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
        assert_eq!(fixture.scb.fault_status_bits(), IACCVIOL | DACCVIOL);

        let mut out = String::new();
        assert_eq!(
            dispatcher.service_deferred(&mut out),
            AccessViolations::INSTRUCTION | AccessViolations::DATA
        );
        assert_eq!(fixture.scb.fault_status_bits(), 0);
    }

    #[test]
    fn other_classes_report_immediately() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture.scb.set_fault_status(0x0100_8200);
        fixture.scb.set_hard_fault_status(0x4000_0000);

        let mut out = String::new();
        // SAFETY: the fake stack scripts the frame.
        let bus = unsafe { dispatcher.bus_fault(FROM_THREAD, &mut out) };
        assert_eq!(bus.status, 0x82);
        assert!(out.contains("Bus fault flags: 0x00000082\r\n"));

        let mut out = String::new();
        // SAFETY: the fake stack scripts the frame.
        let usage = unsafe { dispatcher.usage_fault(FROM_THREAD, &mut out) };
        assert_eq!(usage.status, 0x0100);
        assert!(out.starts_with("\r\nUsage fault\r\n"));

        let mut out = String::new();
        // SAFETY: the fake stack scripts the frame.
        let hard = unsafe { dispatcher.hard_fault(FROM_THREAD, &mut out) };
        assert_eq!(hard.status, 0x4000_0000);
        assert!(out.contains("PSP: 0x20007FE0\r\nMSP: 0x20001000\r\nHard fault flags: 0x40000000\r\n"));

        // Nothing is acknowledged for these classes.
        assert_eq!(fixture.scb.fault_status_bits(), 0x0100_8200);
        assert_eq!(fixture.scb.pendsv_requests(), 0);
        assert!(!fixture.deferred.is_pending());
    }
    #[test]
    fn stacking_error_is_still_attributed_to_memory_protection() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture.scb.raise_memory_fault(MSTKERR, 0);

        // SAFETY: the fake stack scripts the frame.
        let record = unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
        assert_eq!(record.status, MSTKERR);
        // Stage one acknowledged the only flag there was.
        assert_eq!(fixture.scb.fault_status_bits(), 0);

        let mut out = String::new();
        assert!(dispatcher.service_deferred(&mut out).is_empty());
        assert!(out.starts_with("PendSV service\r\nCalled from MPU\r\n\r\nMPU fault\r\n"));
        assert!(out.contains("MFault flags: 0x00000010\r\n"));
        assert!(!out.contains("data access"));
        assert!(!out.contains("instruction access"));
    }

    #[test]
    fn escalated_hard_fault_reads_the_main_stack() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        fixture.scb.set_hard_fault_status(0x4000_0000);
        // Taken while PendSV was running, so the frame went onto MSP.
        let from_handler = TrapEntry::new(0xFFFF_FFF1, 0x2000_0FA0);
        assert!(!from_handler.from_process_stack());
        assert!(FROM_THREAD.from_process_stack());

        let mut out = String::new();
        // SAFETY: the fake stack scripts the frame.
        let record = unsafe { dispatcher.hard_fault(from_handler, &mut out) };
        assert_eq!(fixture.stack.frame_read_from(), Some(0x2000_0FA0));
        assert_eq!(record.stack_pointers.main, 0x2000_0FA0);
        assert_eq!(record.stack_pointers.process, 0x2000_7FE0);
        assert_eq!(record.program_counter, 0x0A3C);
        assert!(out.contains("MSP: 0x20000FA0\r\n"));
        assert!(out.contains("Offending instruction address: 0x00000A3C\r\n"));
    }

    #[test]
    fn dropped_records_are_counted_until_serviced() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();
        for address in [0x2000_0000, 0x2000_0100] {
            fixture.scb.raise_memory_fault(DACCVIOL | MMARVALID, address);
            // SAFETY: the fake stack scripts the frame.
            unsafe { dispatcher.memory_protection_fault(FROM_THREAD) };
        }
        assert_eq!(fixture.deferred.dropped(), 1);

        let mut out = String::new();
        dispatcher.service_deferred(&mut out);
        assert!(out.contains("Offending data address: 0x20000000\r\n"));
        assert_eq!(fixture.deferred.dropped(), 0);
    }
}

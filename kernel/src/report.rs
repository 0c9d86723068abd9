// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Fault reports.
//!
//! A report is a fixed sequence of `\r\n` terminated lines written to a
//! [`ReportSink`]. Words are always rendered as `0x` followed by eight
//! upper case hex digits, so reports from different faults line up.
//!
//! ```text
//!
//! MPU fault
//! PSP: 0x20007FE0
//! MSP: 0x20001000
//! MFault flags: 0x00000082
//! Offending instruction address: 0x00000A3C
//! Offending data address: 0x20000000
//! xPSR: 0x01000000
//! PC: 0x00000A3C
//! ...
//! ```

use core::fmt;

use crate::config::CONFIG;
use crate::deferred_call::DeferredSource;
use crate::platform::fault::{AccessViolations, FaultKind, FaultRecord};

/// Where fault reports are written.
///
/// Sinks must not fail: a fault handler has nowhere to report a failing
/// report to, so write errors are swallowed by the implementation.
pub trait ReportSink {
    fn put_str(&mut self, text: &str);

    /// Writes `word` as `0x` and eight zero padded hex digits.
    fn put_word(&mut self, word: u32);
}

impl<W: fmt::Write> ReportSink for W {
    fn put_str(&mut self, text: &str) {
        let _ = self.write_str(text);
    }

    fn put_word(&mut self, word: u32) {
        let _ = write!(self, "{:#010X}", word);
    }
}

const NEWLINE: &str = "\r\n";

/// Writes `text` followed by a line break.
pub fn line(sink: &mut dyn ReportSink, text: &str) {
    sink.put_str(text);
    sink.put_str(NEWLINE);
}

fn labelled_word(sink: &mut dyn ReportSink, label: &str, word: u32) {
    sink.put_str(label);
    sink.put_word(word);
    sink.put_str(NEWLINE);
}

/// Writes the full report for one trap.
///
/// The stacked register dump is left out when the kernel is built with
/// `no_fault_register_dump`. Memory protection and hard faults name the
/// faulting instruction either way.
pub fn report_fault(sink: &mut dyn ReportSink, record: &FaultRecord) {
    write_fault(sink, record, CONFIG.dump_fault_registers);
}

fn write_fault(sink: &mut dyn ReportSink, record: &FaultRecord, dump_registers: bool) {
    sink.put_str(NEWLINE);
    line(sink, record.kind.title());
    labelled_word(sink, "PSP: ", record.stack_pointers.process);
    labelled_word(sink, "MSP: ", record.stack_pointers.main);
    labelled_word(sink, record.kind.status_label(), record.status);

    if matches!(record.kind, FaultKind::MemoryProtection | FaultKind::Hard) {
        labelled_word(
            sink,
            "Offending instruction address: ",
            record.program_counter,
        );
    }
    if let Some(address) = record.faulting_data_address {
        labelled_word(sink, "Offending data address: ", address);
    }

    if dump_registers {
        let [r0, r1, r2, r3, r12] = record.general_registers;
        labelled_word(sink, "xPSR: ", record.program_status);
        labelled_word(sink, "PC: ", record.program_counter);
        labelled_word(sink, "LR: ", record.link_register);
        labelled_word(sink, "R12: ", r12);
        labelled_word(sink, "R3: ", r3);
        labelled_word(sink, "R2: ", r2);
        labelled_word(sink, "R1: ", r1);
        labelled_word(sink, "R0: ", r0);
    }
}

/// Writes the lines of the deferred service stage.
///
/// `sources` are the stage-one handlers that asked for the service and
/// `violations` the access violation flags the stage found and cleared.
/// Nothing but the service line is written when neither says the memory
/// protection path was involved.
pub fn report_deferred(
    sink: &mut dyn ReportSink,
    sources: DeferredSource,
    violations: AccessViolations,
    record: Option<&FaultRecord>,
) {
    line(sink, "PendSV service");
    if sources.contains(DeferredSource::MEMORY_PROTECTION) || !violations.is_empty() {
        line(sink, "Called from MPU");
        if violations.contains(AccessViolations::DATA) {
            line(sink, "data access");
        }
        if violations.contains(AccessViolations::INSTRUCTION) {
            line(sink, "instruction access");
        }
    }
    if let Some(record) = record {
        report_fault(sink, record);
    }
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Decoded view of a trap: which class fired, the registers the hardware
//! stacked, and the raw status it left behind.

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// The trap classes that are reported.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// External memory access error.
    Bus,
    /// Undefined, illegal or unaligned instruction.
    Usage,
    /// Escalation of a fault that could not be handled by its own class.
    Hard,
    /// Access policy violation reported by the MPU.
    MemoryProtection,
}

impl FaultKind {
    /// Header line used in fault reports.
    pub const fn title(self) -> &'static str {
        match self {
            FaultKind::Bus => "Bus fault",
            FaultKind::Usage => "Usage fault",
            FaultKind::Hard => "Hard fault",
            FaultKind::MemoryProtection => "MPU fault",
        }
    }

    /// Label of the status flag line in fault reports.
    pub const fn status_label(self) -> &'static str {
        match self {
            FaultKind::Bus => "Bus fault flags: ",
            FaultKind::Usage => "Usage fault flags: ",
            FaultKind::Hard => "Hard fault flags: ",
            FaultKind::MemoryProtection => "MFault flags: ",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// The eight words the processor pushes onto the active stack on exception
/// entry, in stacking order.
///
/// | Offset | Field  |
/// |--------|--------|
/// | 0x00   | `r0`   |
/// | 0x04   | `r1`   |
/// | 0x08   | `r2`   |
/// | 0x0C   | `r3`   |
/// | 0x10   | `r12`  |
/// | 0x14   | `lr`   |
/// | 0x18   | `pc`   |
/// | 0x1C   | `xpsr` |
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

const_assert_eq!(core::mem::size_of::<ExceptionFrame>(), 32);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, r12), 0x10);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, pc), 0x18);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, xpsr), 0x1C);

impl ExceptionFrame {
    /// Number of stacked words.
    pub const WORDS: usize = 8;

    pub const fn from_words(words: [u32; ExceptionFrame::WORDS]) -> ExceptionFrame {
        ExceptionFrame {
            r0: words[0],
            r1: words[1],
            r2: words[2],
            r3: words[3],
            r12: words[4],
            lr: words[5],
            pc: words[6],
            xpsr: words[7],
        }
    }

    /// Copies the frame out of the stack at `stack`.
    ///
    /// Every word is read exactly once, so the result is a snapshot that does
    /// not change if the stack is later reused.
    ///
    /// # Safety
    ///
    /// `stack` must point to eight readable, word aligned words, such as the
    /// frame the hardware stacked on exception entry.
    pub unsafe fn capture(stack: *const u32) -> ExceptionFrame {
        let mut words = [0; ExceptionFrame::WORDS];
        for (offset, word) in words.iter_mut().enumerate() {
            // SAFETY: the caller guarantees `stack` addresses WORDS readable
            // words.
            *word = unsafe { core::ptr::read_volatile(stack.add(offset)) };
        }
        ExceptionFrame::from_words(words)
    }
}

/// Stack pointers at the time of the trap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StackPointers {
    /// Stack of the (possibly unprivileged) thread that was running.
    pub process: u32,
    /// Stack the handler runs on.
    pub main: u32,
}

bitflags! {
    /// Access violation flags of the memory management fault status.
    ///
    /// The bit positions match MMFSR, so raw status can be classified
    /// directly.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct AccessViolations: u32 {
        /// Instruction fetch from a location that does not permit execution.
        const INSTRUCTION = 1 << 0;
        /// Load or store to a location that does not permit it.
        const DATA = 1 << 1;
    }
}

impl AccessViolations {
    /// The access violations set in `status`. Every other bit is ignored.
    pub const fn classify(status: u32) -> AccessViolations {
        AccessViolations::from_bits_truncate(status)
    }
}

/// Everything reported about one trap.
///
/// Built once on trap entry from a captured frame, handed to the report sink
/// and then dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaultRecord {
    pub kind: FaultKind,
    pub program_counter: u32,
    pub link_register: u32,
    /// `xPSR` as stacked.
    pub program_status: u32,
    pub stack_pointers: StackPointers,
    /// `r0`, `r1`, `r2`, `r3` and `r12`.
    pub general_registers: [u32; 5],
    /// Raw status flags of the trap class.
    pub status: u32,
    /// Address of the offending data access. Only ever present for memory
    /// protection faults whose address register was valid.
    pub faulting_data_address: Option<u32>,
}

impl FaultRecord {
    /// Builds the record for a trap. A pure function of its arguments.
    ///
    /// `data_address` is dropped for every class but
    /// [`FaultKind::MemoryProtection`].
    pub fn decode(
        kind: FaultKind,
        frame: &ExceptionFrame,
        stack_pointers: StackPointers,
        status: u32,
        data_address: Option<u32>,
    ) -> FaultRecord {
        FaultRecord {
            kind,
            program_counter: frame.pc,
            link_register: frame.lr,
            program_status: frame.xpsr,
            stack_pointers,
            general_registers: [frame.r0, frame.r1, frame.r2, frame.r3, frame.r12],
            status,
            faulting_data_address: match kind {
                FaultKind::MemoryProtection => data_address,
                FaultKind::Bus | FaultKind::Usage | FaultKind::Hard => None,
            },
        }
    }

    /// Access violation flags carried in the status, if this is a memory
    /// protection fault.
    pub fn access_violations(&self) -> AccessViolations {
        match self.kind {
            FaultKind::MemoryProtection => AccessViolations::classify(self.status),
            FaultKind::Bus | FaultKind::Usage | FaultKind::Hard => AccessViolations::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WORDS: [u32; 8] = [
        0x2000_0000,
        1,
        2,
        3,
        0x0000_0C0C,
        0x0000_0411,
        0x0000_0A3C,
        0x0100_0000,
    ];

    #[test]
    fn frame_words_land_in_named_fields() {
        let frame = ExceptionFrame::from_words(WORDS);
        assert_eq!(frame.r0, 0x2000_0000);
        assert_eq!(frame.r12, 0x0C0C);
        assert_eq!(frame.lr, 0x0411);
        assert_eq!(frame.pc, 0x0A3C);
        assert_eq!(frame.xpsr, 0x0100_0000);
    }

    #[test]
    fn capture_reads_stacked_words() {
        let stack = WORDS;
        // SAFETY: `stack` holds eight words.
        let frame = unsafe { ExceptionFrame::capture(stack.as_ptr()) };
        assert_eq!(frame, ExceptionFrame::from_words(WORDS));
    }

    #[test]
    fn data_address_only_for_memory_protection() {
        let frame = ExceptionFrame::from_words(WORDS);
        let pointers = StackPointers {
            process: 0x2000_7FE0,
            main: 0x2000_1000,
        };

        let mpu = FaultRecord::decode(
            FaultKind::MemoryProtection,
            &frame,
            pointers,
            0x82,
            Some(0x2000_0000),
        );
        assert_eq!(mpu.faulting_data_address, Some(0x2000_0000));
        assert_eq!(mpu.general_registers, [0x2000_0000, 1, 2, 3, 0x0C0C]);
        assert_eq!(mpu.access_violations(), AccessViolations::DATA);

        let bus = FaultRecord::decode(FaultKind::Bus, &frame, pointers, 0x8200, Some(0x1234));
        assert_eq!(bus.faulting_data_address, None);
        assert!(bus.access_violations().is_empty());
    }

    #[test]
    fn classify_keeps_only_violation_bits() {
        assert_eq!(
            AccessViolations::classify(0x83),
            AccessViolations::DATA | AccessViolations::INSTRUCTION
        );
        assert!(AccessViolations::classify(0x80).is_empty());
        assert!(AccessViolations::classify(0).is_empty());
    }

    proptest! {
        #[test]
        fn decode_is_deterministic(
            words in any::<[u32; 8]>(),
            process in any::<u32>(),
            main in any::<u32>(),
            status in any::<u32>(),
            address in any::<Option<u32>>(),
        ) {
            let pointers = StackPointers { process, main };
            let first = ExceptionFrame::from_words(words);
            let second = ExceptionFrame::from_words(words);
            for kind in [FaultKind::Bus, FaultKind::Usage, FaultKind::Hard, FaultKind::MemoryProtection] {
                prop_assert_eq!(
                    FaultRecord::decode(kind, &first, pointers, status, address),
                    FaultRecord::decode(kind, &second, pointers, status, address)
                );
            }
        }
    }
}

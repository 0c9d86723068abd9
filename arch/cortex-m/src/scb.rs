// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! ARM System Control Block: fault status and system handler control.
//!
//! <http://infocenter.arm.com/help/topic/com.arm.doc.dui0553a/Cihfaaha.html>

use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, register_structs, LocalRegisterCopy, ReadWrite,
};
use kernel::utilities::StaticRef;

register_structs! {
    /// System Control Block registers from `0xE000ED00`.
    pub ScbRegisters {
        (0x00 => _reserved0),
        (0x04 => icsr: ReadWrite<u32, InterruptControlAndState::Register>),
        (0x08 => _reserved1),
        (0x24 => shcsr: ReadWrite<u32, SystemHandlerControlAndState::Register>),
        (0x28 => cfsr: ReadWrite<u32, ConfigurableFaultStatus::Register>),
        (0x2C => hfsr: ReadWrite<u32, HardFaultStatus::Register>),
        (0x30 => _reserved2),
        (0x34 => mmfar: ReadWrite<u32>),
        (0x38 => bfar: ReadWrite<u32>),
        (0x3C => _reserved3),
        (0x40 => @END),
    }
}

register_bitfields![u32,
    pub InterruptControlAndState [
        /// Set the NMI exception pending.
        NMIPENDSET OFFSET(31) NUMBITS(1) [],
        /// Set the PendSV exception pending.
        PENDSVSET OFFSET(28) NUMBITS(1) [],
        /// Remove the pending state of the PendSV exception.
        PENDSVCLR OFFSET(27) NUMBITS(1) [],
        /// Set the SysTick exception pending.
        PENDSTSET OFFSET(26) NUMBITS(1) [],
        /// Remove the pending state of the SysTick exception.
        PENDSTCLR OFFSET(25) NUMBITS(1) [],
        /// Exception number of the currently active exception.
        VECTACTIVE OFFSET(0) NUMBITS(9) []
    ],

    pub SystemHandlerControlAndState [
        USGFAULTENA OFFSET(18) NUMBITS(1) [],
        BUSFAULTENA OFFSET(17) NUMBITS(1) [],
        MEMFAULTENA OFFSET(16) NUMBITS(1) [],
        SVCALLPENDED OFFSET(15) NUMBITS(1) [],
        BUSFAULTPENDED OFFSET(14) NUMBITS(1) [],
        MEMFAULTPENDED OFFSET(13) NUMBITS(1) [],
        USGFAULTPENDED OFFSET(12) NUMBITS(1) [],
        SYSTICKACT OFFSET(11) NUMBITS(1) [],
        PENDSVACT OFFSET(10) NUMBITS(1) [],
        MONITORACT OFFSET(8) NUMBITS(1) [],
        SVCALLACT OFFSET(7) NUMBITS(1) [],
        USGFAULTACT OFFSET(3) NUMBITS(1) [],
        BUSFAULTACT OFFSET(1) NUMBITS(1) [],
        MEMFAULTACT OFFSET(0) NUMBITS(1) []
    ],

    /// Every flag is cleared by writing one to it.
    pub ConfigurableFaultStatus [
        // Usage fault status (UFSR)
        DIVBYZERO OFFSET(25) NUMBITS(1) [],
        UNALIGNED OFFSET(24) NUMBITS(1) [],
        NOCP OFFSET(19) NUMBITS(1) [],
        INVPC OFFSET(18) NUMBITS(1) [],
        INVSTATE OFFSET(17) NUMBITS(1) [],
        UNDEFINSTR OFFSET(16) NUMBITS(1) [],

        // Bus fault status (BFSR)
        BFARVALID OFFSET(15) NUMBITS(1) [],
        LSPERR OFFSET(13) NUMBITS(1) [],
        STKERR OFFSET(12) NUMBITS(1) [],
        UNSTKERR OFFSET(11) NUMBITS(1) [],
        IMPRECISERR OFFSET(10) NUMBITS(1) [],
        PRECISERR OFFSET(9) NUMBITS(1) [],
        IBUSERR OFFSET(8) NUMBITS(1) [],

        // Memory management fault status (MMFSR)
        MMARVALID OFFSET(7) NUMBITS(1) [],
        MLSPERR OFFSET(5) NUMBITS(1) [],
        MSTKERR OFFSET(4) NUMBITS(1) [],
        MUNSTKERR OFFSET(3) NUMBITS(1) [],
        DACCVIOL OFFSET(1) NUMBITS(1) [],
        IACCVIOL OFFSET(0) NUMBITS(1) [],

        UFSR OFFSET(16) NUMBITS(16) [],
        BFSR OFFSET(8) NUMBITS(8) [],
        MMFSR OFFSET(0) NUMBITS(8) []
    ],

    pub HardFaultStatus [
        DEBUGEVT OFFSET(31) NUMBITS(1) [],
        FORCED OFFSET(30) NUMBITS(1) [],
        VECTTBL OFFSET(1) NUMBITS(1) []
    ]
];

const SCB_BASE: StaticRef<ScbRegisters> =
    unsafe { StaticRef::new(0xE000ED00 as *const ScbRegisters) };

/// The memory mapped System Control Block.
///
/// # Safety
///
/// Callers must only use the returned reference from handler or privileged
/// code on a Cortex-M.
pub const unsafe fn registers() -> StaticRef<ScbRegisters> {
    SCB_BASE
}

pub type FaultStatus = LocalRegisterCopy<u32, ConfigurableFaultStatus::Register>;

/// The fault status and handler control surface fault handling needs.
///
/// Implemented for the memory mapped [`ScbRegisters`] and for the fakes in
/// `crate::testing`.
pub trait FaultStatusRegisters {
    /// CFSR: memory management, bus and usage fault status together.
    fn fault_status(&self) -> FaultStatus;

    /// Clears the CFSR flags set in `flags`. Every other flag is kept.
    fn clear_fault_status(&self, flags: u32);

    /// HFSR, raw.
    fn hard_fault_status(&self) -> u32;

    /// MMFAR. Only meaningful while `MMARVALID` is set.
    fn memory_fault_address(&self) -> u32;

    /// BFAR. Only meaningful while `BFARVALID` is set.
    fn bus_fault_address(&self) -> u32;

    fn memory_fault_pending(&self) -> bool;

    fn clear_memory_fault_pending(&self);

    /// Requests the PendSV exception.
    fn pend_sv(&self);

    /// Routes memory management, bus and usage faults to their own handlers
    /// instead of escalating them to hard fault.
    fn enable_fault_handlers(&self);
}

impl FaultStatusRegisters for ScbRegisters {
    fn fault_status(&self) -> FaultStatus {
        self.cfsr.extract()
    }

    fn clear_fault_status(&self, flags: u32) {
        self.cfsr.set(flags);
    }

    fn hard_fault_status(&self) -> u32 {
        self.hfsr.get()
    }

    fn memory_fault_address(&self) -> u32 {
        self.mmfar.get()
    }

    fn bus_fault_address(&self) -> u32 {
        self.bfar.get()
    }

    fn memory_fault_pending(&self) -> bool {
        self.shcsr
            .is_set(SystemHandlerControlAndState::MEMFAULTPENDED)
    }

    fn clear_memory_fault_pending(&self) {
        self.shcsr
            .modify(SystemHandlerControlAndState::MEMFAULTPENDED::CLEAR);
    }

    fn pend_sv(&self) {
        self.icsr.write(InterruptControlAndState::PENDSVSET::SET);
    }

    fn enable_fault_handlers(&self) {
        self.shcsr.modify(
            SystemHandlerControlAndState::MEMFAULTENA::SET
                + SystemHandlerControlAndState::BUSFAULTENA::SET
                + SystemHandlerControlAndState::USGFAULTENA::SET,
        );
    }
}

/// Memory management fault status (MMFSR) in bits 7:0.
pub fn memory_management_status(status: FaultStatus) -> u32 {
    status.read(ConfigurableFaultStatus::MMFSR)
}

/// Bus fault status (BFSR), shifted down to bits 7:0.
pub fn bus_status(status: FaultStatus) -> u32 {
    status.read(ConfigurableFaultStatus::BFSR)
}

/// Usage fault status (UFSR), shifted down to bits 15:0.
pub fn usage_status(status: FaultStatus) -> u32 {
    status.read(ConfigurableFaultStatus::UFSR)
}

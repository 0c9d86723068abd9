// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Console on UART0 (PA0/PA1, routed to the debugger's virtual COM port)
//! and the `log` backend that writes to it.

use core::fmt::{self, Write};

use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadOnly, ReadWrite};
use kernel::utilities::StaticRef;
use log::{Level, LevelFilter, Metadata, Record};

register_structs! {
    pub UartRegisters {
        (0x00 => dr: ReadWrite<u32>),
        (0x04 => _reserved0),
        (0x18 => fr: ReadOnly<u32, Flag::Register>),
        (0x1C => _reserved1),
        (0x24 => ibrd: ReadWrite<u32>),
        (0x28 => fbrd: ReadWrite<u32>),
        (0x2C => lcrh: ReadWrite<u32, LineControl::Register>),
        (0x30 => ctl: ReadWrite<u32, Control::Register>),
        (0x34 => @END),
    }
}

register_bitfields![u32,
    Flag [
        /// Transmit FIFO full
        TXFF OFFSET(5) NUMBITS(1) [],
        /// Busy transmitting
        BUSY OFFSET(3) NUMBITS(1) []
    ],
    LineControl [
        WLEN OFFSET(5) NUMBITS(2) [
            Bits8 = 0b11
        ],
        /// Enable FIFOs
        FEN OFFSET(4) NUMBITS(1) []
    ],
    Control [
        RXE OFFSET(9) NUMBITS(1) [],
        TXE OFFSET(8) NUMBITS(1) [],
        UARTEN OFFSET(0) NUMBITS(1) []
    ]
];

register_structs! {
    /// The clock gating and pin mux registers UART0 depends on.
    pub PinmuxRegisters {
        (0x000 => _reserved0),
        (0x420 => afsel: ReadWrite<u32>),
        (0x424 => _reserved1),
        (0x51C => den: ReadWrite<u32>),
        (0x520 => _reserved2),
        (0x52C => pctl: ReadWrite<u32>),
        (0x530 => @END),
    }
}

const UART0_BASE: StaticRef<UartRegisters> =
    unsafe { StaticRef::new(0x4000_C000 as *const UartRegisters) };

const GPIO_PORTA_BASE: StaticRef<PinmuxRegisters> =
    unsafe { StaticRef::new(0x4000_4000 as *const PinmuxRegisters) };

const SYSCTL_RCGCUART: *mut u32 = 0x400F_E618 as *mut u32;
const SYSCTL_RCGCGPIO: *mut u32 = 0x400F_E608 as *mut u32;

/// PA0 and PA1.
const UART0_PINS: u32 = 0b11;

/// 115200 baud from the 16 MHz precision oscillator the core runs on out
/// of reset: 16 MHz / (16 * 115200) = 8 + 44/64.
const IBRD_115200: u32 = 8;
const FBRD_115200: u32 = 44;

pub struct Uart {
    registers: StaticRef<UartRegisters>,
}

impl Uart {
    /// # Safety
    ///
    /// `registers` must be a UART register block that nothing else drives
    /// concurrently.
    pub const unsafe fn new(registers: StaticRef<UartRegisters>) -> Uart {
        Uart { registers }
    }

    /// UART0 of the board.
    ///
    /// # Safety
    ///
    /// Same as [`Uart::new`]. Fault handlers may create their own instance
    /// since output is written byte by byte.
    pub const unsafe fn uart0() -> Uart {
        Uart {
            registers: UART0_BASE,
        }
    }

    /// Sets up 8N1 at 115200 baud with FIFOs.
    pub fn configure(&self) {
        let regs = self.registers;
        regs.ctl.set(0);
        regs.ibrd.set(IBRD_115200);
        regs.fbrd.set(FBRD_115200);
        regs.lcrh
            .write(LineControl::WLEN::Bits8 + LineControl::FEN::SET);
        regs.ctl
            .modify(Control::UARTEN::SET + Control::TXE::SET + Control::RXE::SET);
    }

    pub fn send_byte(&self, byte: u8) {
        while self.registers.fr.is_set(Flag::TXFF) {}
        self.registers.dr.set(u32::from(byte));
    }
}

impl Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.send_byte(byte);
        }
        Ok(())
    }
}

/// Turns on the clocks of UART0 and GPIO port A and hands PA0/PA1 to the
/// UART.
///
/// # Safety
///
/// Must run once, privileged, before UART0 is used.
pub unsafe fn init_uart0_pins() {
    // SAFETY: fixed system control registers of the TM4C123GH6PM.
    unsafe {
        SYSCTL_RCGCUART.write_volatile(SYSCTL_RCGCUART.read_volatile() | 1);
        SYSCTL_RCGCGPIO.write_volatile(SYSCTL_RCGCGPIO.read_volatile() | 1);
    }
    // Peripheral clocks need a few cycles before the registers respond.
    for _ in 0..3 {
        cortexm::support::nop();
    }
    let port = GPIO_PORTA_BASE;
    port.afsel.set(port.afsel.get() | UART0_PINS);
    port.den.set(port.den.get() | UART0_PINS);
    port.pctl.set((port.pctl.get() & !0xFF) | 0x11);
}

struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // SAFETY: output is written byte by byte, so interleaving with a
            // handler only garbles text.
            let mut uart = unsafe { Uart::uart0() };
            let _ = write!(
                uart,
                "[{:<5} {}] {}\r\n",
                level_name(record.level()),
                record.module_path_static().unwrap_or_default(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Routes `log` output to UART0. Only the first call installs the logger.
pub fn init_logger(filter: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_go_to_the_data_register() {
        // Zeroed: the transmit FIFO never reports full.
        let registers: &'static mut [u32; 13] = Box::leak(Box::new([0; 13]));
        let base = registers.as_mut_ptr().cast::<UartRegisters>().cast_const();
        // SAFETY: the leaked buffer is as large as the register block.
        let mut uart = unsafe { Uart::new(StaticRef::new(base)) };

        uart.configure();
        write!(uart, "ok").unwrap();

        assert_eq!(registers[0], u32::from(b'k'));
        assert_eq!(registers[9], 8);
        assert_eq!(registers[10], 44);
        assert_eq!(registers[11], 0x70);
        assert_eq!(registers[12], 0x301);
    }
}

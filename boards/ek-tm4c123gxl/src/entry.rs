// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Reset, the vector table and the exception handlers.

use core::arch::global_asm;
use core::panic::PanicInfo;
use core::ptr::{addr_of, addr_of_mut};

use cortexm::fault::{FaultDispatcher, TrapEntry};
use cortexm::mpu::MpuRegisters;
use cortexm::scb::{self, ScbRegisters};
use cortexm::support::{self, CortexMStack};
use kernel::deferred_call::DeferredCall;
use kernel::platform::fault::FaultRecord;
use kernel::platform::privilege::PrivilegeController;
use kernel::report;
use log::LevelFilter;

use crate::io::{self, Uart};
use crate::{boot, probe};

extern "C" {
    // _estack is not really a function, but it makes the types work
    // You should never actually invoke it!!
    fn _estack();
    static mut _szero: u32;
    static mut _ezero: u32;
    static _etext: u32;
    static mut _srelocate: u32;
    static mut _erelocate: u32;

    // Entry trampolines, defined in assembly below.
    fn hard_fault_handler();
    fn mem_manage_handler();
    fn bus_fault_handler();
    fn usage_fault_handler();
}

/// The cortex-m MPU has eight regions.
type BoardMpu = cortexm::mpu::MPU<8, MpuRegisters>;

// SAFETY: only ever used from this core.
static STACK: CortexMStack = unsafe { CortexMStack::new() };

static MEMORY_FAULTS: DeferredCall<FaultRecord> = DeferredCall::new();

static PRIVILEGE: PrivilegeController<'static, CortexMStack> = PrivilegeController::new(&STACK);

fn faults() -> FaultDispatcher<'static, ScbRegisters, CortexMStack> {
    // SAFETY: the System Control Block of this core.
    FaultDispatcher::new(unsafe { scb::registers() }, &STACK, &MEMORY_FAULTS)
}

fn console() -> Uart {
    // SAFETY: output is written byte by byte; see `io::Uart::uart0`.
    unsafe { Uart::uart0() }
}

#[link_section = ".vectors"]
#[used]
#[no_mangle]
pub static BASE_VECTORS: [unsafe extern "C" fn(); 16] = [
    _estack,
    reset_handler,
    unhandled_interrupt, // NMI
    hard_fault_handler,
    mem_manage_handler,
    bus_fault_handler,
    usage_fault_handler,
    unhandled_interrupt,
    unhandled_interrupt,
    unhandled_interrupt,
    unhandled_interrupt,
    unhandled_interrupt, // SVC
    unhandled_interrupt, // DebugMon
    unhandled_interrupt,
    pend_sv_handler,
    unhandled_interrupt, // SysTick
];

/// Copies `.data` into RAM, zeroes `.bss` and runs [`main`].
#[no_mangle]
pub unsafe extern "C" fn reset_handler() {
    // SAFETY: the linker script places these symbols around word aligned
    // sections; nothing has touched RAM yet.
    unsafe {
        let mut source = addr_of!(_etext);
        let mut destination = addr_of_mut!(_srelocate);
        while destination < addr_of_mut!(_erelocate) {
            destination.write_volatile(source.read_volatile());
            source = source.add(1);
            destination = destination.add(1);
        }

        let mut zero = addr_of_mut!(_szero);
        while zero < addr_of_mut!(_ezero) {
            zero.write_volatile(0);
            zero = zero.add(1);
        }
    }
    main()
}

fn main() -> ! {
    // SAFETY: first and only initialization of the console, privileged.
    unsafe { io::init_uart0_pins() };
    console().configure();
    io::init_logger(LevelFilter::Debug);

    boot::prepare(&faults(), &PRIVILEGE);
    PRIVILEGE.run_on_process_stack(process_thread)
}

/// Thread mode on the process stack.
extern "C" fn process_thread() -> ! {
    // SAFETY: the only MPU instance.
    let mpu: BoardMpu = unsafe { BoardMpu::new() };

    if boot::start(&mpu, &PRIVILEGE, &mut console()).is_ok() {
        probe::run(&mut console(), |address| {
            // SAFETY: the first probe lands in the unused top of SRAM, the
            // second is rejected by the MPU.
            unsafe { probe::write_word(address) }
        });
    }

    loop {
        // SAFETY: PendSV and the fault handlers wake the core.
        unsafe { support::wfi() };
    }
}

// Each fault vector passes `lr` (EXC_RETURN) and the untouched `msp` to its
// handler body and tail calls it, so the body returns straight from the
// exception.
macro_rules! fault_entry {
    ($vector:literal, $body:ident) => {
        global_asm!(
            concat!(".section .text.", $vector),
            concat!(".global ", $vector),
            concat!(".type ", $vector, ", %function"),
            ".thumb_func",
            concat!($vector, ":"),
            "    mov r0, lr",
            "    mrs r1, msp",
            "    b {body}",
            body = sym $body,
        );
    };
}

fault_entry!("hard_fault_handler", hard_fault);
fault_entry!("mem_manage_handler", mem_manage);
fault_entry!("bus_fault_handler", bus_fault);
fault_entry!("usage_fault_handler", usage_fault);

unsafe extern "C" fn mem_manage(exc_return: u32, main_stack: u32) {
    // SAFETY: MemManage entry.
    unsafe { faults().memory_protection_fault(TrapEntry::new(exc_return, main_stack)) };
}

#[no_mangle]
pub unsafe extern "C" fn pend_sv_handler() {
    faults().service_deferred(&mut console());
}

unsafe extern "C" fn bus_fault(exc_return: u32, main_stack: u32) {
    let entry = TrapEntry::new(exc_return, main_stack);
    // SAFETY: BusFault entry.
    unsafe { faults().bus_fault(entry, &mut console()) };
}

unsafe extern "C" fn usage_fault(exc_return: u32, main_stack: u32) {
    let entry = TrapEntry::new(exc_return, main_stack);
    // SAFETY: UsageFault entry.
    unsafe { faults().usage_fault(entry, &mut console()) };
}

/// Reports and stops: a hard fault is never resumed.
unsafe extern "C" fn hard_fault(exc_return: u32, main_stack: u32) {
    let entry = TrapEntry::new(exc_return, main_stack);
    // SAFETY: HardFault entry.
    unsafe { faults().hard_fault(entry, &mut console()) };
    loop {
        // SAFETY: nothing is left to run; sleep until reset.
        unsafe { support::wfi() };
    }
}

#[no_mangle]
pub unsafe extern "C" fn unhandled_interrupt() {
    report::line(&mut console(), "Unhandled exception");
    loop {
        // SAFETY: nothing is left to run.
        unsafe { support::wfi() };
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    use core::fmt::Write;
    let _ = write!(console(), "\r\nPanic: {}\r\n", info);
    loop {
        // SAFETY: nothing is left to run.
        unsafe { support::wfi() };
    }
}

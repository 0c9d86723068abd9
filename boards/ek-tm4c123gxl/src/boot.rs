// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Board bring-up, up to the point where thread mode is unprivileged.

use cortexm::fault::FaultDispatcher;
use cortexm::scb::FaultStatusRegisters;
use kernel::platform::mpu::MPU;
use kernel::platform::privilege::{PrivilegeController, StackPrimitives};
use kernel::report::{self, ReportSink};
use kernel::ConfigError;

use crate::layout;

/// Board bring-up happens in two halves around the move onto the process
/// stack:
///
/// 1. [`prepare`] gives memory management, bus and usage faults their own
///    handlers and programs the process stack at
///    [`layout::PROCESS_STACK_TOP`],
/// 2. the entry point moves thread mode onto that stack with
///    [`PrivilegeController::run_on_process_stack`],
/// 3. [`start`], running on the process stack, reports `Starting`, commits
///    [`layout::REGIONS`] and drops thread mode to unprivileged.
pub fn prepare<S, P>(faults: &FaultDispatcher<'_, S, P>, privilege: &PrivilegeController<'_, P>)
where
    S: FaultStatusRegisters + 'static,
    P: StackPrimitives,
{
    faults.enable_fault_handlers();
    privilege.set_stack_base(layout::PROCESS_STACK_TOP);
}

/// The second half of bring-up, see [`prepare`].
///
/// # Errors
///
/// If the region table is rejected, nothing is enforced and thread mode
/// stays privileged.
pub fn start<M, P>(
    mpu: &M,
    privilege: &PrivilegeController<'_, P>,
    sink: &mut dyn ReportSink,
) -> Result<(), ConfigError>
where
    M: MPU,
    P: StackPrimitives,
{
    report::line(sink, "Starting");

    if let Err(error) = mpu.commit(&layout::region_table()) {
        log::error!("region table rejected: {}", error);
        return Err(error);
    }
    log::info!("{} regions committed", layout::REGIONS.len());

    privilege.enter_unprivileged();
    Ok(())
}

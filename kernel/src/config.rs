// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options in the
//! kernel.
//!
//! The rationale for using these settings is that they can be used to remove
//! debugging tools from production builds, without requiring boards to patch
//! the kernel crate. Each option is selected by a cargo feature of this crate
//! and read through the global [`CONFIG`] constant, so disabled paths are
//! removed by constant folding.

/// Data structure holding compile-time configuration options.
pub struct Config {
    /// Whether fault reports include the stacked register dump (`xPSR`, `PC`,
    /// `LR`, `R12`, `R3`..`R0`).
    ///
    /// The header, stack pointers and status flags are always reported.
    pub dump_fault_registers: bool,

    /// Whether committing a region table traces every region register write
    /// through the `log` facade.
    pub trace_mpu_commit: bool,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined.
pub const CONFIG: Config = Config {
    dump_fault_registers: !cfg!(feature = "no_fault_register_dump"),
    trace_mpu_commit: cfg!(feature = "trace_mpu_commit"),
};

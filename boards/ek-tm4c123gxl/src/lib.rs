// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Board file for the EK-TM4C123GXL LaunchPad.
//!
//! - <https://www.ti.com/tool/EK-TM4C123GXL>
//!
//! Commits a fixed memory protection layout, drops to an unprivileged
//! thread, and lets that thread touch one open and one protected word of
//! SRAM. The resulting memory management fault is reported over UART0.

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod io;
pub mod layout;
pub mod probe;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod entry;

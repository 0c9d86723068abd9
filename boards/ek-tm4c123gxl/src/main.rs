// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Firmware image. Everything lives in the library; this only pulls in the
//! vector table and handlers when building for the board.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std, no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
use ek_tm4c123gxl as _;

/// Host builds have no firmware to run.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}

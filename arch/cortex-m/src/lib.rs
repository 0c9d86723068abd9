// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Generic support for ARMv7-M Cortex-M cores: the PMSAv7 memory protection
//! unit, fault status in the System Control Block, and the handler bodies
//! that turn a fault into a report.

#![cfg_attr(not(test), no_std)]

pub mod fault;
pub mod mpu;
pub mod scb;
pub mod support;

#[cfg(any(test, feature = "test_utils"))]
pub mod testing;

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Architecture-independent core for memory protection and fault reporting.
//!
//! Most of this crate describes *what* the protection hardware should
//! enforce and *what* a fault looked like, without touching any registers:
//!
//!  - [`platform::mpu`]: protection regions, the region table and the
//!    priority rule that decides the effective permissions at an address.
//!  - [`platform::fault`]: the stacked exception frame and the record that is
//!    reported for every trap.
//!  - [`platform::privilege`]: the controller that demotes thread mode onto
//!    its own stack.
//!  - [`deferred_call`]: the hand-off between a short fault handler and the
//!    lower priority stage that reports it.
//!  - [`report`]: the sink faults are written to.
//!
//! Architecture crates implement the traits in [`platform`] on top of real
//! hardware.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod deferred_call;
pub mod platform;
pub mod report;
pub mod utilities;

pub use crate::platform::mpu::ConfigError;

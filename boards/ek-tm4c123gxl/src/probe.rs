// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The unprivileged thread that exercises the protection layout.

use kernel::report::{self, ReportSink};

/// Last word of the top SRAM block. Its subregion is disabled, so the
/// background region decides, and it lets unprivileged writes through.
pub const OPEN_WORD: u32 = 0x2000_7FFC;

/// First word of SRAM, inside a privileged-only block.
pub const PROTECTED_WORD: u32 = 0x2000_0000;

pub const PROBES: [(u32, &str); 2] = [
    (
        OPEN_WORD,
        "Trying to access an address that falls under subregion 31 of the SRAM",
    ),
    (
        PROTECTED_WORD,
        "Now trying to access an address that falls under subregion 0 of the SRAM",
    ),
];

/// Announces each probe on `sink`, then hands its address to `write`.
///
/// On hardware the second write faults and does not come back.
pub fn run(sink: &mut dyn ReportSink, mut write: impl FnMut(u32)) {
    sink.put_str("\r\n");
    for (address, announcement) in PROBES {
        report::line(sink, announcement);
        write(address);
    }
}

/// Stores zero to `address`.
///
/// # Safety
///
/// `address` must be a word aligned location whose corruption is harmless,
/// or one the MPU is expected to reject.
pub unsafe fn write_word(address: u32) {
    // SAFETY: guaranteed by the caller.
    unsafe { (address as usize as *mut u32).write_volatile(0) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announces_then_writes_in_order() {
        let mut out = String::new();
        let mut written = Vec::new();
        run(&mut out, |address| written.push(address));

        assert_eq!(written, [OPEN_WORD, PROTECTED_WORD]);
        assert!(out.starts_with("\r\nTrying to access"));
        assert!(out.ends_with("subregion 0 of the SRAM\r\n"));
    }
}

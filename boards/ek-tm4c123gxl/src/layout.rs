// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Memory protection layout of the TM4C123GH6PM.
//!
//! ```text
//!  region 0  4 GiB background     RW / RW   execute never
//!  region 1  256 KiB flash        RW / RW   executable
//!  region 2  SRAM 0x2000_0000     RW / --   execute never
//!  region 3  SRAM 0x2000_2000     RW / --   execute never
//!  region 4  SRAM 0x2000_4000     RW / --   execute never
//!  region 5  SRAM 0x2000_6000     RW / --   execute never, top 1 KiB
//!                                           left to region 0
//! ```
//!
//! The top kilobyte of SRAM, which holds the process stack, is therefore
//! open to unprivileged code while the rest of SRAM is not.

use kernel::platform::mpu::{
    Access, MemoryAttributes, Permissions, RegionDescriptor, RegionTable, Subregions,
};

pub const FLASH_BASE: u32 = 0x0000_0000;
pub const FLASH_SIZE_POW2: u8 = 18;

pub const SRAM_BASE: u32 = 0x2000_0000;
pub const SRAM_BLOCK_SIZE_POW2: u8 = 13;
pub const SRAM_BLOCKS: usize = 4;

/// Initial process stack pointer: the end of SRAM.
pub const PROCESS_STACK_TOP: u32 = 0x2000_8000;

const SHAREABLE: MemoryAttributes = MemoryAttributes {
    shareable: true,
    cacheable: false,
    bufferable: false,
};

const CACHEABLE: MemoryAttributes = MemoryAttributes {
    shareable: false,
    cacheable: true,
    bufferable: false,
};

const INTERNAL_SRAM: MemoryAttributes = MemoryAttributes {
    shareable: true,
    cacheable: true,
    bufferable: false,
};

const OPEN_DATA: Permissions = Permissions::new(Access::ReadWrite, Access::ReadWrite, false);
const OPEN_CODE: Permissions = Permissions::new(Access::ReadWrite, Access::ReadWrite, true);
const PRIVILEGED_DATA: Permissions = Permissions::new(Access::ReadWrite, Access::NoAccess, false);

const fn sram_block(block: usize) -> RegionDescriptor {
    RegionDescriptor::new(
        2 + block,
        SRAM_BASE + (block as u32) * (1 << SRAM_BLOCK_SIZE_POW2),
        SRAM_BLOCK_SIZE_POW2,
        PRIVILEGED_DATA,
    )
    .with_attributes(INTERNAL_SRAM)
}

pub static REGIONS: [RegionDescriptor; 2 + SRAM_BLOCKS] = [
    RegionDescriptor::background(OPEN_DATA).with_attributes(SHAREABLE),
    RegionDescriptor::new(1, FLASH_BASE, FLASH_SIZE_POW2, OPEN_CODE).with_attributes(CACHEABLE),
    sram_block(0),
    sram_block(1),
    sram_block(2),
    sram_block(3).with_disabled_subregions(Subregions::NONE_DISABLED.disable(7)),
];

/// The table committed at boot.
pub fn region_table() -> RegionTable<'static> {
    RegionTable::new(&REGIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexm::mpu::CortexMRegion;
    use kernel::platform::mpu::{AccessKind, Mode};

    #[test]
    fn table_is_valid() {
        assert_eq!(region_table().validate(), Ok(()));
    }

    #[test]
    fn attribute_words_match_the_reference_firmware() {
        let words: Vec<u32> = REGIONS
            .iter()
            .map(|region| CortexMRegion::encode(region).unwrap().attributes().get())
            .collect();
        assert_eq!(
            words,
            [
                0x1304_003F,
                0x0302_0023,
                0x1106_0019,
                0x1106_0019,
                0x1106_0019,
                0x1106_8019
            ]
        );

        let bases: Vec<u32> = REGIONS
            .iter()
            .map(|region| CortexMRegion::encode(region).unwrap().base_address().get())
            .collect();
        assert_eq!(
            bases,
            [0, 0, 0x2000_0000, 0x2000_2000, 0x2000_4000, 0x2000_6000]
        );
    }

    #[test]
    fn process_stack_is_open_and_sram_is_not() {
        let table = region_table();
        assert_eq!(table.resolve(0x2000_7FFC).map(RegionDescriptor::index), Some(0));
        assert!(table.permits(0x2000_7FFC, Mode::Unprivileged, AccessKind::Write));

        assert_eq!(table.resolve(0x2000_0000).map(RegionDescriptor::index), Some(2));
        assert!(!table.permits(0x2000_0000, Mode::Unprivileged, AccessKind::Write));
        assert!(table.permits(0x2000_0000, Mode::Privileged, AccessKind::Write));

        assert!(table.permits(0x0000_1000, Mode::Unprivileged, AccessKind::Execute));
        assert!(!table.permits(0x4000_C000, Mode::Unprivileged, AccessKind::Execute));
    }
}

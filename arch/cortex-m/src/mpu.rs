// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Implementation of the memory protection unit for the Cortex-M3, Cortex-M4
//! and Cortex-M7 (ARMv7-M PMSAv7).

use core::fmt;

use kernel::config::CONFIG;
use kernel::platform::mpu::{
    self, Access, ConfigError, MemoryAttributes, Permissions, RegionDescriptor, RegionTable,
    Subregions, MIN_REGION_SIZE_POW2,
};
use kernel::utilities::registers::interfaces::{Readable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, FieldValue, LocalRegisterCopy, ReadOnly, ReadWrite,
};
use kernel::utilities::StaticRef;

use crate::support;

/// MPU Registers for the Cortex-M3, Cortex-M4 and Cortex-M7 families
/// Described in section 4.5 of
/// <http://infocenter.arm.com/help/topic/com.arm.doc.dui0553a/DUI0553A_cortex_m4_dgug.pdf>
#[repr(C)]
pub struct MpuRegisters {
    /// Indicates whether the MPU is present and, if so, how many regions it
    /// supports.
    pub mpu_type: ReadOnly<u32, Type::Register>,

    /// The control register:
    ///   * Enables the MPU (bit 0).
    ///   * Enables MPU in hard-fault, non-maskable interrupt (NMI).
    ///   * Enables the default memory map background region in privileged mode.
    pub ctrl: ReadWrite<u32, Control::Register>,

    /// Selects the region number (zero-indexed) referenced by the region base
    /// address and region attribute and size registers.
    pub rnr: ReadWrite<u32, RegionNumber::Register>,

    /// Defines the base address of the currently selected MPU region.
    pub rbar: ReadWrite<u32, RegionBaseAddress::Register>,

    /// Defines the region size and memory attributes of the selected MPU
    /// region. The bits are defined as in 4.5.5 of the Cortex-M4 user guide.
    pub rasr: ReadWrite<u32, RegionAttributes::Register>,
}

register_bitfields![u32,
    pub Type [
        /// The number of MPU instructions regions supported. Always reads 0.
        IREGION OFFSET(16) NUMBITS(8) [],
        /// The number of data regions supported. If this field reads-as-zero the
        /// processor does not implement an MPU
        DREGION OFFSET(8) NUMBITS(8) [],
        /// Indicates whether the processor support unified (0) or separate
        /// (1) instruction and data regions. Always reads 0 on the
        /// Cortex-M4.
        SEPARATE OFFSET(0) NUMBITS(1) []
    ],

    pub Control [
        /// Enables privileged software access to the default
        /// memory map
        PRIVDEFENA OFFSET(2) NUMBITS(1) [],
        /// Enables the operation of MPU during hard fault, NMI,
        /// and FAULTMASK handlers
        HFNMIENA OFFSET(1) NUMBITS(1) [],
        /// Enables the MPU
        ENABLE OFFSET(0) NUMBITS(1) []
    ],

    pub RegionNumber [
        /// Region indicating the MPU region referenced by the MPU_RBAR and
        /// MPU_RASR registers. Range 0-7 corresponding to the MPU regions.
        REGION OFFSET(0) NUMBITS(8) []
    ],

    pub RegionBaseAddress [
        /// Base address of the currently selected MPU region.
        ADDR OFFSET(5) NUMBITS(27) [],
        /// MPU Region Number valid bit.
        VALID OFFSET(4) NUMBITS(1) [
            /// Use the base address specified in Region Number Register (RNR)
            UseRNR = 0,
            /// Use the value of the REGION field in this register (RBAR)
            UseRBAR = 1
        ],
        /// Specifies which MPU region to set if VALID is set to 1.
        REGION OFFSET(0) NUMBITS(4) []
    ],

    pub RegionAttributes [
        /// Enables instruction fetches/execute permission
        XN OFFSET(28) NUMBITS(1) [
            Enable = 0,
            Disable = 1
        ],
        /// Defines access permissions
        AP OFFSET(24) NUMBITS(3) [
            //                                 Privileged  Unprivileged
            //                                 Access      Access
            NoAccess = 0b000,               // --          --
            PrivilegedOnly = 0b001,         // RW          --
            UnprivilegedReadOnly = 0b010,   // RW          R-
            ReadWrite = 0b011,              // RW          RW
            Reserved = 0b100,               // undef       undef
            PrivilegedOnlyReadOnly = 0b101, // R-          --
            ReadOnly = 0b110,               // R-          R-
            ReadOnlyAlias = 0b111           // R-          R-
        ],
        /// Type extension, together with C and B selects the memory type
        TEX OFFSET(19) NUMBITS(3) [],
        /// Shareable
        S OFFSET(18) NUMBITS(1) [],
        /// Cacheable
        C OFFSET(17) NUMBITS(1) [],
        /// Bufferable
        B OFFSET(16) NUMBITS(1) [],
        /// Subregion disable bits
        SRD OFFSET(8) NUMBITS(8) [],
        /// Specifies the region size, being 2^(SIZE+1) (minimum 3)
        SIZE OFFSET(1) NUMBITS(5) [],
        /// Enables the region
        ENABLE OFFSET(0) NUMBITS(1) []
    ]
];

const MPU_BASE_ADDRESS: StaticRef<MpuRegisters> =
    unsafe { StaticRef::new(0xE000ED90 as *const MpuRegisters) };

pub type BaseAddress = LocalRegisterCopy<u32, RegionBaseAddress::Register>;
pub type Attributes = LocalRegisterCopy<u32, RegionAttributes::Register>;

/// Access to the region and control registers of an MPU.
///
/// Implemented for the memory mapped [`MpuRegisters`] and for the fakes in
/// `crate::testing`.
pub trait RegionRegisters {
    /// `MPU_TYPE.DREGION`: the number of regions the hardware implements.
    fn data_regions(&self) -> usize;

    /// Writes slot `number`: selects it, then writes its base address and
    /// attributes.
    fn write_region(&self, number: usize, base_address: BaseAddress, attributes: Attributes);

    /// Reads back slot `number`.
    fn read_region(&self, number: usize) -> (BaseAddress, Attributes);

    fn write_control(&self, control: FieldValue<u32, Control::Register>);

    fn read_control(&self) -> LocalRegisterCopy<u32, Control::Register>;
}

impl RegionRegisters for MpuRegisters {
    fn data_regions(&self) -> usize {
        self.mpu_type.read(Type::DREGION) as usize
    }

    fn write_region(&self, number: usize, base_address: BaseAddress, attributes: Attributes) {
        self.rnr.write(RegionNumber::REGION.val(number as u32));
        self.rbar.set(base_address.get());
        self.rasr.set(attributes.get());
    }

    fn read_region(&self, number: usize) -> (BaseAddress, Attributes) {
        self.rnr.write(RegionNumber::REGION.val(number as u32));
        (self.rbar.extract(), self.rasr.extract())
    }

    fn write_control(&self, control: FieldValue<u32, Control::Register>) {
        self.ctrl.write(control);
    }

    fn read_control(&self) -> LocalRegisterCopy<u32, Control::Register> {
        self.ctrl.extract()
    }
}

/// Maps a privileged/unprivileged access pair onto its `AP` encoding.
///
/// Pairs where unprivileged code gets more than privileged code, or writes
/// without privileged writes, have no encoding.
fn encode_access(
    privileged: Access,
    unprivileged: Access,
) -> Option<FieldValue<u32, RegionAttributes::Register>> {
    Some(match (privileged, unprivileged) {
        (Access::NoAccess, Access::NoAccess) => RegionAttributes::AP::NoAccess,
        (Access::ReadWrite, Access::NoAccess) => RegionAttributes::AP::PrivilegedOnly,
        (Access::ReadWrite, Access::ReadOnly) => RegionAttributes::AP::UnprivilegedReadOnly,
        (Access::ReadWrite, Access::ReadWrite) => RegionAttributes::AP::ReadWrite,
        (Access::ReadOnly, Access::NoAccess) => RegionAttributes::AP::PrivilegedOnlyReadOnly,
        (Access::ReadOnly, Access::ReadOnly) => RegionAttributes::AP::ReadOnly,
        _ => return None,
    })
}

/// Inverse of [`encode_access`]. The reserved encoding grants nothing.
fn decode_access(ap: u32) -> (Access, Access) {
    match ap {
        0b001 => (Access::ReadWrite, Access::NoAccess),
        0b010 => (Access::ReadWrite, Access::ReadOnly),
        0b011 => (Access::ReadWrite, Access::ReadWrite),
        0b101 => (Access::ReadOnly, Access::NoAccess),
        0b110 | 0b111 => (Access::ReadOnly, Access::ReadOnly),
        _ => (Access::NoAccess, Access::NoAccess),
    }
}

/// Register values of one hardware region slot.
#[derive(Copy, Clone)]
pub struct CortexMRegion {
    number: usize,
    base_address: BaseAddress,
    attributes: Attributes,
}

impl CortexMRegion {
    /// Encodes `region` for slot `region.index()`.
    ///
    /// The descriptor must already have passed validation.
    pub fn encode(region: &RegionDescriptor) -> Result<CortexMRegion, ConfigError> {
        let number = region.index();
        if !region.is_enabled() {
            return Ok(CortexMRegion::empty(number));
        }

        let permissions = region.permissions();
        let access = encode_access(permissions.privileged, permissions.unprivileged).ok_or(
            ConfigError::UnsupportedPermissions {
                index: number,
                privileged: permissions.privileged,
                unprivileged: permissions.unprivileged,
            },
        )?;
        let execute = if permissions.execute {
            RegionAttributes::XN::Enable
        } else {
            RegionAttributes::XN::Disable
        };

        let MemoryAttributes {
            shareable,
            cacheable,
            bufferable,
        } = region.attributes();

        // Base address register. The slot is selected through RNR.
        let base_address = RegionBaseAddress::ADDR.val(region.base_address() >> 5)
            + RegionBaseAddress::VALID::UseRNR;

        // Attributes register
        let attributes = RegionAttributes::ENABLE::SET
            + RegionAttributes::SIZE.val(u32::from(region.size_pow2()) - 1)
            + RegionAttributes::SRD.val(u32::from(region.subregions_disabled().bits()))
            + RegionAttributes::S.val(u32::from(shareable))
            + RegionAttributes::C.val(u32::from(cacheable))
            + RegionAttributes::B.val(u32::from(bufferable))
            + access
            + execute;

        Ok(CortexMRegion {
            number,
            base_address: LocalRegisterCopy::new(base_address.value),
            attributes: LocalRegisterCopy::new(attributes.value),
        })
    }

    /// A switched off slot.
    pub fn empty(number: usize) -> CortexMRegion {
        CortexMRegion {
            number,
            base_address: LocalRegisterCopy::new(RegionBaseAddress::VALID::UseRNR.value),
            attributes: LocalRegisterCopy::new(RegionAttributes::ENABLE::CLEAR.value),
        }
    }

    /// A slot as read back from the hardware.
    pub fn from_registers(
        number: usize,
        base_address: BaseAddress,
        attributes: Attributes,
    ) -> CortexMRegion {
        CortexMRegion {
            number,
            base_address,
            attributes,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn base_address(&self) -> BaseAddress {
        self.base_address
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    pub fn is_enabled(&self) -> bool {
        self.attributes.is_set(RegionAttributes::ENABLE)
    }

    /// Decodes the slot back into a region, or `None` if it is switched off
    /// or sized below the 32 byte minimum. Such a slot can only have been
    /// programmed outside [`MPU::commit`].
    pub fn descriptor(&self) -> Option<RegionDescriptor> {
        if !self.is_enabled() {
            return None;
        }
        let (privileged, unprivileged) = decode_access(self.attributes.read(RegionAttributes::AP));
        let permissions = Permissions::new(
            privileged,
            unprivileged,
            !self.attributes.is_set(RegionAttributes::XN),
        );
        // SIZE is five bits wide, so this is at most 32.
        let size_pow2 = self.attributes.read(RegionAttributes::SIZE) as u8 + 1;
        if size_pow2 < MIN_REGION_SIZE_POW2 {
            return None;
        }

        Some(
            RegionDescriptor::new(
                self.number,
                self.base_address.read(RegionBaseAddress::ADDR) << 5,
                size_pow2,
                permissions,
            )
            .with_disabled_subregions(Subregions::from_disabled_mask(
                self.attributes.read(RegionAttributes::SRD) as u8,
            ))
            .with_attributes(MemoryAttributes {
                shareable: self.attributes.is_set(RegionAttributes::S),
                cacheable: self.attributes.is_set(RegionAttributes::C),
                bufferable: self.attributes.is_set(RegionAttributes::B),
            }),
        )
    }
}

impl fmt::Display for CortexMRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\r\n Cortex-M Region {}", self.number)?;
        match self.descriptor() {
            Some(region) => write!(
                f,
                "{} (RBAR {:#010X}, RASR {:#010X})\r\n",
                region,
                self.base_address.get(),
                self.attributes.get()
            ),
            None => write!(f, "\r\n  Region: Unused\r\n"),
        }
    }
}

/// State related to the real physical MPU.
///
/// There should only be one instantiation of this object as it represents
/// real hardware.
pub struct MPU<const NUM_REGIONS: usize, R: RegionRegisters + 'static = MpuRegisters> {
    /// MMIO reference to MPU registers.
    registers: StaticRef<R>,
}

impl<const NUM_REGIONS: usize> MPU<NUM_REGIONS, MpuRegisters> {
    /// # Safety
    ///
    /// Only one `MPU` may drive the hardware.
    pub const unsafe fn new() -> Self {
        Self {
            registers: MPU_BASE_ADDRESS,
        }
    }
}

impl<const NUM_REGIONS: usize, R: RegionRegisters + 'static> MPU<NUM_REGIONS, R> {
    /// An MPU driving `registers` instead of the memory mapped ones.
    pub const fn with_registers(registers: StaticRef<R>) -> Self {
        Self { registers }
    }

    /// Slots `0..n` of the hardware, as currently programmed.
    pub fn hardware_regions(&self) -> impl Iterator<Item = CortexMRegion> + '_ {
        (0..mpu::MPU::number_total_regions(self)).map(move |number| {
            let (base_address, attributes) = self.registers.read_region(number);
            CortexMRegion::from_registers(number, base_address, attributes)
        })
    }

    /// Whether the control register has protection switched on.
    pub fn is_enabled(&self) -> bool {
        self.registers.read_control().is_set(Control::ENABLE)
    }

    /// Validates `table` and encodes every slot, without touching the
    /// hardware. Slots the table does not name are switched off.
    fn encode_table(
        &self,
        table: &RegionTable<'_>,
        available: usize,
    ) -> Result<[CortexMRegion; NUM_REGIONS], ConfigError> {
        table.validate()?;

        let mut slots: [CortexMRegion; NUM_REGIONS] = core::array::from_fn(CortexMRegion::empty);
        for region in table {
            if region.index() >= available {
                return Err(ConfigError::IndexOutOfRange {
                    index: region.index(),
                    available,
                });
            }
            slots[region.index()] = CortexMRegion::encode(region)?;
        }
        Ok(slots)
    }

    // Function useful for boards where the bootloader sets up some
    // MPU configuration that conflicts with this configuration:
    pub fn clear_mpu(&self) {
        self.registers.write_control(Control::ENABLE::CLEAR);
    }
}

impl<const NUM_REGIONS: usize, R: RegionRegisters + 'static> mpu::MPU for MPU<NUM_REGIONS, R> {
    fn number_total_regions(&self) -> usize {
        core::cmp::min(NUM_REGIONS, self.registers.data_regions())
    }

    fn commit(&self, table: &RegionTable<'_>) -> Result<(), ConfigError> {
        let available = self.number_total_regions();
        let slots = self
            .encode_table(table, available)
            .inspect_err(|error| log::warn!("mpu: table rejected: {}", error))?;

        // Nothing below can fail: the whole table is encoded.
        self.clear_mpu();
        for slot in slots.iter().take(available) {
            if CONFIG.trace_mpu_commit {
                log::trace!(
                    "mpu: region {} rbar={:#010x} rasr={:#010x}",
                    slot.number(),
                    slot.base_address().get(),
                    slot.attributes().get()
                );
            }
            self.registers
                .write_region(slot.number(), slot.base_address(), slot.attributes());
        }
        self.registers.write_control(
            Control::ENABLE::SET + Control::HFNMIENA::SET + Control::PRIVDEFENA::SET,
        );
        support::dsb();
        support::isb();

        log::debug!("mpu: committed {} of {} regions", table.regions().len(), available);
        Ok(())
    }

    fn disable(&self) {
        self.clear_mpu();
        support::dsb();
        support::isb();
    }

    fn effective_permissions(&self, address: u32) -> Permissions {
        if !self.is_enabled() {
            return Permissions::UNRESTRICTED;
        }
        self.hardware_regions()
            .filter_map(|slot| slot.descriptor())
            .filter(|region| region.matches(address))
            .max_by_key(RegionDescriptor::index)
            .map_or(Permissions::DEFAULT_BACKGROUND, |region| region.permissions())
    }
}

impl<const NUM_REGIONS: usize, R: RegionRegisters + 'static> fmt::Display for MPU<NUM_REGIONS, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cortex-M MPU ({})",
            if self.is_enabled() { "enabled" } else { "disabled" }
        )?;
        for slot in self.hardware_regions() {
            write!(f, "{}", slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMpu;
    use kernel::platform::mpu::{AccessKind, Mode, MPU as _};
    use proptest::prelude::*;

    const PRIVILEGED_RW: Permissions = Permissions::new(Access::ReadWrite, Access::NoAccess, false);
    const PRIVILEGED_FULL: Permissions =
        Permissions::new(Access::ReadWrite, Access::NoAccess, true);

    fn mpu() -> (&'static RecordingMpu, MPU<8, RecordingMpu>) {
        let registers: &'static RecordingMpu = Box::leak(Box::new(RecordingMpu::new(8)));
        // SAFETY: leaked, so it lives for the rest of the test binary.
        let mpu = MPU::with_registers(unsafe { StaticRef::new(registers) });
        (registers, mpu)
    }

    #[test]
    fn encodes_access_pairs() {
        let region = RegionDescriptor::new(
            2,
            0x2000_0000,
            13,
            PRIVILEGED_RW,
        )
        .with_attributes(MemoryAttributes {
            shareable: true,
            cacheable: true,
            bufferable: false,
        });
        let slot = CortexMRegion::encode(&region).unwrap();
        assert_eq!(slot.attributes().get(), 0x1106_0019);
        assert_eq!(slot.base_address().get(), 0x2000_0000);
        assert_eq!(slot.descriptor(), Some(region));

        let write_only_user = RegionDescriptor::new(
            1,
            0,
            18,
            Permissions::new(Access::NoAccess, Access::ReadWrite, false),
        );
        assert_eq!(
            CortexMRegion::encode(&write_only_user).err(),
            Some(ConfigError::UnsupportedPermissions {
                index: 1,
                privileged: Access::NoAccess,
                unprivileged: Access::ReadWrite
            })
        );
    }

    #[test]
    fn reserved_access_grants_nothing() {
        let raw = RegionAttributes::ENABLE::SET
            + RegionAttributes::SIZE.val(31)
            + RegionAttributes::AP::Reserved
            + RegionAttributes::XN::Disable;
        let slot = CortexMRegion::from_registers(
            0,
            LocalRegisterCopy::new(0),
            LocalRegisterCopy::new(raw.value),
        );
        assert_eq!(slot.descriptor().map(|r| r.permissions()), Some(Permissions::NONE));
    }

    #[test]
    fn undersized_hardware_slots_are_ignored() {
        let (registers, mpu) = mpu();
        // Left behind by earlier firmware: enabled, SIZE 0, no access at all.
        registers.write_region(
            3,
            LocalRegisterCopy::new(0),
            LocalRegisterCopy::new(0x0300_0001),
        );
        registers.write_control(Control::ENABLE::SET);

        let slot = mpu.hardware_regions().nth(3).unwrap();
        assert!(slot.is_enabled());
        assert_eq!(slot.descriptor(), None);
        assert_eq!(mpu.effective_permissions(0), Permissions::DEFAULT_BACKGROUND);
        assert_eq!(mpu.effective_permissions(4), Permissions::DEFAULT_BACKGROUND);
    }

    #[test]
    fn commit_writes_every_slot_then_enables() {
        let (registers, mpu) = mpu();
        let regions = [
            RegionDescriptor::background(PRIVILEGED_FULL),
            RegionDescriptor::new(2, 0x2000_0000, 13, PRIVILEGED_RW),
        ];
        assert_eq!(mpu.commit(&RegionTable::new(&regions)), Ok(()));

        assert_eq!(registers.control(), 0b111);
        assert_eq!(registers.writes(), 8);
        assert!(!mpu.hardware_regions().nth(1).unwrap().is_enabled());
        assert!(mpu.hardware_regions().nth(2).unwrap().is_enabled());
    }

    #[test]
    fn misaligned_commit_leaves_hardware_untouched() {
        let (registers, mpu) = mpu();
        let good = [RegionDescriptor::new(2, 0x2000_0000, 13, PRIVILEGED_RW)];
        mpu.commit(&RegionTable::new(&good)).unwrap();
        let before = registers.snapshot();
        let writes = registers.writes();

        let bad = [RegionDescriptor::new(2, 0x2000_1000, 13, PRIVILEGED_RW)];
        assert!(matches!(
            mpu.commit(&RegionTable::new(&bad)),
            Err(ConfigError::Misaligned { index: 2, .. })
        ));
        assert_eq!(registers.snapshot(), before);
        assert_eq!(registers.writes(), writes);
    }

    #[test]
    fn slots_beyond_the_hardware_are_rejected() {
        let registers: &'static RecordingMpu = Box::leak(Box::new(RecordingMpu::new(4)));
        // SAFETY: leaked.
        let mpu: MPU<8, RecordingMpu> = MPU::with_registers(unsafe { StaticRef::new(registers) });
        assert_eq!(mpu.number_total_regions(), 4);

        let regions = [RegionDescriptor::new(5, 0x2000_0000, 13, PRIVILEGED_RW)];
        assert_eq!(
            mpu.commit(&RegionTable::new(&regions)),
            Err(ConfigError::IndexOutOfRange {
                index: 5,
                available: 4
            })
        );
        assert_eq!(registers.writes(), 0);
    }

    #[test]
    fn unprivileged_write_to_privileged_block_is_denied() {
        let (_, mpu) = mpu();
        let regions = [
            RegionDescriptor::background(PRIVILEGED_FULL),
            RegionDescriptor::new(2, 0x2000_0000, 13, PRIVILEGED_RW)
                .with_disabled_subregions(Subregions::NONE_DISABLED.disable(7)),
        ];
        mpu.commit(&RegionTable::new(&regions)).unwrap();

        for address in [0x2000_0000, 0x2000_1FFC] {
            let permissions = mpu.effective_permissions(address);
            assert!(!permissions.allows(Mode::Unprivileged, AccessKind::Write));
            assert!(permissions.allows(Mode::Privileged, AccessKind::Write));
        }
        // The top eighth is decided by the background, which may execute.
        assert!(mpu
            .effective_permissions(0x2000_1FFC)
            .allows(Mode::Privileged, AccessKind::Execute));
        assert!(!mpu
            .effective_permissions(0x2000_0000)
            .allows(Mode::Privileged, AccessKind::Execute));
    }

    #[test]
    fn disabled_mpu_enforces_nothing() {
        let (_, mpu) = mpu();
        let regions = [RegionDescriptor::new(2, 0x2000_0000, 13, PRIVILEGED_RW)];
        mpu.commit(&RegionTable::new(&regions)).unwrap();
        mpu.disable();
        assert!(!mpu.is_enabled());
        assert_eq!(mpu.effective_permissions(0x2000_0000), Permissions::UNRESTRICTED);
    }

    #[test]
    fn display_lists_hardware_slots() {
        let (_, mpu) = mpu();
        let regions = [RegionDescriptor::new(2, 0x2000_0000, 13, PRIVILEGED_RW)];
        mpu.commit(&RegionTable::new(&regions)).unwrap();
        let text = format!("{mpu}");
        assert!(text.starts_with("Cortex-M MPU (enabled)"));
        assert!(text.contains("Region: Unused"));
        assert!(text.contains("[0x20000000:0x20002000)"));
        assert!(text.contains("RASR 0x11000019"));
    }

    fn encodable_permissions() -> impl Strategy<Value = Permissions> {
        let pairs = prop_oneof![
            Just((Access::NoAccess, Access::NoAccess)),
            Just((Access::ReadWrite, Access::NoAccess)),
            Just((Access::ReadWrite, Access::ReadOnly)),
            Just((Access::ReadWrite, Access::ReadWrite)),
            Just((Access::ReadOnly, Access::NoAccess)),
            Just((Access::ReadOnly, Access::ReadOnly)),
        ];
        (pairs, any::<bool>()).prop_map(|((privileged, unprivileged), execute)| {
            Permissions::new(privileged, unprivileged, execute)
        })
    }

    fn region(index: usize) -> impl Strategy<Value = RegionDescriptor> {
        (5u8..=32, any::<u32>(), any::<u8>(), encodable_permissions(), any::<bool>()).prop_map(
            move |(size_pow2, base, srd, permissions, enabled)| {
                let (size_pow2, base) = if index == 0 {
                    (32, 0)
                } else if size_pow2 == 32 {
                    (size_pow2, 0)
                } else {
                    (size_pow2, base & !((1u32 << size_pow2) - 1))
                };
                let srd = if size_pow2 >= 8 { srd } else { 0 };
                let region = RegionDescriptor::new(index, base, size_pow2, permissions)
                    .with_disabled_subregions(Subregions::from_disabled_mask(srd));
                if enabled {
                    region
                } else {
                    region.disabled()
                }
            },
        )
    }

    fn regions() -> impl Strategy<Value = Vec<RegionDescriptor>> {
        proptest::sample::subsequence((0..8).collect::<Vec<usize>>(), 0..=8)
            .prop_flat_map(|indices| indices.into_iter().map(region).collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn hardware_matches_table(regions in regions(), addresses in proptest::collection::vec(any::<u32>(), 16)) {
            let (_, mpu) = mpu();
            let table = RegionTable::new(&regions);
            prop_assert_eq!(mpu.commit(&table), Ok(()));

            for address in addresses {
                prop_assert_eq!(mpu.effective_permissions(address), table.effective_permissions(address));
            }
        }
    }
}

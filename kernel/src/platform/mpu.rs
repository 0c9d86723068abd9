// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface for configuring the Memory Protection Unit.
//!
//! A protection policy is written down as a [`RegionTable`]: a fixed list of
//! [`RegionDescriptor`]s, each naming a hardware slot, a power-of-two sized
//! and aligned span of the address space, and the access it grants in
//! privileged and unprivileged mode. Regions may overlap. For any address the
//! enabled region with the highest index wins, and addresses no region
//! covers fall back to the background policy
//! ([`Permissions::DEFAULT_BACKGROUND`]).
//!
//! Tables are validated as a whole before an [`MPU`] implementation writes
//! anything, so a rejected table never leaves the hardware half configured.

use core::fmt::{self, Display};

use crate::utilities::math;

/// Regions may span at most `2^ADDRESS_BITS` bytes.
pub const ADDRESS_BITS: u8 = 32;

/// Smallest enforceable region, 32 bytes.
pub const MIN_REGION_SIZE_POW2: u8 = 5;

/// Smallest region that supports disabling subregions, 256 bytes.
pub const MIN_SUBREGION_REGION_SIZE_POW2: u8 = 8;

/// Number of equal slices a region is split into.
pub const SUBREGIONS_PER_REGION: usize = 8;

/// The slot reserved for the background region.
pub const BACKGROUND_REGION_INDEX: usize = 0;

/// Data access granted to one execution mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

impl Access {
    /// Whether this access level lets an access of `kind` through.
    ///
    /// Instruction fetches count as reads; whether a region may be executed
    /// at all is decided by [`Permissions::execute`].
    pub const fn allows(self, kind: AccessKind) -> bool {
        match (self, kind) {
            (Access::NoAccess, _) => false,
            (Access::ReadOnly, AccessKind::Write) => false,
            _ => true,
        }
    }
}

/// The execution mode an access is made from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Privileged,
    Unprivileged,
}

/// The kind of memory access being checked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Access granted by a region, per execution mode, plus whether instructions
/// may be fetched from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub privileged: Access,
    pub unprivileged: Access,
    pub execute: bool,
}

impl Permissions {
    /// Policy for addresses no enabled region covers: privileged code keeps
    /// full access, unprivileged code gets none.
    pub const DEFAULT_BACKGROUND: Permissions =
        Permissions::new(Access::ReadWrite, Access::NoAccess, true);

    /// What both modes may do while protection is switched off.
    pub const UNRESTRICTED: Permissions =
        Permissions::new(Access::ReadWrite, Access::ReadWrite, true);

    /// Nothing is allowed in either mode.
    pub const NONE: Permissions = Permissions::new(Access::NoAccess, Access::NoAccess, false);

    pub const fn new(privileged: Access, unprivileged: Access, execute: bool) -> Permissions {
        Permissions {
            privileged,
            unprivileged,
            execute,
        }
    }

    /// The data access granted to `mode`.
    pub const fn access(&self, mode: Mode) -> Access {
        match mode {
            Mode::Privileged => self.privileged,
            Mode::Unprivileged => self.unprivileged,
        }
    }

    /// Whether an access of `kind` made from `mode` is permitted.
    ///
    /// Fetching an instruction needs both `execute` and read access for the
    /// fetching mode.
    pub const fn allows(&self, mode: Mode, kind: AccessKind) -> bool {
        let data = self.access(mode).allows(kind);
        match kind {
            AccessKind::Execute => data && self.execute,
            AccessKind::Read | AccessKind::Write => data,
        }
    }
}

/// Memory ordering and caching hints of a region. They do not take part in
/// permission checks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryAttributes {
    pub shareable: bool,
    pub cacheable: bool,
    pub bufferable: bool,
}

/// Set of disabled subregions. Bit `n` set means the `n`th eighth of the
/// region, counting from its base, is not covered by the region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Subregions(u8);

impl Subregions {
    /// Every subregion enabled.
    pub const NONE_DISABLED: Subregions = Subregions(0);

    pub const fn from_disabled_mask(mask: u8) -> Subregions {
        Subregions(mask)
    }

    /// Only the subregions in `[first, last]` stay enabled.
    pub fn enabled_range(first: usize, last: usize) -> Subregions {
        Subregions(math::subregion_mask(first, last))
    }

    /// This set with `subregion` (0-7) disabled as well. Any other
    /// `subregion` leaves the set as it is.
    pub const fn disable(self, subregion: usize) -> Subregions {
        if subregion < SUBREGIONS_PER_REGION {
            Subregions(self.0 | (1 << subregion))
        } else {
            self
        }
    }

    pub const fn is_disabled(self, subregion: usize) -> bool {
        subregion < SUBREGIONS_PER_REGION && self.0 & (1 << subregion) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// One protection region, destined for hardware slot `index`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    index: usize,
    base_address: u32,
    size_pow2: u8,
    subregions_disabled: Subregions,
    permissions: Permissions,
    attributes: MemoryAttributes,
    enabled: bool,
}

impl RegionDescriptor {
    /// An enabled region of `2^size_pow2` bytes at `base_address` with no
    /// subregions disabled and no memory attributes.
    pub const fn new(
        index: usize,
        base_address: u32,
        size_pow2: u8,
        permissions: Permissions,
    ) -> RegionDescriptor {
        RegionDescriptor {
            index,
            base_address,
            size_pow2,
            subregions_disabled: Subregions::NONE_DISABLED,
            permissions,
            attributes: MemoryAttributes {
                shareable: false,
                cacheable: false,
                bufferable: false,
            },
            enabled: true,
        }
    }

    /// The background region: slot 0, covering the whole address space.
    pub const fn background(permissions: Permissions) -> RegionDescriptor {
        RegionDescriptor::new(BACKGROUND_REGION_INDEX, 0, ADDRESS_BITS, permissions)
    }

    /// A region sized in bytes instead of as a power of two.
    ///
    /// Returns `None` if `size` is not a power of two.
    pub fn with_size_bytes(
        index: usize,
        base_address: u32,
        size: u64,
        permissions: Permissions,
    ) -> Option<RegionDescriptor> {
        if !size.is_power_of_two() {
            return None;
        }
        let size_pow2 = u8::try_from(math::log_base_two_u64(size)).ok()?;
        Some(RegionDescriptor::new(index, base_address, size_pow2, permissions))
    }

    pub const fn with_attributes(mut self, attributes: MemoryAttributes) -> RegionDescriptor {
        self.attributes = attributes;
        self
    }

    pub const fn with_disabled_subregions(mut self, subregions: Subregions) -> RegionDescriptor {
        self.subregions_disabled = subregions;
        self
    }

    /// The same region, present in the table but not enforced.
    pub const fn disabled(mut self) -> RegionDescriptor {
        self.enabled = false;
        self
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn base_address(&self) -> u32 {
        self.base_address
    }

    pub const fn size_pow2(&self) -> u8 {
        self.size_pow2
    }

    /// Size in bytes. Wider than `u32` so the 4 GiB background fits.
    ///
    /// Sizes beyond the address space are clamped to it; `validate` rejects
    /// them.
    pub const fn size(&self) -> u64 {
        let size_pow2 = if self.size_pow2 > ADDRESS_BITS {
            ADDRESS_BITS
        } else {
            self.size_pow2
        };
        math::power_of_two(size_pow2 as u32)
    }

    /// One past the last covered address.
    pub const fn end(&self) -> u64 {
        self.base_address as u64 + self.size()
    }

    pub const fn subregions_disabled(&self) -> Subregions {
        self.subregions_disabled
    }

    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub const fn attributes(&self) -> MemoryAttributes {
        self.attributes
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `address` lies inside `[base, base + size)`, ignoring
    /// subregions and the enable bit.
    pub fn contains(&self, address: u32) -> bool {
        let address = u64::from(address);
        address >= u64::from(self.base_address) && address < self.end()
    }

    /// Which eighth of the region `address` falls in. `None` outside the
    /// region, or for regions under 8 bytes that cannot be sliced.
    pub fn subregion_of(&self, address: u32) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        let subregion_size = self.size() / SUBREGIONS_PER_REGION as u64;
        let offset = u64::from(address) - u64::from(self.base_address);
        offset
            .checked_div(subregion_size)
            .and_then(|subregion| usize::try_from(subregion).ok())
    }

    /// Whether this region decides the permissions at `address`: it is
    /// enabled, covers the address and does not disable the subregion the
    /// address falls in. Regions under 256 bytes have no subregions, so
    /// their disable mask is ignored.
    pub fn matches(&self, address: u32) -> bool {
        if !self.enabled || !self.contains(address) {
            return false;
        }
        if self.size_pow2 < MIN_SUBREGION_REGION_SIZE_POW2 {
            return true;
        }
        self.subregion_of(address)
            .is_some_and(|subregion| !self.subregions_disabled.is_disabled(subregion))
    }

    /// Checks the constraints of a single enabled region. Disabled regions
    /// are never written as anything but "off" and always pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.size_pow2 < MIN_REGION_SIZE_POW2 || self.size_pow2 > ADDRESS_BITS {
            return Err(ConfigError::InvalidSize {
                index: self.index,
                size_pow2: self.size_pow2,
            });
        }
        if !math::is_aligned(u64::from(self.base_address), self.size()) {
            return Err(ConfigError::Misaligned {
                index: self.index,
                base: self.base_address,
                size_pow2: self.size_pow2,
            });
        }
        if !self.subregions_disabled.is_empty() && self.size_pow2 < MIN_SUBREGION_REGION_SIZE_POW2
        {
            return Err(ConfigError::SubregionsUnsupported {
                index: self.index,
                size_pow2: self.size_pow2,
            });
        }
        if self.index == BACKGROUND_REGION_INDEX
            && (self.base_address != 0 || self.size_pow2 != ADDRESS_BITS)
        {
            return Err(ConfigError::BackgroundNotCovering {
                base: self.base_address,
                size_pow2: self.size_pow2,
            });
        }
        Ok(())
    }
}

impl Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\r\n Region {}", self.index)?;
        if !self.enabled {
            return write!(f, ": Unused\r\n");
        }
        write!(
            f,
            "\r\n  Range: [{:#010X}:{:#010X}), length: 2^{} bytes; privileged {:?}, unprivileged {:?}, {}",
            self.base_address,
            self.end(),
            self.size_pow2,
            self.permissions.privileged,
            self.permissions.unprivileged,
            if self.permissions.execute {
                "executable"
            } else {
                "execute never"
            },
        )?;
        if self.size_pow2 >= MIN_SUBREGION_REGION_SIZE_POW2 {
            let subregion_size = self.size() / SUBREGIONS_PER_REGION as u64;
            let start = u64::from(self.base_address);
            for j in 0..SUBREGIONS_PER_REGION {
                let offset = j as u64;
                write!(
                    f,
                    "\r\n    Sub-region {}: [{:#010X}:{:#010X}), {}",
                    j,
                    start + offset * subregion_size,
                    start + (offset + 1) * subregion_size,
                    if self.subregions_disabled.is_disabled(j) {
                        "Disabled"
                    } else {
                        "Enabled"
                    },
                )?;
            }
        }
        write!(f, "\r\n")
    }
}

/// Picks the region that decides the permissions at `address`: the matching
/// region with the highest index.
pub fn resolve<'r, I>(regions: I, address: u32) -> Option<&'r RegionDescriptor>
where
    I: IntoIterator<Item = &'r RegionDescriptor>,
{
    regions
        .into_iter()
        .filter(|region| region.matches(address))
        .max_by_key(|region| region.index())
}

/// The protection policy handed to [`MPU::commit`].
///
/// Immutable once built; changing the policy means committing a new table.
#[derive(Copy, Clone, Debug)]
pub struct RegionTable<'a> {
    regions: &'a [RegionDescriptor],
}

impl<'a> RegionTable<'a> {
    pub const fn new(regions: &'a [RegionDescriptor]) -> RegionTable<'a> {
        RegionTable { regions }
    }

    pub fn regions(&self) -> &'a [RegionDescriptor] {
        self.regions
    }

    pub fn iter(&self) -> core::slice::Iter<'a, RegionDescriptor> {
        self.regions.iter()
    }

    /// The descriptor destined for hardware slot `index`.
    pub fn get(&self, index: usize) -> Option<&'a RegionDescriptor> {
        self.regions.iter().find(|region| region.index() == index)
    }

    /// Validates every descriptor and checks that no hardware slot is named
    /// twice. Disabled descriptors still claim their slot.
    ///
    /// Slot 0 is checked like any other descriptor: if it is present and
    /// enabled it must cover the whole address space. A table may leave slot
    /// 0 out or disable it; addresses no region matches then get
    /// [`Permissions::DEFAULT_BACKGROUND`], which is what the hardware
    /// background region enforces once [`MPU::commit`] has enabled it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (position, region) in self.regions.iter().enumerate() {
            region.validate()?;
            if self.regions[..position]
                .iter()
                .any(|earlier| earlier.index() == region.index())
            {
                return Err(ConfigError::DuplicateIndex {
                    index: region.index(),
                });
            }
        }
        Ok(())
    }

    /// The region deciding the permissions at `address`, or `None` if the
    /// background policy applies.
    pub fn resolve(&self, address: u32) -> Option<&'a RegionDescriptor> {
        resolve(self.regions, address)
    }

    pub fn effective_permissions(&self, address: u32) -> Permissions {
        self.resolve(address)
            .map_or(Permissions::DEFAULT_BACKGROUND, |region| region.permissions())
    }

    /// Whether an access of `kind` from `mode` at `address` gets through once
    /// this table is committed.
    pub fn permits(&self, address: u32, mode: Mode, kind: AccessKind) -> bool {
        self.effective_permissions(address).allows(mode, kind)
    }
}

impl<'a> IntoIterator for &RegionTable<'a> {
    type Item = &'a RegionDescriptor;
    type IntoIter = core::slice::Iter<'a, RegionDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Reasons a region table is rejected. Nothing is written to the hardware
/// when any of these is returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("region {index}: base {base:#010x} is not aligned to its size of 2^{size_pow2} bytes")]
    Misaligned {
        index: usize,
        base: u32,
        size_pow2: u8,
    },
    #[error("region {index}: size 2^{size_pow2} is outside 2^5..=2^32 bytes")]
    InvalidSize { index: usize, size_pow2: u8 },
    #[error("region index {index} appears more than once")]
    DuplicateIndex { index: usize },
    #[error("region {index}: subregions need a region of at least 256 bytes, not 2^{size_pow2}")]
    SubregionsUnsupported { index: usize, size_pow2: u8 },
    #[error("region 0 must cover the whole address space, not 2^{size_pow2} bytes at {base:#010x}")]
    BackgroundNotCovering { base: u32, size_pow2: u8 },
    #[error("region index {index} exceeds the {available} regions of the hardware")]
    IndexOutOfRange { index: usize, available: usize },
    #[error("region {index}: privileged {privileged:?} with unprivileged {unprivileged:?} cannot be encoded")]
    UnsupportedPermissions {
        index: usize,
        privileged: Access,
        unprivileged: Access,
    },
}

/// The generic trait that particular memory protection unit implementations
/// need to implement.
///
/// `commit` is the only way region registers get written.
pub trait MPU {
    /// Returns the number of regions supported by the MPU.
    fn number_total_regions(&self) -> usize;

    /// Validates `table` and, only if the whole table is acceptable, writes
    /// every slot in index order and enables protection with the background
    /// region active and protection kept on inside fault handlers.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. The hardware is left exactly
    /// as it was.
    fn commit(&self, table: &RegionTable<'_>) -> Result<(), ConfigError>;

    /// Switches protection off.
    fn disable(&self);

    /// Permissions the hardware currently enforces at `address`, decoded from
    /// the committed registers.
    fn effective_permissions(&self, address: u32) -> Permissions;
}

/// Implement default MPU trait for unit.
///
/// Tables are still validated, but nothing is enforced.
impl MPU for () {
    fn number_total_regions(&self) -> usize {
        0
    }

    fn commit(&self, table: &RegionTable<'_>) -> Result<(), ConfigError> {
        table.validate()
    }

    fn disable(&self) {}

    fn effective_permissions(&self, _address: u32) -> Permissions {
        Permissions::UNRESTRICTED
    }
}

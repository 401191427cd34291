use std::ops::{Add, AddAssign};

use bitflags::bitflags;

bitflags! {
    /// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// Ids are plain counters. The only flag is [`RegionId::BORDER_REGION`], which marks spans on the tile border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region, i.e. not walkable.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;
        /// The maximum representable region id.
        const MAX = u16::MAX;
    }
}

impl RegionId {
    /// Creates a region id from its raw value.
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self::from_bits_retain(id)
    }

    /// Returns `true` if this is [`RegionId::NONE`].
    #[inline]
    pub fn is_none(&self) -> bool {
        self.bits() == 0
    }

    /// Returns `true` if the id has the [`RegionId::BORDER_REGION`] flag set.
    #[inline]
    pub fn is_border(&self) -> bool {
        self.contains(Self::BORDER_REGION)
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

impl Add<u16> for RegionId {
    type Output = Self;

    fn add(self, rhs: u16) -> Self::Output {
        Self::from_bits_retain(self.bits() + rhs)
    }
}

impl AddAssign<u16> for RegionId {
    fn add_assign(&mut self, rhs: u16) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_flag_is_kept_alongside_id() {
        let region = RegionId::new(5) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert_eq!(region.bits() & !RegionId::BORDER_REGION.bits(), 5);
        assert!(!RegionId::new(5).is_border());
    }

    #[test]
    fn can_count_up() {
        let mut region = RegionId::NONE;
        assert!(region.is_none());
        region += 1;
        assert_eq!(region, RegionId::new(1));
        assert_eq!(region + 2, RegionId::new(3));
    }
}

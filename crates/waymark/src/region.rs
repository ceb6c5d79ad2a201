//! Region ids assigned to the spans of a [`CompactHeightfield`](crate::CompactHeightfield).

bitflags::bitflags! {
    /// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// The low 15 bits are the id proper, [`RegionId::BORDER_REGION`] marks regions painted
    /// along the tile border. `RegionId::NONE` means the span has not been assigned a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The null region, used for spans that are not in a region.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;
        /// The largest plain region id, also the mask that strips the border flag.
        const MAX = !Self::BORDER_REGION.bits();
        const _ = !0;
    }
}

impl From<u16> for RegionId {
    #[inline]
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<RegionId> for u16 {
    #[inline]
    fn from(value: RegionId) -> Self {
        value.bits()
    }
}

impl RegionId {
    /// The id without the border flag.
    #[inline]
    pub fn id(self) -> u16 {
        (self & Self::MAX).bits()
    }

    /// `true` for [`RegionId::NONE`] and for any id carrying [`RegionId::BORDER_REGION`].
    ///
    /// Region filtering treats both the same: neither is a real region that can be
    /// removed, merged into, or renumbered.
    #[inline]
    pub fn is_null_or_border(self) -> bool {
        self == Self::NONE || self.contains(Self::BORDER_REGION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_strips_border_flag() {
        let region = RegionId::from(5_u16) | RegionId::BORDER_REGION;
        assert_eq!(region.id(), 5);
        assert!(region.contains(RegionId::BORDER_REGION));
        assert_eq!(RegionId::MAX.bits(), 0x7fff);
    }

    #[test]
    fn null_and_border_ids_are_not_regular_regions() {
        assert!(RegionId::NONE.is_null_or_border());
        assert!(RegionId::BORDER_REGION.is_null_or_border());
        assert!((RegionId::from(3_u16) | RegionId::BORDER_REGION).is_null_or_border());
        assert!(!RegionId::from(1_u16).is_null_or_border());
        assert!(!RegionId::MAX.is_null_or_border());
    }
}

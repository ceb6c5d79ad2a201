use std::fmt;

use crate::status::Status;

/// A handle to a polygon of a [`TiledMesh`](crate::TiledMesh).
///
/// Packs a salt, a tile index and a polygon index into 32 bits, using the widths
/// of the mesh's [`PolyIdLayout`]. The salt is the generation of the tile at
/// the time the id was handed out, so ids into a tile that was removed or
/// rebuilt are rejected by [`TiledMesh::is_valid_poly_ref`](crate::TiledMesh::is_valid_poly_ref).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyId(u32);

impl PolyId {
    /// The id that never refers to a polygon.
    pub const NULL: Self = Self(0);

    /// Wraps raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`PolyId::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PolyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A handle to a tile of a [`TiledMesh`](crate::TiledMesh). This is the [`PolyId`] of the
/// tile's polygon 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileRef(pub(crate) PolyId);

impl TileRef {
    /// The raw bits.
    pub const fn bits(self) -> u32 {
        self.0.bits()
    }
}

/// The bit widths used to pack a [`PolyId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyIdLayout {
    /// Bits of the tile generation.
    pub salt_bits: u32,
    /// Bits of the tile index.
    pub tile_bits: u32,
    /// Bits of the polygon index.
    pub poly_bits: u32,
}

impl PolyIdLayout {
    /// The fewest salt bits a layout may have.
    pub const MIN_SALT_BITS: u32 = 10;

    /// Computes the widths needed for `max_tiles` tiles of at most `max_polys` polygons each.
    /// The salt gets the remaining bits, capped at 31.
    ///
    /// Fails with [`StatusDetail::INVALID_PARAM`](crate::StatusDetail::INVALID_PARAM)
    /// if fewer than [`PolyIdLayout::MIN_SALT_BITS`] bits remain for the salt.
    pub fn new(max_tiles: u32, max_polys: u32) -> Result<Self, Status> {
        let tile_bits = ilog2_next_pow2(max_tiles);
        let poly_bits = ilog2_next_pow2(max_polys);
        let used = tile_bits + poly_bits;
        if used > 32 - Self::MIN_SALT_BITS {
            return Err(Status::invalid_param());
        }
        let salt_bits = (32 - used).min(31);
        Ok(Self {
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Mask of the salt after shifting it down.
    pub fn salt_mask(&self) -> u32 {
        (1 << self.salt_bits) - 1
    }

    fn tile_mask(&self) -> u32 {
        (1 << self.tile_bits) - 1
    }

    fn poly_mask(&self) -> u32 {
        (1 << self.poly_bits) - 1
    }

    /// Packs the parts of an id.
    pub fn encode(&self, salt: u32, tile: u32, poly: u32) -> PolyId {
        PolyId(
            ((salt & self.salt_mask()) << (self.poly_bits + self.tile_bits))
                | ((tile & self.tile_mask()) << self.poly_bits)
                | (poly & self.poly_mask()),
        )
    }

    /// Splits an id into salt, tile index and polygon index.
    pub fn decode(&self, id: PolyId) -> (u32, u32, u32) {
        (self.salt(id), self.tile(id), self.poly(id))
    }

    /// The salt of an id.
    pub fn salt(&self, id: PolyId) -> u32 {
        (id.0 >> (self.poly_bits + self.tile_bits)) & self.salt_mask()
    }

    /// The tile index of an id.
    pub fn tile(&self, id: PolyId) -> u32 {
        (id.0 >> self.poly_bits) & self.tile_mask()
    }

    /// The polygon index of an id.
    pub fn poly(&self, id: PolyId) -> u32 {
        id.0 & self.poly_mask()
    }
}

fn ilog2_next_pow2(value: u32) -> u32 {
    value.max(1).next_power_of_two().ilog2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_bits_from_counts() {
        let layout = PolyIdLayout::new(128, 1000).unwrap();
        assert_eq!(layout.tile_bits, 7);
        assert_eq!(layout.poly_bits, 10);
        assert_eq!(layout.salt_bits, 15);
    }

    #[test]
    fn salt_is_capped() {
        let layout = PolyIdLayout::new(1, 1).unwrap();
        assert_eq!(layout.tile_bits, 0);
        assert_eq!(layout.poly_bits, 0);
        assert_eq!(layout.salt_bits, 31);
    }

    #[test]
    fn too_few_salt_bits_is_rejected() {
        assert!(PolyIdLayout::new(1 << 12, 1 << 12).is_err());
        assert!(PolyIdLayout::new(1 << 11, 1 << 11).is_ok());
    }

    #[test]
    fn encode_decode() {
        let layout = PolyIdLayout::new(64, 512).unwrap();
        let id = layout.encode(5, 17, 300);
        assert_eq!(layout.decode(id), (5, 17, 300));
        assert!(!id.is_null());
    }
}

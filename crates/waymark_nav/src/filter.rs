use glam::Vec3;
use waymark::AreaType;

use crate::{
    poly_id::PolyId,
    tile::{NavmeshTileData, Poly},
};

/// The number of distinct area costs a [`DefaultQueryFilter`] stores.
pub const MAX_AREAS: usize = 64;

/// A polygon together with its id and the tile containing it.
#[derive(Debug, Clone, Copy)]
pub struct PolyHandle<'a> {
    /// The id of the polygon.
    pub id: PolyId,
    /// The tile containing the polygon.
    pub tile: &'a NavmeshTileData,
    /// The polygon.
    pub poly: &'a Poly,
}

/// Decides which polygons a query may visit and what crossing them costs.
pub trait QueryFilter {
    /// Returns `true` if the polygon may be visited.
    fn pass_filter(&self, id: PolyId, tile: &NavmeshTileData, poly: &Poly) -> bool;

    /// The cost of moving from `pa` to `pb` across `current`.
    ///
    /// `pa` lies on the edge shared with `previous`, `pb` on the edge shared with `next`.
    fn cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        previous: Option<PolyHandle>,
        current: PolyHandle,
        next: Option<PolyHandle>,
    ) -> f32;
}

/// A filter matching polygon flags against include and exclude masks, with a cost multiplier per area.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DefaultQueryFilter {
    area_cost: Vec<f32>,
    include_flags: u16,
    exclude_flags: u16,
}

impl Default for DefaultQueryFilter {
    fn default() -> Self {
        Self {
            area_cost: vec![1.0; MAX_AREAS],
            include_flags: 0xffff,
            exclude_flags: 0,
        }
    }
}

impl DefaultQueryFilter {
    /// The cost multiplier of an area. Areas beyond [`MAX_AREAS`] cost 1.
    pub fn area_cost(&self, area: AreaType) -> f32 {
        self.area_cost.get(area.0 as usize).copied().unwrap_or(1.0)
    }

    /// Sets the cost multiplier of an area. Areas beyond [`MAX_AREAS`] are ignored.
    pub fn set_area_cost(&mut self, area: AreaType, cost: f32) {
        if let Some(slot) = self.area_cost.get_mut(area.0 as usize) {
            *slot = cost;
        }
    }

    /// Polygons need at least one of these flags to pass.
    pub fn include_flags(&self) -> u16 {
        self.include_flags
    }

    /// Sets [`DefaultQueryFilter::include_flags`].
    pub fn set_include_flags(&mut self, flags: u16) {
        self.include_flags = flags;
    }

    /// Polygons with any of these flags are rejected.
    pub fn exclude_flags(&self) -> u16 {
        self.exclude_flags
    }

    /// Sets [`DefaultQueryFilter::exclude_flags`].
    pub fn set_exclude_flags(&mut self, flags: u16) {
        self.exclude_flags = flags;
    }

    /// Builder style version of [`DefaultQueryFilter::set_exclude_flags`].
    pub fn with_exclude_flags(mut self, flags: u16) -> Self {
        self.exclude_flags = flags;
        self
    }

    /// Builder style version of [`DefaultQueryFilter::set_include_flags`].
    pub fn with_include_flags(mut self, flags: u16) -> Self {
        self.include_flags = flags;
        self
    }
}

impl QueryFilter for DefaultQueryFilter {
    #[inline]
    fn pass_filter(&self, _id: PolyId, _tile: &NavmeshTileData, poly: &Poly) -> bool {
        (poly.flags & self.include_flags) != 0 && (poly.flags & self.exclude_flags) == 0
    }

    #[inline]
    fn cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        _previous: Option<PolyHandle>,
        current: PolyHandle,
        _next: Option<PolyHandle>,
    ) -> f32 {
        pa.distance(pb) * self.area_cost(current.poly.area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_matched() {
        let filter = DefaultQueryFilter::default().with_exclude_flags(2);
        let tile = NavmeshTileData::default();
        let walk = Poly {
            flags: 1,
            ..Default::default()
        };
        let swim = Poly {
            flags: 1 | 2,
            ..Default::default()
        };
        let disabled = Poly::default();
        assert!(filter.pass_filter(PolyId::NULL, &tile, &walk));
        assert!(!filter.pass_filter(PolyId::NULL, &tile, &swim));
        assert!(!filter.pass_filter(PolyId::NULL, &tile, &disabled));
    }

    #[test]
    fn cost_scales_with_area() {
        let mut filter = DefaultQueryFilter::default();
        filter.set_area_cost(AreaType(5), 3.0);
        filter.set_area_cost(AreaType(200), 9.0);
        assert_eq!(filter.area_cost(AreaType(200)), 1.0);

        let tile = NavmeshTileData::default();
        let poly = Poly {
            area: AreaType(5),
            ..Default::default()
        };
        let current = PolyHandle {
            id: PolyId::NULL,
            tile: &tile,
            poly: &poly,
        };
        let cost = filter.cost(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), None, current, None);
        assert_eq!(cost, 6.0);
    }
}

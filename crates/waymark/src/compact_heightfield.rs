use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of a [`Heightfield`].
///
/// Instead of the solid spans of the heightfield, it stores the open space above each walkable span,
/// together with the connections to the neighbouring columns.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = u16::MAX;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has too many layers.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            aabb: heightfield.aabb,
            max_distance: 0,
            max_region: RegionId::NONE,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![
                CompactCell::default();
                heightfield.width as usize * heightfield.height as usize
            ],
            spans: vec![CompactSpan::default(); walkable_span_count],
            dist: vec![0; walkable_span_count],
            areas: vec![AreaType::NOT_WALKABLE; walkable_span_count],
        };
        compact_heightfield.aabb.max.y += walkable_height as f32 * compact_heightfield.cell_height;

        let mut cell_index = 0_usize;
        // Fill in cells and spans
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                if heightfield.span_key_at(x, z).is_none() {
                    // If there are no spans at this cell, just leave the data to index=0, count=0.
                    continue;
                }
                let column_index = heightfield.column_index(x, z);
                let cell = &mut compact_heightfield.cells[column_index];
                cell.set_index(cell_index as u32);
                cell.set_count(0);

                for (_, span) in heightfield.column(x, z) {
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|next| heightfield.span(next).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let compact_span = &mut compact_heightfield.spans[cell_index];
                    compact_span.y = bot;
                    compact_span.set_height(top.saturating_sub(bot).min(u8::MAX.into()) as u8);
                    compact_heightfield.areas[cell_index] = span.area();
                    cell_index += 1;
                    cell.inc_count();
                }
            }
        }

        // Find neighbour connections
        const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;
        let mut too_high_neighbor = 0_usize;
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let cell = compact_heightfield.cell_at(x, z);
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        compact_heightfield.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !heightfield.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of the is
                        // accessible from current cell.
                        let neighbor_cell =
                            *compact_heightfield.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let span = &compact_heightfield.spans[i];
                        let (span_y, span_top) = (span.y as i32, span.y as i32 + span.height() as i32);
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &compact_heightfield.spans[k];
                            let bot = span_y.max(neighbor_span.y as i32);
                            let top =
                                span_top.min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= walkable_height as i32;
                            let is_climbable =
                                (neighbor_span.y as i32 - span_y).abs() <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > MAX_LAYERS as usize {
                                too_high_neighbor = too_high_neighbor.max(layer_index);
                                continue;
                            }
                            compact_heightfield.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }
        if too_high_neighbor > MAX_LAYERS as usize {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: MAX_LAYERS,
                layer_index: too_high_neighbor,
            });
        }
        tracing::debug!(
            spans = compact_heightfield.spans.len(),
            "built compact heightfield"
        );
        Ok(compact_heightfield)
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Returns the index of the neighbour of span `span_index` located in column `(x, z)`
    /// in the given direction, or `None` if they are not connected.
    #[inline]
    pub fn con_index(&self, x: u16, z: u16, span_index: usize, dir: u8) -> Option<usize> {
        let con = self.spans[span_index].con(dir)?;
        let neighbor_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
        let neighbor_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
        Some(self.cell_at(neighbor_x, neighbor_z).index() as usize + con as usize)
    }

    /// Like [`CompactHeightfield::con_index`], but also returns the coordinates of the neighbouring column.
    #[inline]
    pub(crate) fn neighbor(
        &self,
        x: u16,
        z: u16,
        span_index: usize,
        dir: u8,
    ) -> Option<(u16, u16, usize)> {
        let con = self.spans[span_index].con(dir)?;
        let neighbor_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
        let neighbor_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
        let index = self.cell_at(neighbor_x, neighbor_z).index() as usize + con as usize;
        Some((neighbor_x, neighbor_z, index))
    }

    /// Iterates all columns together with the indices of their spans, in row-major order.
    pub(crate) fn iter_columns(
        &self,
    ) -> impl Iterator<Item = (u16, u16, std::ops::Range<usize>)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).map(move |x| (x, z, self.cell_at(x, z).index_range()))
        })
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::{
        HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::SpanBuilder,
    };

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3::ZERO,
                max: Vec3::new(3.0, 20.0, 3.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    #[test]
    fn only_walkable_spans_are_kept() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 0, 0, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 0, 0, 4, 5, AreaType::NOT_WALKABLE);
        insert(&mut heightfield, 1, 0, 0, 1, AreaType(3));
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        assert_eq!(compact.spans.len(), 2);
        assert_eq!(compact.cell_at(0, 0).count(), 1);
        let span = &compact.spans[compact.cell_at(0, 0).index() as usize];
        assert_eq!(span.y, 1);
        // Open space reaches up to the unwalkable span above.
        assert_eq!(span.height(), 3);
        assert_eq!(compact.areas[compact.cell_at(1, 0).index() as usize], AreaType(3));
    }

    #[test]
    fn neighbours_within_climb_are_connected() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        // +x neighbour is a small step up, -x neighbour is a wall.
        insert(&mut heightfield, 2, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 0, 1, 0, 8, AreaType::DEFAULT_WALKABLE);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        let center = compact.cell_at(1, 1).index() as usize;
        let span = &compact.spans[center];
        // direction 2 is +x, direction 0 is -x
        assert_eq!(span.con(2), Some(0));
        assert_eq!(span.con(0), None);
        assert_eq!(span.con(1), None);
        assert_eq!(span.con(3), None);
        assert_eq!(
            compact.con_index(1, 1, center, 2),
            Some(compact.cell_at(2, 1).index() as usize)
        );
    }

    #[test]
    fn low_overlap_is_not_connected() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 4, 6, AreaType::NOT_WALKABLE);
        insert(&mut heightfield, 2, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 3, 1).unwrap();
        let span = &compact.spans[compact.cell_at(1, 1).index() as usize];
        // The gap shared by both columns is [2, 4], lower than the walkable height.
        assert_eq!(span.con(2), None);
    }
}

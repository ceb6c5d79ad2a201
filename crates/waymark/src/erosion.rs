use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erode the walkable area by agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` to a boundary becomes [`AreaType::NOT_WALKABLE`].
    /// Since this changes the areas, the distance field is rebuilt afterwards.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for (x, z, span_range) in self.iter_columns() {
            for span_index in span_range {
                if !self.areas[span_index].is_walkable() {
                    distance_to_boundary[span_index] = 0;
                    continue;
                }
                // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                let neighbor_count = (0..4)
                    .filter_map(|dir| self.con_index(x, z, span_index, dir))
                    .filter(|neighbor| self.areas[*neighbor].is_walkable())
                    .count();

                // At least one missing neighbour, so this is a boundary cell.
                if neighbor_count != 4 {
                    distance_to_boundary[span_index] = 0;
                }
            }
        }

        let columns: Vec<_> = self.iter_columns().collect();
        // Pass 1
        for (x, z, span_range) in columns.iter().cloned() {
            for span_index in span_range {
                self.chamfer_step(&mut distance_to_boundary, x, z, span_index, 0, 3);
                self.chamfer_step(&mut distance_to_boundary, x, z, span_index, 3, 2);
            }
        }
        // Pass 2
        for (x, z, span_range) in columns.into_iter().rev() {
            for span_index in span_range {
                self.chamfer_step(&mut distance_to_boundary, x, z, span_index, 2, 1);
                self.chamfer_step(&mut distance_to_boundary, x, z, span_index, 1, 0);
            }
        }

        let min_boundary_distance = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        let mut eroded = 0;
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < min_boundary_distance && area.is_walkable() {
                *area = AreaType::NOT_WALKABLE;
                eroded += 1;
            }
        }
        tracing::debug!(eroded, "eroded walkable area");
        self.build_distance_field();
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::flat_compact_heightfield;

    use super::*;

    fn walkable_columns(compact: &CompactHeightfield) -> Vec<(u16, u16)> {
        compact
            .iter_columns()
            .filter(|(_, _, range)| range.clone().any(|i| compact.areas[i].is_walkable()))
            .map(|(x, z, _)| (x, z))
            .collect()
    }

    #[test]
    fn erosion_shrinks_the_walkable_area_by_the_radius() {
        let mut compact = flat_compact_heightfield(10);
        compact.erode_walkable_area(2);
        let walkable = walkable_columns(&compact);
        assert!(!walkable.is_empty());
        for (x, z) in walkable {
            assert!((2..8).contains(&x), "x = {x}");
            assert!((2..8).contains(&z), "z = {z}");
        }
        assert!(!compact.areas[compact.cell_at(1, 5).index() as usize].is_walkable());
        assert!(compact.areas[compact.cell_at(5, 5).index() as usize].is_walkable());
    }

    #[test]
    fn zero_radius_only_rebuilds_the_distance_field() {
        let mut compact = flat_compact_heightfield(6);
        compact.erode_walkable_area(0);
        assert_eq!(walkable_columns(&compact).len(), 36);
        assert!(compact.max_distance > 0);
    }
}

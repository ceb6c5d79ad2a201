use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Builds the distance field for the compact heightfield.
    ///
    /// This is usually the second to the last step in creating a fully built
    /// compact heightfield. This step is required before regions are built
    /// using [`CompactHeightfield::build_regions`].
    ///
    /// After this call, [`CompactHeightfield::max_distance`] and [`CompactHeightfield::dist`] are populated.
    pub fn build_distance_field(&mut self) {
        let distances = self.calculate_distance_field();
        self.dist = self.box_blur(1, &distances);
        self.max_distance = self.dist.iter().copied().max().unwrap_or(0);
        tracing::debug!(max_distance = self.max_distance, "built distance field");
    }

    /// Chamfer distance (2 orthogonal, 3 diagonal) from every span to the nearest boundary span.
    /// A boundary span misses one of its 4 connections or borders a span of another area.
    fn calculate_distance_field(&self) -> Vec<u16> {
        let mut distances = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for (x, z, span_range) in self.iter_columns() {
            for span_index in span_range {
                let area = self.areas[span_index];
                let neighbor_count = (0..4)
                    .filter_map(|dir| self.con_index(x, z, span_index, dir))
                    .filter(|neighbor| self.areas[*neighbor] == area)
                    .count();
                if neighbor_count != 4 {
                    distances[span_index] = 0;
                }
            }
        }

        let columns: Vec<_> = self.iter_columns().collect();
        // Pass 1
        for (x, z, span_range) in columns.iter().cloned() {
            for span_index in span_range {
                // (-1,0) then (-1,-1)
                self.chamfer_step(&mut distances, x, z, span_index, 0, 3);
                // (0,-1) then (1,-1)
                self.chamfer_step(&mut distances, x, z, span_index, 3, 2);
            }
        }
        // Pass 2
        for (x, z, span_range) in columns.into_iter().rev() {
            for span_index in span_range {
                // (1,0) then (1,1)
                self.chamfer_step(&mut distances, x, z, span_index, 2, 1);
                // (0,1) then (-1,1)
                self.chamfer_step(&mut distances, x, z, span_index, 1, 0);
            }
        }

        distances
    }

    /// Smooths the distance field with a 3x3 box filter.
    /// Spans within `threshold * 2` of a boundary keep their distance.
    fn box_blur(&self, threshold: u16, distances: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut blurred = vec![0; distances.len()];

        for (x, z, span_range) in self.iter_columns() {
            for span_index in span_range {
                let center_distance = distances[span_index];
                if center_distance <= threshold {
                    blurred[span_index] = center_distance;
                    continue;
                }

                let mut distance = center_distance as u32;
                for dir in 0..4 {
                    let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, dir) else {
                        distance += center_distance as u32 * 2;
                        continue;
                    };
                    distance += distances[a_index] as u32;

                    let diagonal_dir = (dir + 1) & 0x3;
                    match self.neighbor(ax, az, a_index, diagonal_dir) {
                        Some((_, _, aa_index)) => distance += distances[aa_index] as u32,
                        None => distance += center_distance as u32,
                    }
                }
                blurred[span_index] = ((distance + 5) / 9) as u16;
            }
        }
        blurred
    }

    /// One chamfer step: pulls the distance of the orthogonal neighbour in `dir` (+2)
    /// and of the diagonal neighbour reached from it by turning to `diagonal_dir` (+3).
    pub(crate) fn chamfer_step<D: ChamferDistance>(
        &self,
        distances: &mut [D],
        x: u16,
        z: u16,
        span_index: usize,
        dir: u8,
        diagonal_dir: u8,
    ) {
        let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, dir) else {
            return;
        };
        let new_distance = distances[a_index].plus(2);
        if new_distance < distances[span_index] {
            distances[span_index] = new_distance;
        }

        let Some((_, _, aa_index)) = self.neighbor(ax, az, a_index, diagonal_dir) else {
            return;
        };
        let new_distance = distances[aa_index].plus(3);
        if new_distance < distances[span_index] {
            distances[span_index] = new_distance;
        }
    }
}

/// Saturating distance arithmetic for the chamfer sweeps.
pub(crate) trait ChamferDistance: Copy + Ord {
    fn plus(self, step: u8) -> Self;
}

impl ChamferDistance for u8 {
    #[inline]
    fn plus(self, step: u8) -> Self {
        self.saturating_add(step)
    }
}

impl ChamferDistance for u16 {
    #[inline]
    fn plus(self, step: u8) -> Self {
        self.saturating_add(step as u16)
    }
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, test_utils::flat_compact_heightfield};

    use super::*;

    #[test]
    fn distance_is_zero_exactly_at_the_boundary() {
        let mut compact = flat_compact_heightfield(8);
        compact.build_distance_field();
        for (x, z, range) in compact.iter_columns() {
            for i in range {
                let on_edge = x == 0 || z == 0 || x == 7 || z == 7;
                assert_eq!(compact.dist[i] == 0, on_edge, "({x}, {z})");
            }
        }
    }

    #[test]
    fn max_distance_is_the_largest_blurred_distance() {
        let mut compact = flat_compact_heightfield(8);
        compact.build_distance_field();
        let max = compact.dist.iter().copied().max().unwrap();
        assert!(max > 0);
        assert_eq!(compact.max_distance, max);
    }

    #[test]
    fn area_changes_create_a_boundary() {
        let mut compact = flat_compact_heightfield(8);
        let center = compact.cell_at(3, 3).index() as usize;
        compact.areas[center] = AreaType(1);
        compact.build_distance_field();
        assert_eq!(compact.dist[center], 0);
        let neighbor = compact.cell_at(3, 4).index() as usize;
        assert_eq!(compact.dist[neighbor], 0);
    }
}

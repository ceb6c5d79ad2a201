use glam::{IVec3, Vec2};

use crate::{Aabb2d, AreaType, CompactHeightfield};

/// A vertical prism, given by its footprint on the xz-plane and a height range,
/// whose spans get assigned a custom [`AreaType`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The footprint of the volume on the xz-plane, `x` and `y` of each vertex map to world `x` and `z`.
    pub vertices: Vec<Vec2>,
    /// The bottom of the volume in world units
    pub min_y: f32,
    /// The top of the volume in world units
    pub max_y: f32,
    /// The area assigned to the spans inside the volume
    pub area: AreaType,
}

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    ///
    /// The distance field is invalidated by this, so call [`CompactHeightfield::build_distance_field`] afterwards.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(footprint) = Aabb2d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };

        // Compute the grid footprint of the polygon
        let to_grid = |x: f32, y: f32, z: f32| {
            IVec3::new(
                ((x - self.aabb.min.x) / self.cell_size) as i32,
                ((y - self.aabb.min.y) / self.cell_height) as i32,
                ((z - self.aabb.min.z) / self.cell_size) as i32,
            )
        };
        let mut min = to_grid(footprint.min.x, volume.min_y, footprint.min.y);
        let mut max = to_grid(footprint.max.x, volume.max_y, footprint.max.y);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);

        let mut marked = 0;
        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min.y || y > max.y {
                        continue;
                    }

                    let point = Vec2::new(
                        self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                        self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                    );
                    if point_in_poly(point, &volume.vertices) {
                        self.areas[i] = volume.area;
                        marked += 1;
                    }
                }
            }
        }
        tracing::debug!(marked, area = *volume.area, "marked convex volume");
    }
}

/// Even-odd test of `point` against the polygon on the xz-plane.
pub(crate) fn point_in_poly(point: Vec2, vertices: &[Vec2]) -> bool {
    if vertices.is_empty() {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use crate::test_utils::flat_compact_heightfield;

    use super::*;

    fn square(min: f32, max: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(min, min),
            Vec2::new(min, max),
            Vec2::new(max, max),
            Vec2::new(max, min),
        ]
    }

    #[test]
    fn point_in_square() {
        let square = square(0.0, 2.0);
        assert!(point_in_poly(Vec2::new(1.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::new(3.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::new(1.0, 1.0), &[]));
    }

    #[test]
    fn marks_only_spans_inside_the_volume() {
        let mut compact = flat_compact_heightfield(6);
        compact.mark_convex_poly_area(&ConvexVolume {
            vertices: square(1.0, 3.0),
            min_y: 0.0,
            max_y: 5.0,
            area: AreaType(4),
        });
        for (x, z, range) in compact.iter_columns() {
            let expected = if (1..3).contains(&x) && (1..3).contains(&z) {
                AreaType(4)
            } else {
                AreaType::DEFAULT_WALKABLE
            };
            for i in range {
                assert_eq!(compact.areas[i], expected, "({x}, {z})");
            }
        }
    }

    #[test]
    fn volume_below_the_floor_marks_nothing() {
        let mut compact = flat_compact_heightfield(6);
        compact.mark_convex_poly_area(&ConvexVolume {
            vertices: square(0.0, 6.0),
            min_y: -5.0,
            max_y: -1.0,
            area: AreaType(4),
        });
        assert!(compact.areas.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }
}
